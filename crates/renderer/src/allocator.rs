//! Two-phase GPU resource allocator.
//!
//! Resources are declared first: each [`GpuAllocator::add_image`] or
//! [`GpuAllocator::add_buffer`] call creates the Vulkan object, picks a
//! memory type for it and reserves an aligned range in that type's block.
//! [`GpuAllocator::present_resources`] then allocates every block with a
//! single call, binds every resource at its reserved offset and creates
//! the image views.
//!
//! ```text
//! Declaring --present_resources--> Presented --destroy--> Destroyed
//! ```

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use ash::vk::{self, Handle};
use tracing::{debug, info};

use blackhole_rhi::DeviceApi;
use blackhole_rhi::device::Device;

use crate::error::{RenderError, RenderResult};
use crate::resource::{
    Buffer, BufferId, CreateBufferInfo, CreateImageInfo, Image, ImageId, ImageState,
    MemoryPlacement,
};

/// Memory property constraints for a resource.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MemoryPolicy {
    /// Flags the memory type must have.
    pub required: vk::MemoryPropertyFlags,
    /// Flags the memory type must not have.
    pub avoidable: vk::MemoryPropertyFlags,
}

impl MemoryPolicy {
    /// Device-local memory that the host cannot see.
    pub const DEVICE_LOCAL: MemoryPolicy = MemoryPolicy {
        required: vk::MemoryPropertyFlags::DEVICE_LOCAL,
        avoidable: vk::MemoryPropertyFlags::HOST_VISIBLE,
    };

    /// Any host-visible memory, for staging and CPU-written buffers.
    pub const HOST_VISIBLE: MemoryPolicy = MemoryPolicy {
        required: vk::MemoryPropertyFlags::HOST_VISIBLE,
        avoidable: vk::MemoryPropertyFlags::empty(),
    };

    pub const fn new(required: vk::MemoryPropertyFlags, avoidable: vk::MemoryPropertyFlags) -> Self {
        Self {
            required,
            avoidable,
        }
    }

    fn accepts(&self, flags: vk::MemoryPropertyFlags) -> bool {
        flags.contains(self.required) && !flags.intersects(self.avoidable)
    }
}

impl Default for MemoryPolicy {
    fn default() -> Self {
        Self::DEVICE_LOCAL
    }
}

/// Returns the first memory type allowed by `type_bits` that satisfies `policy`.
pub fn find_memory_type(
    properties: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    policy: MemoryPolicy,
) -> Option<u32> {
    let count = properties.memory_type_count.min(vk::MAX_MEMORY_TYPES as u32);
    (0..count).find(|&index| {
        type_bits & (1 << index) != 0
            && policy.accepts(properties.memory_types[index as usize].property_flags)
    })
}

/// Rounds `offset` up to a multiple of `alignment`, which must be a power of two.
#[inline]
pub fn align_up(offset: vk::DeviceSize, alignment: vk::DeviceSize) -> vk::DeviceSize {
    let alignment = alignment.max(1);
    (offset + alignment - 1) & !(alignment - 1)
}

/// Buffers are linear; every image is created with optimal tiling.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Tiling {
    Linear,
    Optimal,
}

#[derive(Debug, Default)]
struct MemoryBlock {
    size: vk::DeviceSize,
    memory: vk::DeviceMemory,
    needs_device_address: bool,
    /// Tiling of the resource placed last.
    last_tiling: Option<Tiling>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    Declaring,
    Presented,
    Destroyed,
}

impl Phase {
    fn describe(self) -> &'static str {
        match self {
            Phase::Declaring => "declaring resources",
            Phase::Presented => "resources are presented",
            Phase::Destroyed => "the allocator is destroyed",
        }
    }
}

/// Owner of every image and buffer used by the passes.
pub struct GpuAllocator<D: DeviceApi = Device> {
    device: Arc<D>,
    memory_properties: vk::PhysicalDeviceMemoryProperties,
    buffer_image_granularity: vk::DeviceSize,
    images: Vec<Image>,
    buffers: Vec<Buffer>,
    image_names: HashMap<String, ImageId>,
    buffer_names: HashMap<String, BufferId>,
    blocks: BTreeMap<u32, MemoryBlock>,
    phase: Phase,
}

impl<D: DeviceApi> GpuAllocator<D> {
    /// Creates an empty allocator for the device's memory types.
    pub fn new(device: Arc<D>) -> Self {
        let memory_properties = device.memory_properties();
        debug!(
            "GPU allocator created with {} memory type(s)",
            memory_properties.memory_type_count
        );
        Self {
            device: device.clone(),
            memory_properties,
            buffer_image_granularity: device.buffer_image_granularity(),
            images: Vec::new(),
            buffers: Vec::new(),
            image_names: HashMap::new(),
            buffer_names: HashMap::new(),
            blocks: BTreeMap::new(),
            phase: Phase::Declaring,
        }
    }

    // =========================================================================
    // Declare phase
    // =========================================================================

    /// Declares an image.
    ///
    /// The image is created immediately; memory is bound by
    /// [`present_resources`](Self::present_resources).
    ///
    /// # Errors
    ///
    /// Fails if the allocator is past the declare phase, the name is taken,
    /// image creation fails, or no memory type satisfies `policy`.
    pub fn add_image(
        &mut self,
        info: &CreateImageInfo,
        policy: MemoryPolicy,
    ) -> RenderResult<ImageId> {
        self.expect_phase(Phase::Declaring, "add_image")?;
        if self.image_names.contains_key(&info.name) {
            return Err(RenderError::DuplicateName {
                kind: "image",
                name: info.name.clone(),
            });
        }

        let handle = self.device.create_image(&info.to_vk())?;
        self.device
            .set_object_name(vk::ObjectType::IMAGE, handle.as_raw(), &info.name);

        let requirements = self.device.image_memory_requirements(handle);
        let placement = match self.reserve(&info.name, requirements, policy, Tiling::Optimal, false) {
            Ok(placement) => placement,
            Err(e) => {
                self.device.destroy_image(handle);
                return Err(e);
            }
        };

        let id = ImageId(self.images.len());
        self.images.push(Image {
            handle,
            view: vk::ImageView::null(),
            info: info.clone(),
            placement,
            state: ImageState {
                layout: info.initial_layout,
                ..ImageState::UNDEFINED
            },
        });
        self.image_names.insert(info.name.clone(), id);

        debug!(
            "Declared image '{}' ({}x{}x{}, {:?}) at type {} offset {:#x}, {} bytes",
            info.name,
            info.extent.width,
            info.extent.height,
            info.extent.depth,
            info.format,
            placement.memory_type_index,
            placement.offset,
            placement.size
        );

        Ok(id)
    }

    /// Declares a buffer.
    ///
    /// # Errors
    ///
    /// Same conditions as [`add_image`](Self::add_image).
    pub fn add_buffer(
        &mut self,
        info: &CreateBufferInfo,
        policy: MemoryPolicy,
    ) -> RenderResult<BufferId> {
        self.expect_phase(Phase::Declaring, "add_buffer")?;
        if self.buffer_names.contains_key(&info.name) {
            return Err(RenderError::DuplicateName {
                kind: "buffer",
                name: info.name.clone(),
            });
        }

        let handle = self.device.create_buffer(&info.to_vk())?;
        self.device
            .set_object_name(vk::ObjectType::BUFFER, handle.as_raw(), &info.name);

        let requirements = self.device.buffer_memory_requirements(handle);
        let needs_device_address = info
            .usage
            .contains(vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS);
        let placement = match self.reserve(
            &info.name,
            requirements,
            policy,
            Tiling::Linear,
            needs_device_address,
        )
        {
            Ok(placement) => placement,
            Err(e) => {
                self.device.destroy_buffer(handle);
                return Err(e);
            }
        };

        let memory_flags =
            self.memory_properties.memory_types[placement.memory_type_index as usize].property_flags;

        let id = BufferId(self.buffers.len());
        self.buffers.push(Buffer {
            handle,
            info: info.clone(),
            placement,
            memory: vk::DeviceMemory::null(),
            memory_size: 0,
            memory_flags,
        });
        self.buffer_names.insert(info.name.clone(), id);

        debug!(
            "Declared buffer '{}' ({} bytes) at type {} offset {:#x}",
            info.name, info.size, placement.memory_type_index, placement.offset
        );

        Ok(id)
    }

    fn reserve(
        &mut self,
        name: &str,
        requirements: vk::MemoryRequirements,
        policy: MemoryPolicy,
        tiling: Tiling,
        needs_device_address: bool,
    ) -> RenderResult<MemoryPlacement> {
        let memory_type_index = find_memory_type(
            &self.memory_properties,
            requirements.memory_type_bits,
            policy,
        )
        .ok_or_else(|| RenderError::NoCompatibleMemoryType {
            name: name.to_string(),
            type_bits: requirements.memory_type_bits,
            required: policy.required,
            avoidable: policy.avoidable,
        })?;

        let block = self.blocks.entry(memory_type_index).or_default();
        // A linear and an optimal resource must not share a granularity page.
        let alignment = match block.last_tiling {
            Some(last) if last != tiling => requirements.alignment.max(self.buffer_image_granularity),
            _ => requirements.alignment,
        };
        let offset = align_up(block.size, alignment);
        block.size = offset + requirements.size;
        block.needs_device_address |= needs_device_address;
        block.last_tiling = Some(tiling);

        Ok(MemoryPlacement {
            memory_type_index,
            offset,
            size: requirements.size,
            alignment: requirements.alignment,
        })
    }

    // =========================================================================
    // Bind phase
    // =========================================================================

    /// Allocates one memory block per used memory type, binds every declared
    /// resource and creates the image views.
    ///
    /// # Errors
    ///
    /// Fails if called twice, or if any allocation, bind or view creation
    /// fails. Partially created objects are released by [`destroy`](Self::destroy).
    pub fn present_resources(&mut self) -> RenderResult<()> {
        self.expect_phase(Phase::Declaring, "present_resources")?;

        for (&memory_type_index, block) in self.blocks.iter_mut() {
            if block.size == 0 {
                continue;
            }
            let flags = if block.needs_device_address {
                vk::MemoryAllocateFlags::DEVICE_ADDRESS
            } else {
                vk::MemoryAllocateFlags::empty()
            };
            block.memory = self
                .device
                .allocate_memory(block.size, memory_type_index, flags)
                .map_err(|source| {
                    if source.is_device_lost() {
                        RenderError::DeviceLost
                    } else {
                        RenderError::AllocationFailed {
                            name: format!("memory type {}", memory_type_index),
                            size: block.size,
                            source,
                        }
                    }
                })?;
            info!(
                "Allocated {} bytes of memory type {} ({:?})",
                block.size,
                memory_type_index,
                self.memory_properties.memory_types[memory_type_index as usize].property_flags
            );
        }

        for image in &self.images {
            let memory = self.block_memory(image.placement.memory_type_index);
            self.device
                .bind_image_memory(image.handle, memory, image.placement.offset)?;
        }

        for buffer in &mut self.buffers {
            let (memory, memory_size) = self
                .blocks
                .get(&buffer.placement.memory_type_index)
                .map(|block| (block.memory, block.size))
                .unwrap_or_default();
            self.device
                .bind_buffer_memory(buffer.handle, memory, buffer.placement.offset)?;
            buffer.memory = memory;
            buffer.memory_size = memory_size;
        }

        for image in &mut self.images {
            let view_info = vk::ImageViewCreateInfo::default()
                .image(image.handle)
                .view_type(image.info.view_type)
                .format(image.info.format)
                .components(vk::ComponentMapping::default())
                .subresource_range(image.full_range());
            image.view = self.device.create_image_view(&view_info)?;
            self.device.set_object_name(
                vk::ObjectType::IMAGE_VIEW,
                image.view.as_raw(),
                &image.info.name,
            );
            image.state = ImageState {
                layout: image.info.initial_layout,
                ..ImageState::UNDEFINED
            };
        }

        self.phase = Phase::Presented;
        info!(
            "Presented {} image(s) and {} buffer(s) in {} allocation(s)",
            self.images.len(),
            self.buffers.len(),
            self.allocation_count()
        );
        Ok(())
    }

    fn block_memory(&self, memory_type_index: u32) -> vk::DeviceMemory {
        self.blocks
            .get(&memory_type_index)
            .map(|block| block.memory)
            .unwrap_or_default()
    }

    // =========================================================================
    // Lookup
    // =========================================================================

    pub fn image(&self, id: ImageId) -> RenderResult<&Image> {
        self.images.get(id.0).ok_or_else(|| missing("image", id))
    }

    pub fn image_mut(&mut self, id: ImageId) -> RenderResult<&mut Image> {
        self.images.get_mut(id.0).ok_or_else(|| missing("image", id))
    }

    pub fn buffer(&self, id: BufferId) -> RenderResult<&Buffer> {
        self.buffers.get(id.0).ok_or_else(|| missing("buffer", id))
    }

    pub fn buffer_mut(&mut self, id: BufferId) -> RenderResult<&mut Buffer> {
        self.buffers.get_mut(id.0).ok_or_else(|| missing("buffer", id))
    }

    /// Looks up an image declared by any pass.
    pub fn find_image(&self, name: &str) -> RenderResult<ImageId> {
        self.image_names
            .get(name)
            .copied()
            .ok_or_else(|| RenderError::ResourceNotFound {
                kind: "image",
                name: name.to_string(),
            })
    }

    /// Looks up a buffer declared by any pass.
    pub fn find_buffer(&self, name: &str) -> RenderResult<BufferId> {
        self.buffer_names
            .get(name)
            .copied()
            .ok_or_else(|| RenderError::ResourceNotFound {
                kind: "buffer",
                name: name.to_string(),
            })
    }

    pub fn images(&self) -> impl Iterator<Item = &Image> {
        self.images.iter()
    }

    pub fn buffers(&self) -> impl Iterator<Item = &Buffer> {
        self.buffers.iter()
    }

    /// Number of memory blocks allocated so far.
    pub fn allocation_count(&self) -> usize {
        self.blocks
            .values()
            .filter(|block| block.memory != vk::DeviceMemory::null())
            .count()
    }

    /// Reserved size of the block for `memory_type_index`.
    pub fn block_size(&self, memory_type_index: u32) -> vk::DeviceSize {
        self.blocks
            .get(&memory_type_index)
            .map_or(0, |block| block.size)
    }

    pub fn memory_type_flags(&self, memory_type_index: u32) -> vk::MemoryPropertyFlags {
        self.memory_properties
            .memory_types
            .get(memory_type_index as usize)
            .map(|ty| ty.property_flags)
            .unwrap_or_default()
    }

    pub fn is_presented(&self) -> bool {
        self.phase == Phase::Presented
    }

    #[inline]
    pub fn device(&self) -> &Arc<D> {
        &self.device
    }

    pub(crate) fn expect_presented(&self, operation: &'static str) -> RenderResult<()> {
        self.expect_phase(Phase::Presented, operation)
    }

    fn expect_phase(&self, expected: Phase, operation: &'static str) -> RenderResult<()> {
        if self.phase == expected {
            Ok(())
        } else {
            Err(RenderError::InvalidState {
                operation,
                state: self.phase.describe(),
            })
        }
    }

    // =========================================================================
    // Teardown
    // =========================================================================

    /// Destroys every view, image and buffer and frees the memory blocks.
    ///
    /// The GPU must be idle. Calling it again is a no-op.
    pub fn destroy(&mut self) {
        if self.phase == Phase::Destroyed {
            return;
        }

        for image in self.images.drain(..) {
            if image.view != vk::ImageView::null() {
                self.device.destroy_image_view(image.view);
            }
            self.device.destroy_image(image.handle);
        }
        for buffer in self.buffers.drain(..) {
            self.device.destroy_buffer(buffer.handle);
        }
        for block in self.blocks.values() {
            if block.memory != vk::DeviceMemory::null() {
                self.device.free_memory(block.memory);
            }
        }
        self.blocks.clear();
        self.image_names.clear();
        self.buffer_names.clear();
        self.phase = Phase::Destroyed;

        debug!("GPU allocator destroyed");
    }
}

impl<D: DeviceApi> Drop for GpuAllocator<D> {
    fn drop(&mut self) {
        self.destroy();
    }
}

fn missing(kind: &'static str, id: impl std::fmt::Debug) -> RenderError {
    RenderError::ResourceNotFound {
        kind,
        name: format!("{:?}", id),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use blackhole_rhi::mock::{MOCK_BUFFER_ALIGNMENT, MockCall, MockDevice};

    fn properties(types: &[vk::MemoryPropertyFlags]) -> vk::PhysicalDeviceMemoryProperties {
        let mut props = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: types.len() as u32,
            ..Default::default()
        };
        for (slot, flags) in props.memory_types.iter_mut().zip(types) {
            slot.property_flags = *flags;
        }
        props
    }

    #[test]
    fn test_align_up() {
        assert_eq!(align_up(0, 256), 0);
        assert_eq!(align_up(1, 256), 256);
        assert_eq!(align_up(256, 256), 256);
        assert_eq!(align_up(257, 256), 512);
        assert_eq!(align_up(13, 1), 13);
        assert_eq!(align_up(13, 0), 13);
    }

    #[test]
    fn test_find_memory_type_respects_policy() {
        let props = properties(&[
            vk::MemoryPropertyFlags::DEVICE_LOCAL | vk::MemoryPropertyFlags::HOST_VISIBLE,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        ]);

        assert_eq!(find_memory_type(&props, 0b111, MemoryPolicy::DEVICE_LOCAL), Some(1));
        assert_eq!(find_memory_type(&props, 0b111, MemoryPolicy::HOST_VISIBLE), Some(0));
        assert_eq!(find_memory_type(&props, 0b100, MemoryPolicy::HOST_VISIBLE), Some(2));
        assert_eq!(find_memory_type(&props, 0b101, MemoryPolicy::DEVICE_LOCAL), None);
    }

    #[test]
    fn test_find_memory_type_ignores_bits_past_count() {
        let props = properties(&[vk::MemoryPropertyFlags::HOST_VISIBLE]);
        assert_eq!(
            find_memory_type(&props, 0b10, MemoryPolicy::new(vk::MemoryPropertyFlags::empty(), vk::MemoryPropertyFlags::empty())),
            None
        );
    }

    #[test]
    fn test_declare_after_present_is_rejected() {
        let device = Arc::new(MockDevice::new());
        let mut allocator = GpuAllocator::new(device);
        allocator.present_resources().unwrap();

        let result = allocator.add_buffer(
            &CreateBufferInfo::new("late", 64, vk::BufferUsageFlags::STORAGE_BUFFER),
            MemoryPolicy::DEVICE_LOCAL,
        );
        assert!(matches!(result, Err(RenderError::InvalidState { .. })));
        assert!(matches!(
            allocator.present_resources(),
            Err(RenderError::InvalidState { .. })
        ));
    }

    #[test]
    fn test_duplicate_names_are_rejected() {
        let device = Arc::new(MockDevice::new());
        let mut allocator = GpuAllocator::new(device.clone());
        let info = CreateBufferInfo::new("dup", 64, vk::BufferUsageFlags::STORAGE_BUFFER);
        allocator.add_buffer(&info, MemoryPolicy::DEVICE_LOCAL).unwrap();

        let live = device.live_object_count();
        assert!(matches!(
            allocator.add_buffer(&info, MemoryPolicy::DEVICE_LOCAL),
            Err(RenderError::DuplicateName { kind: "buffer", .. })
        ));
        assert_eq!(device.live_object_count(), live);
    }

    #[test]
    fn test_device_address_flag_follows_buffer_usage() {
        let device = Arc::new(MockDevice::new());
        let mut allocator = GpuAllocator::new(device.clone());
        allocator
            .add_buffer(
                &CreateBufferInfo::new(
                    "addressable",
                    64,
                    vk::BufferUsageFlags::STORAGE_BUFFER
                        | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS,
                ),
                MemoryPolicy::DEVICE_LOCAL,
            )
            .unwrap();
        allocator
            .add_buffer(
                &CreateBufferInfo::new("staging", 64, vk::BufferUsageFlags::TRANSFER_SRC),
                MemoryPolicy::HOST_VISIBLE,
            )
            .unwrap();
        allocator.present_resources().unwrap();

        let flags: Vec<_> = device
            .calls()
            .into_iter()
            .filter_map(|call| match call {
                MockCall::AllocateMemory {
                    memory_type_index,
                    flags,
                    ..
                } => Some((memory_type_index, flags)),
                _ => None,
            })
            .collect();
        assert_eq!(
            flags,
            vec![
                (0, vk::MemoryAllocateFlags::DEVICE_ADDRESS),
                (1, vk::MemoryAllocateFlags::empty()),
            ]
        );
    }

    #[test]
    fn test_buffers_record_backing_memory() {
        let device = Arc::new(MockDevice::new());
        let mut allocator = GpuAllocator::new(device);
        let first = allocator
            .add_buffer(
                &CreateBufferInfo::new("a", 100, vk::BufferUsageFlags::TRANSFER_SRC),
                MemoryPolicy::HOST_VISIBLE,
            )
            .unwrap();
        let second = allocator
            .add_buffer(
                &CreateBufferInfo::new("b", 100, vk::BufferUsageFlags::TRANSFER_SRC),
                MemoryPolicy::HOST_VISIBLE,
            )
            .unwrap();
        allocator.present_resources().unwrap();

        let a = allocator.buffer(first).unwrap();
        let b = allocator.buffer(second).unwrap();
        assert_ne!(a.memory(), vk::DeviceMemory::null());
        assert_eq!(a.memory(), b.memory());
        assert_eq!(a.memory_offset(), 0);
        assert_eq!(b.memory_offset(), MOCK_BUFFER_ALIGNMENT);
        assert!(a.is_host_visible());
        assert!(a.is_host_coherent());
    }

    #[test]
    fn test_buffer_image_granularity_separates_tilings() {
        let device = Arc::new(MockDevice::with_memory_types(&[
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        ]));
        device.set_buffer_image_granularity(0x1000);
        let mut allocator = GpuAllocator::new(device);
        let storage = vk::BufferUsageFlags::STORAGE_BUFFER;

        let first = allocator
            .add_buffer(&CreateBufferInfo::new("first", 100, storage), MemoryPolicy::DEVICE_LOCAL)
            .unwrap();
        let image = allocator
            .add_image(
                &CreateImageInfo::new_2d(
                    "image",
                    16,
                    16,
                    vk::Format::R8G8B8A8_UNORM,
                    vk::ImageUsageFlags::STORAGE,
                ),
                MemoryPolicy::DEVICE_LOCAL,
            )
            .unwrap();
        let after_image = allocator
            .add_buffer(&CreateBufferInfo::new("after", 100, storage), MemoryPolicy::DEVICE_LOCAL)
            .unwrap();
        let last = allocator
            .add_buffer(&CreateBufferInfo::new("last", 100, storage), MemoryPolicy::DEVICE_LOCAL)
            .unwrap();

        assert_eq!(allocator.buffer(first).unwrap().placement().offset, 0);
        let image = allocator.image(image).unwrap().placement();
        assert_eq!(image.offset, 0x1000);

        let after_image = allocator.buffer(after_image).unwrap().placement();
        assert_eq!(after_image.offset % 0x1000, 0);
        assert!(after_image.offset >= image.end());

        // Same tiling as the previous resource: plain alignment.
        let last = allocator.buffer(last).unwrap().placement();
        assert_eq!(last.offset, align_up(after_image.end(), MOCK_BUFFER_ALIGNMENT));
    }

    #[test]
    fn test_destroy_releases_everything() {
        let device = Arc::new(MockDevice::new());
        let mut allocator = GpuAllocator::new(device.clone());
        allocator
            .add_image(
                &CreateImageInfo::new_2d(
                    "img",
                    16,
                    16,
                    vk::Format::R8G8B8A8_UNORM,
                    vk::ImageUsageFlags::STORAGE,
                ),
                MemoryPolicy::DEVICE_LOCAL,
            )
            .unwrap();
        allocator.present_resources().unwrap();
        assert!(device.live_object_count() > 0);

        allocator.destroy();
        allocator.destroy();
        assert_eq!(device.live_object_count(), 0);
        assert!(matches!(
            allocator.find_image("img"),
            Err(RenderError::ResourceNotFound { .. })
        ));
    }
}
