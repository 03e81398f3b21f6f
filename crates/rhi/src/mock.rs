//! In-memory [`DeviceApi`] and [`SwapchainApi`] implementations.
//!
//! [`MockDevice`] fabricates handles, computes deterministic memory
//! requirements and records every call that matters to the render core in a
//! call log. Fences follow real semantics: waiting on an unsignaled fence
//! blocks until it is signaled by a submission (when auto-signaling is on) or
//! explicitly through [`MockDevice::signal_fence`].
//!
//! Available with the `mock` feature and in this crate's own tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use ash::vk::{self, Handle};

use crate::api::{DeviceApi, SubmitDesc, SwapchainApi};
use crate::error::{RhiError, RhiResult};

/// Alignment reported for every image.
pub const MOCK_IMAGE_ALIGNMENT: vk::DeviceSize = 0x400;
/// Alignment reported for every buffer.
pub const MOCK_BUFFER_ALIGNMENT: vk::DeviceSize = 0x100;
/// Default `nonCoherentAtomSize`.
pub const DEFAULT_NON_COHERENT_ATOM_SIZE: vk::DeviceSize = 64;
/// Default `bufferImageGranularity`: no separation.
pub const DEFAULT_BUFFER_IMAGE_GRANULARITY: vk::DeviceSize = 1;

static NEXT_HANDLE: AtomicU64 = AtomicU64::new(0x1000);

fn fabricate<H: Handle>() -> H {
    H::from_raw(NEXT_HANDLE.fetch_add(1, Ordering::Relaxed))
}

/// One recorded image transition.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MockImageBarrier {
    pub image: vk::Image,
    pub old_layout: vk::ImageLayout,
    pub new_layout: vk::ImageLayout,
    pub src_access: vk::AccessFlags,
    pub dst_access: vk::AccessFlags,
    pub base_layer: u32,
    pub layer_count: u32,
}

/// One recorded `vkCmdPipelineBarrier`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MockBarrier {
    pub command_buffer: vk::CommandBuffer,
    pub src_stage: vk::PipelineStageFlags,
    pub dst_stage: vk::PipelineStageFlags,
    pub dependency_flags: vk::DependencyFlags,
    /// `(src_access, dst_access)` of each global memory barrier.
    pub memory_barriers: Vec<(vk::AccessFlags, vk::AccessFlags)>,
    pub image_barriers: Vec<MockImageBarrier>,
}

/// One recorded queue submission.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MockSubmit {
    pub command_buffers: Vec<vk::CommandBuffer>,
    pub wait_semaphores: Vec<vk::Semaphore>,
    pub wait_stages: Vec<vk::PipelineStageFlags>,
    pub signal_semaphores: Vec<vk::Semaphore>,
    pub fence: vk::Fence,
}

/// Entries of the call log.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MockCall {
    AllocateMemory {
        memory: vk::DeviceMemory,
        size: vk::DeviceSize,
        memory_type_index: u32,
        flags: vk::MemoryAllocateFlags,
    },
    FreeMemory(vk::DeviceMemory),
    BindImage {
        image: vk::Image,
        memory: vk::DeviceMemory,
        offset: vk::DeviceSize,
    },
    BindBuffer {
        buffer: vk::Buffer,
        memory: vk::DeviceMemory,
        offset: vk::DeviceSize,
    },
    CreateImageView {
        image: vk::Image,
        view: vk::ImageView,
    },
    WaitFence(vk::Fence),
    ResetFence(vk::Fence),
    ResetCommandBuffer(vk::CommandBuffer),
    BeginCommandBuffer(vk::CommandBuffer),
    EndCommandBuffer(vk::CommandBuffer),
    PipelineBarrier(MockBarrier),
    BlitImage {
        command_buffer: vk::CommandBuffer,
        src_image: vk::Image,
        src_layout: vk::ImageLayout,
        dst_image: vk::Image,
        dst_layout: vk::ImageLayout,
        /// `[x, y, z]` of the far corner of each source region.
        src_extent: [i32; 3],
        /// `[x, y, z]` of the far corner of each destination region.
        dst_extent: [i32; 3],
        filter: vk::Filter,
    },
    CopyBufferToImage {
        command_buffer: vk::CommandBuffer,
        buffer: vk::Buffer,
        image: vk::Image,
        layout: vk::ImageLayout,
        region_count: usize,
    },
    BindPipeline(vk::Pipeline),
    BindDescriptorSets {
        layout: vk::PipelineLayout,
        sets: Vec<vk::DescriptorSet>,
    },
    PushConstants {
        layout: vk::PipelineLayout,
        bytes: Vec<u8>,
    },
    Dispatch([u32; 3]),
    FlushMemory {
        memory: vk::DeviceMemory,
        offset: vk::DeviceSize,
        size: vk::DeviceSize,
    },
    Submit(MockSubmit),
    BeginLabel(String),
    EndLabel,
}

#[derive(Default)]
struct MockState {
    calls: Vec<MockCall>,
    /// Requirements of every live image and buffer, keyed by raw handle.
    requirements: HashMap<u64, vk::MemoryRequirements>,
    /// Backing storage of host-visible allocations.
    host_memory: HashMap<u64, Vec<u8>>,
    fences: HashMap<u64, bool>,
    live: HashSet<u64>,
    fail_next_allocation: bool,
}

/// Configurable in-memory device.
pub struct MockDevice {
    memory_properties: vk::PhysicalDeviceMemoryProperties,
    memory_type_bits: AtomicU32,
    non_coherent_atom_size: AtomicU64,
    buffer_image_granularity: AtomicU64,
    auto_signal: AtomicBool,
    state: Mutex<MockState>,
    fence_signaled: Condvar,
}

impl Default for MockDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl MockDevice {
    /// Creates a device with three memory types:
    /// `0` device-local, `1` host-visible and coherent,
    /// `2` device-local, host-visible and coherent.
    pub fn new() -> Self {
        Self::with_memory_types(&[
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            vk::MemoryPropertyFlags::DEVICE_LOCAL
                | vk::MemoryPropertyFlags::HOST_VISIBLE
                | vk::MemoryPropertyFlags::HOST_COHERENT,
        ])
    }

    /// Creates a device exposing exactly `types`, all in heap 0.
    pub fn with_memory_types(types: &[vk::MemoryPropertyFlags]) -> Self {
        let mut memory_properties = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: types.len().min(vk::MAX_MEMORY_TYPES) as u32,
            memory_heap_count: 1,
            ..Default::default()
        };
        memory_properties.memory_heaps[0] = vk::MemoryHeap {
            size: 1 << 32,
            flags: vk::MemoryHeapFlags::DEVICE_LOCAL,
        };
        for (slot, flags) in memory_properties.memory_types.iter_mut().zip(types) {
            *slot = vk::MemoryType {
                property_flags: *flags,
                heap_index: 0,
            };
        }

        let all_types = (1u64 << memory_properties.memory_type_count) - 1;
        Self {
            memory_properties,
            memory_type_bits: AtomicU32::new(all_types as u32),
            non_coherent_atom_size: AtomicU64::new(DEFAULT_NON_COHERENT_ATOM_SIZE),
            buffer_image_granularity: AtomicU64::new(DEFAULT_BUFFER_IMAGE_GRANULARITY),
            auto_signal: AtomicBool::new(true),
            state: Mutex::new(MockState::default()),
            fence_signaled: Condvar::new(),
        }
    }

    /// Restricts the memory types reported as compatible with new resources.
    pub fn set_memory_type_bits(&self, bits: u32) {
        self.memory_type_bits.store(bits, Ordering::SeqCst);
    }

    pub fn set_non_coherent_atom_size(&self, size: vk::DeviceSize) {
        self.non_coherent_atom_size.store(size, Ordering::SeqCst);
    }

    pub fn set_buffer_image_granularity(&self, granularity: vk::DeviceSize) {
        self.buffer_image_granularity.store(granularity, Ordering::SeqCst);
    }

    /// `(offset, size)` of every flushed range, in call order.
    pub fn flushes(&self) -> Vec<(vk::DeviceSize, vk::DeviceSize)> {
        self.lock()
            .calls
            .iter()
            .filter_map(|call| match call {
                MockCall::FlushMemory { offset, size, .. } => Some((*offset, *size)),
                _ => None,
            })
            .collect()
    }

    /// Group counts of every recorded dispatch, in call order.
    pub fn dispatches(&self) -> Vec<[u32; 3]> {
        self.lock()
            .calls
            .iter()
            .filter_map(|call| match call {
                MockCall::Dispatch(groups) => Some(*groups),
                _ => None,
            })
            .collect()
    }

    /// When enabled (the default), a submission signals its fence at once.
    pub fn set_auto_signal(&self, enabled: bool) {
        self.auto_signal.store(enabled, Ordering::SeqCst);
    }

    /// Makes the next `allocate_memory` call fail with out-of-device-memory.
    pub fn fail_next_allocation(&self) {
        self.lock().fail_next_allocation = true;
    }

    /// Signals `fence` and wakes any waiter.
    pub fn signal_fence(&self, fence: vk::Fence) {
        let mut state = self.lock();
        if let Some(signaled) = state.fences.get_mut(&fence.as_raw()) {
            *signaled = true;
        }
        self.fence_signaled.notify_all();
    }

    /// Returns whether `fence` is signaled.
    pub fn is_fence_signaled(&self, fence: vk::Fence) -> bool {
        self.lock().fences.get(&fence.as_raw()).copied().unwrap_or(false)
    }

    /// Returns a copy of the call log.
    pub fn calls(&self) -> Vec<MockCall> {
        self.lock().calls.clone()
    }

    /// Clears the call log.
    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    /// Returns `(size, memory_type_index)` of every memory allocation.
    pub fn allocations(&self) -> Vec<(vk::DeviceSize, u32)> {
        self.lock()
            .calls
            .iter()
            .filter_map(|call| match call {
                MockCall::AllocateMemory {
                    size,
                    memory_type_index,
                    ..
                } => Some((*size, *memory_type_index)),
                _ => None,
            })
            .collect()
    }

    /// Returns every recorded pipeline barrier.
    pub fn barriers(&self) -> Vec<MockBarrier> {
        self.lock()
            .calls
            .iter()
            .filter_map(|call| match call {
                MockCall::PipelineBarrier(barrier) => Some(barrier.clone()),
                _ => None,
            })
            .collect()
    }

    /// Returns every recorded submission.
    pub fn submits(&self) -> Vec<MockSubmit> {
        self.lock()
            .calls
            .iter()
            .filter_map(|call| match call {
                MockCall::Submit(submit) => Some(submit.clone()),
                _ => None,
            })
            .collect()
    }

    /// Number of submissions so far.
    pub fn submit_count(&self) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|call| matches!(call, MockCall::Submit(_)))
            .count()
    }

    /// Memory requirements reported for a created image or buffer.
    pub fn requirements_of(&self, raw_handle: u64) -> Option<vk::MemoryRequirements> {
        self.lock().requirements.get(&raw_handle).copied()
    }

    /// Number of created objects that have not been destroyed yet.
    pub fn live_object_count(&self) -> usize {
        self.lock().live.len()
    }

    /// Reads `len` bytes of a host-visible allocation.
    pub fn read_memory(
        &self,
        memory: vk::DeviceMemory,
        offset: vk::DeviceSize,
        len: usize,
    ) -> Option<Vec<u8>> {
        let state = self.lock();
        let bytes = state.host_memory.get(&memory.as_raw())?;
        let start = offset as usize;
        bytes.get(start..start + len).map(<[u8]>::to_vec)
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        // A panicking test thread must not hide the log from the others.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn record(&self, call: MockCall) {
        self.lock().calls.push(call);
    }

    fn create_object<H: Handle + Copy>(&self) -> H {
        let handle: H = fabricate();
        self.lock().live.insert(handle.as_raw());
        handle
    }

    fn destroy_object<H: Handle>(&self, handle: H) {
        let raw = handle.as_raw();
        let mut state = self.lock();
        state.live.remove(&raw);
        state.requirements.remove(&raw);
    }

    fn memory_type_flags(&self, index: u32) -> vk::MemoryPropertyFlags {
        self.memory_properties
            .memory_types
            .get(index as usize)
            .map(|ty| ty.property_flags)
            .unwrap_or_default()
    }
}

/// Bytes per texel used for mock image sizes.
fn bytes_per_texel(format: vk::Format) -> vk::DeviceSize {
    match format {
        vk::Format::R8_UNORM => 1,
        vk::Format::R32G32_SFLOAT | vk::Format::R16G16B16A16_SFLOAT => 8,
        vk::Format::R32G32B32A32_SFLOAT => 16,
        _ => 4,
    }
}

impl DeviceApi for MockDevice {
    fn memory_properties(&self) -> vk::PhysicalDeviceMemoryProperties {
        self.memory_properties
    }

    fn non_coherent_atom_size(&self) -> vk::DeviceSize {
        self.non_coherent_atom_size.load(Ordering::SeqCst)
    }

    fn buffer_image_granularity(&self) -> vk::DeviceSize {
        self.buffer_image_granularity.load(Ordering::SeqCst)
    }

    fn allocate_memory(
        &self,
        size: vk::DeviceSize,
        memory_type_index: u32,
        flags: vk::MemoryAllocateFlags,
    ) -> RhiResult<vk::DeviceMemory> {
        let host_visible = self
            .memory_type_flags(memory_type_index)
            .contains(vk::MemoryPropertyFlags::HOST_VISIBLE);

        let mut state = self.lock();
        if std::mem::take(&mut state.fail_next_allocation) {
            return Err(RhiError::VulkanError(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY));
        }

        let memory: vk::DeviceMemory = fabricate();
        state.live.insert(memory.as_raw());
        if host_visible {
            state.host_memory.insert(memory.as_raw(), vec![0; size as usize]);
        }
        state.calls.push(MockCall::AllocateMemory {
            memory,
            size,
            memory_type_index,
            flags,
        });
        Ok(memory)
    }

    fn free_memory(&self, memory: vk::DeviceMemory) {
        let mut state = self.lock();
        state.live.remove(&memory.as_raw());
        state.host_memory.remove(&memory.as_raw());
        state.calls.push(MockCall::FreeMemory(memory));
    }

    fn map_memory(
        &self,
        memory: vk::DeviceMemory,
        offset: vk::DeviceSize,
        size: vk::DeviceSize,
    ) -> RhiResult<*mut u8> {
        let mut state = self.lock();
        let bytes = state
            .host_memory
            .get_mut(&memory.as_raw())
            .ok_or(RhiError::VulkanError(vk::Result::ERROR_MEMORY_MAP_FAILED))?;
        if offset + size > bytes.len() as vk::DeviceSize {
            return Err(RhiError::VulkanError(vk::Result::ERROR_MEMORY_MAP_FAILED));
        }
        // The vector is never resized while the allocation is alive.
        Ok(unsafe { bytes.as_mut_ptr().add(offset as usize) })
    }

    fn flush_memory(
        &self,
        memory: vk::DeviceMemory,
        offset: vk::DeviceSize,
        size: vk::DeviceSize,
    ) -> RhiResult<()> {
        let atom = self.non_coherent_atom_size();
        let mut state = self.lock();
        let allocation_size = state
            .host_memory
            .get(&memory.as_raw())
            .map(|bytes| bytes.len() as vk::DeviceSize)
            .ok_or(RhiError::VulkanError(vk::Result::ERROR_MEMORY_MAP_FAILED))?;
        let size_ok = size == vk::WHOLE_SIZE
            || size % atom == 0
            || offset + size == allocation_size;
        if offset % atom != 0 || !size_ok {
            return Err(RhiError::InvalidHandle(format!(
                "flush range {:#x}+{:#x} is not aligned to {}",
                offset, size, atom
            )));
        }
        state.calls.push(MockCall::FlushMemory {
            memory,
            offset,
            size,
        });
        Ok(())
    }

    fn unmap_memory(&self, _memory: vk::DeviceMemory) {}

    fn create_image(&self, info: &vk::ImageCreateInfo<'_>) -> RhiResult<vk::Image> {
        let image: vk::Image = self.create_object();
        let extent = info.extent;
        let size = extent.width as vk::DeviceSize
            * extent.height as vk::DeviceSize
            * extent.depth.max(1) as vk::DeviceSize
            * info.array_layers.max(1) as vk::DeviceSize
            * bytes_per_texel(info.format);
        let requirements = vk::MemoryRequirements {
            size,
            alignment: MOCK_IMAGE_ALIGNMENT,
            memory_type_bits: self.memory_type_bits.load(Ordering::SeqCst),
        };
        self.lock().requirements.insert(image.as_raw(), requirements);
        Ok(image)
    }

    fn image_memory_requirements(&self, image: vk::Image) -> vk::MemoryRequirements {
        self.requirements_of(image.as_raw()).unwrap_or_default()
    }

    fn bind_image_memory(
        &self,
        image: vk::Image,
        memory: vk::DeviceMemory,
        offset: vk::DeviceSize,
    ) -> RhiResult<()> {
        self.record(MockCall::BindImage {
            image,
            memory,
            offset,
        });
        Ok(())
    }

    fn create_image_view(&self, info: &vk::ImageViewCreateInfo<'_>) -> RhiResult<vk::ImageView> {
        let view: vk::ImageView = self.create_object();
        self.record(MockCall::CreateImageView {
            image: info.image,
            view,
        });
        Ok(view)
    }

    fn destroy_image_view(&self, view: vk::ImageView) {
        self.destroy_object(view);
    }

    fn destroy_image(&self, image: vk::Image) {
        self.destroy_object(image);
    }

    fn create_buffer(&self, info: &vk::BufferCreateInfo<'_>) -> RhiResult<vk::Buffer> {
        let buffer: vk::Buffer = self.create_object();
        let requirements = vk::MemoryRequirements {
            size: info.size,
            alignment: MOCK_BUFFER_ALIGNMENT,
            memory_type_bits: self.memory_type_bits.load(Ordering::SeqCst),
        };
        self.lock().requirements.insert(buffer.as_raw(), requirements);
        Ok(buffer)
    }

    fn buffer_memory_requirements(&self, buffer: vk::Buffer) -> vk::MemoryRequirements {
        self.requirements_of(buffer.as_raw()).unwrap_or_default()
    }

    fn bind_buffer_memory(
        &self,
        buffer: vk::Buffer,
        memory: vk::DeviceMemory,
        offset: vk::DeviceSize,
    ) -> RhiResult<()> {
        self.record(MockCall::BindBuffer {
            buffer,
            memory,
            offset,
        });
        Ok(())
    }

    fn destroy_buffer(&self, buffer: vk::Buffer) {
        self.destroy_object(buffer);
    }

    fn create_fence(&self, signaled: bool) -> RhiResult<vk::Fence> {
        let fence: vk::Fence = self.create_object();
        self.lock().fences.insert(fence.as_raw(), signaled);
        Ok(fence)
    }

    fn wait_for_fence(&self, fence: vk::Fence, timeout: u64) -> RhiResult<()> {
        let deadline = Instant::now().checked_add(Duration::from_nanos(timeout));
        let mut state = self.lock();
        state.calls.push(MockCall::WaitFence(fence));

        loop {
            match state.fences.get(&fence.as_raw()) {
                Some(true) => return Ok(()),
                Some(false) => {}
                None => return Err(RhiError::InvalidHandle(format!("{:?}", fence))),
            }

            state = match deadline {
                None => self
                    .fence_signaled
                    .wait(state)
                    .unwrap_or_else(|poisoned| poisoned.into_inner()),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(RhiError::VulkanError(vk::Result::TIMEOUT));
                    }
                    self.fence_signaled
                        .wait_timeout(state, deadline - now)
                        .unwrap_or_else(|poisoned| poisoned.into_inner())
                        .0
                }
            };
        }
    }

    fn fence_status(&self, fence: vk::Fence) -> RhiResult<bool> {
        self.lock()
            .fences
            .get(&fence.as_raw())
            .copied()
            .ok_or_else(|| RhiError::InvalidHandle(format!("{:?}", fence)))
    }

    fn reset_fence(&self, fence: vk::Fence) -> RhiResult<()> {
        let mut state = self.lock();
        state.calls.push(MockCall::ResetFence(fence));
        match state.fences.get_mut(&fence.as_raw()) {
            Some(signaled) => {
                *signaled = false;
                Ok(())
            }
            None => Err(RhiError::InvalidHandle(format!("{:?}", fence))),
        }
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        self.lock().fences.remove(&fence.as_raw());
        self.destroy_object(fence);
    }

    fn create_semaphore(&self) -> RhiResult<vk::Semaphore> {
        Ok(self.create_object())
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        self.destroy_object(semaphore);
    }

    fn create_command_pool(&self, _flags: vk::CommandPoolCreateFlags) -> RhiResult<vk::CommandPool> {
        Ok(self.create_object())
    }

    fn reset_command_pool(&self, _pool: vk::CommandPool) -> RhiResult<()> {
        Ok(())
    }

    fn destroy_command_pool(&self, pool: vk::CommandPool) {
        self.destroy_object(pool);
    }

    fn allocate_command_buffers(
        &self,
        _pool: vk::CommandPool,
        count: u32,
    ) -> RhiResult<Vec<vk::CommandBuffer>> {
        Ok((0..count).map(|_| fabricate()).collect())
    }

    fn begin_command_buffer(
        &self,
        command_buffer: vk::CommandBuffer,
        _flags: vk::CommandBufferUsageFlags,
    ) -> RhiResult<()> {
        self.record(MockCall::BeginCommandBuffer(command_buffer));
        Ok(())
    }

    fn end_command_buffer(&self, command_buffer: vk::CommandBuffer) -> RhiResult<()> {
        self.record(MockCall::EndCommandBuffer(command_buffer));
        Ok(())
    }

    fn reset_command_buffer(&self, command_buffer: vk::CommandBuffer) -> RhiResult<()> {
        self.record(MockCall::ResetCommandBuffer(command_buffer));
        Ok(())
    }

    fn cmd_pipeline_barrier(
        &self,
        command_buffer: vk::CommandBuffer,
        src_stage: vk::PipelineStageFlags,
        dst_stage: vk::PipelineStageFlags,
        dependency_flags: vk::DependencyFlags,
        memory_barriers: &[vk::MemoryBarrier<'_>],
        image_barriers: &[vk::ImageMemoryBarrier<'_>],
    ) {
        self.record(MockCall::PipelineBarrier(MockBarrier {
            command_buffer,
            src_stage,
            dst_stage,
            dependency_flags,
            memory_barriers: memory_barriers
                .iter()
                .map(|b| (b.src_access_mask, b.dst_access_mask))
                .collect(),
            image_barriers: image_barriers
                .iter()
                .map(|b| MockImageBarrier {
                    image: b.image,
                    old_layout: b.old_layout,
                    new_layout: b.new_layout,
                    src_access: b.src_access_mask,
                    dst_access: b.dst_access_mask,
                    base_layer: b.subresource_range.base_array_layer,
                    layer_count: b.subresource_range.layer_count,
                })
                .collect(),
        }));
    }

    fn cmd_blit_image(
        &self,
        command_buffer: vk::CommandBuffer,
        src_image: vk::Image,
        src_layout: vk::ImageLayout,
        dst_image: vk::Image,
        dst_layout: vk::ImageLayout,
        regions: &[vk::ImageBlit],
        filter: vk::Filter,
    ) {
        let corner = |offset: vk::Offset3D| [offset.x, offset.y, offset.z];
        let (src_extent, dst_extent) = regions
            .first()
            .map(|r| (corner(r.src_offsets[1]), corner(r.dst_offsets[1])))
            .unwrap_or_default();
        self.record(MockCall::BlitImage {
            command_buffer,
            src_image,
            src_layout,
            dst_image,
            dst_layout,
            src_extent,
            dst_extent,
            filter,
        });
    }

    fn cmd_copy_buffer_to_image(
        &self,
        command_buffer: vk::CommandBuffer,
        buffer: vk::Buffer,
        image: vk::Image,
        layout: vk::ImageLayout,
        regions: &[vk::BufferImageCopy],
    ) {
        self.record(MockCall::CopyBufferToImage {
            command_buffer,
            buffer,
            image,
            layout,
            region_count: regions.len(),
        });
    }

    fn cmd_bind_pipeline(
        &self,
        _command_buffer: vk::CommandBuffer,
        _bind_point: vk::PipelineBindPoint,
        pipeline: vk::Pipeline,
    ) {
        self.record(MockCall::BindPipeline(pipeline));
    }

    fn cmd_bind_descriptor_sets(
        &self,
        _command_buffer: vk::CommandBuffer,
        _bind_point: vk::PipelineBindPoint,
        layout: vk::PipelineLayout,
        _first_set: u32,
        descriptor_sets: &[vk::DescriptorSet],
    ) {
        self.record(MockCall::BindDescriptorSets {
            layout,
            sets: descriptor_sets.to_vec(),
        });
    }

    fn cmd_push_constants(
        &self,
        _command_buffer: vk::CommandBuffer,
        layout: vk::PipelineLayout,
        _stages: vk::ShaderStageFlags,
        _offset: u32,
        data: &[u8],
    ) {
        self.record(MockCall::PushConstants {
            layout,
            bytes: data.to_vec(),
        });
    }

    fn cmd_dispatch(&self, _command_buffer: vk::CommandBuffer, x: u32, y: u32, z: u32) {
        self.record(MockCall::Dispatch([x, y, z]));
    }

    fn queue_submit(&self, submit: &SubmitDesc<'_>) -> RhiResult<()> {
        let mut state = self.lock();
        state.calls.push(MockCall::Submit(MockSubmit {
            command_buffers: submit.command_buffers.to_vec(),
            wait_semaphores: submit.wait_semaphores.to_vec(),
            wait_stages: submit.wait_stages.to_vec(),
            signal_semaphores: submit.signal_semaphores.to_vec(),
            fence: submit.fence,
        }));

        if submit.fence != vk::Fence::null() && self.auto_signal.load(Ordering::SeqCst) {
            if let Some(signaled) = state.fences.get_mut(&submit.fence.as_raw()) {
                *signaled = true;
            }
            self.fence_signaled.notify_all();
        }
        Ok(())
    }

    fn wait_idle(&self) -> RhiResult<()> {
        Ok(())
    }

    fn set_object_name(&self, _object_type: vk::ObjectType, _raw_handle: u64, _name: &str) {}

    fn cmd_begin_label(&self, _command_buffer: vk::CommandBuffer, name: &str, _color: [f32; 4]) {
        self.record(MockCall::BeginLabel(name.to_string()));
    }

    fn cmd_end_label(&self, _command_buffer: vk::CommandBuffer) {
        self.record(MockCall::EndLabel);
    }
}

/// Swapchain stand-in that hands out images round-robin.
pub struct MockSwapchain {
    images: Vec<vk::Image>,
    extent: vk::Extent2D,
    next_index: AtomicU32,
    out_of_date: AtomicBool,
    presents: Mutex<Vec<(u32, vk::Semaphore)>>,
    acquires: Mutex<Vec<vk::Semaphore>>,
}

impl MockSwapchain {
    pub fn new(image_count: u32, extent: vk::Extent2D) -> Self {
        Self {
            images: (0..image_count).map(|_| fabricate()).collect(),
            extent,
            next_index: AtomicU32::new(0),
            out_of_date: AtomicBool::new(false),
            presents: Mutex::new(Vec::new()),
            acquires: Mutex::new(Vec::new()),
        }
    }

    /// Makes acquire and present report `ERROR_OUT_OF_DATE_KHR`.
    pub fn set_out_of_date(&self, out_of_date: bool) {
        self.out_of_date.store(out_of_date, Ordering::SeqCst);
    }

    /// `(image_index, wait_semaphore)` of every present call.
    pub fn presents(&self) -> Vec<(u32, vk::Semaphore)> {
        self.presents
            .lock()
            .map(|p| p.clone())
            .unwrap_or_default()
    }

    /// Semaphores passed to every acquire call.
    pub fn acquire_semaphores(&self) -> Vec<vk::Semaphore> {
        self.acquires
            .lock()
            .map(|a| a.clone())
            .unwrap_or_default()
    }
}

impl SwapchainApi for MockSwapchain {
    fn acquire_next_image(&self, semaphore: vk::Semaphore) -> Result<(u32, bool), vk::Result> {
        if self.out_of_date.load(Ordering::SeqCst) {
            return Err(vk::Result::ERROR_OUT_OF_DATE_KHR);
        }
        if let Ok(mut acquires) = self.acquires.lock() {
            acquires.push(semaphore);
        }
        let count = self.images.len().max(1) as u32;
        let index = self.next_index.fetch_add(1, Ordering::SeqCst) % count;
        Ok((index, false))
    }

    fn present(
        &self,
        image_index: u32,
        wait_semaphore: vk::Semaphore,
    ) -> Result<bool, vk::Result> {
        if self.out_of_date.load(Ordering::SeqCst) {
            return Err(vk::Result::ERROR_OUT_OF_DATE_KHR);
        }
        if let Ok(mut presents) = self.presents.lock() {
            presents.push((image_index, wait_semaphore));
        }
        Ok(false)
    }

    fn image(&self, index: usize) -> vk::Image {
        self.images.get(index).copied().unwrap_or_default()
    }

    fn image_count(&self) -> u32 {
        self.images.len() as u32
    }

    fn extent(&self) -> vk::Extent2D {
        self.extent
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;

    #[test]
    fn test_default_memory_types() {
        let device = MockDevice::new();
        let props = device.memory_properties();
        assert_eq!(props.memory_type_count, 3);
        assert_eq!(
            props.memory_types[0].property_flags,
            vk::MemoryPropertyFlags::DEVICE_LOCAL
        );
    }

    #[test]
    fn test_image_requirements_follow_create_info() {
        let device = MockDevice::new();
        let info = vk::ImageCreateInfo::default()
            .format(vk::Format::R8G8B8A8_UNORM)
            .extent(vk::Extent3D {
                width: 10,
                height: 10,
                depth: 1,
            })
            .array_layers(1);
        let image = device.create_image(&info).unwrap();
        let req = device.image_memory_requirements(image);
        assert_eq!(req.size, 400);
        assert_eq!(req.alignment, MOCK_IMAGE_ALIGNMENT);
        assert_eq!(req.memory_type_bits, 0b111);
    }

    #[test]
    fn test_wait_times_out_on_unsignaled_fence() {
        let device = MockDevice::new();
        let fence = device.create_fence(false).unwrap();
        let result = device.wait_for_fence(fence, 1_000_000);
        assert!(matches!(
            result,
            Err(RhiError::VulkanError(vk::Result::TIMEOUT))
        ));
    }

    #[test]
    fn test_signal_wakes_waiter() {
        let device = Arc::new(MockDevice::new());
        let fence = device.create_fence(false).unwrap();

        let signaller = {
            let device = Arc::clone(&device);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                device.signal_fence(fence);
            })
        };

        device.wait_for_fence(fence, u64::MAX).unwrap();
        signaller.join().unwrap();
        assert!(device.is_fence_signaled(fence));
    }

    #[test]
    fn test_submit_signals_fence_only_with_auto_signal() {
        let device = MockDevice::new();
        device.set_auto_signal(false);
        let fence = device.create_fence(false).unwrap();
        device
            .queue_submit(&SubmitDesc {
                fence,
                ..Default::default()
            })
            .unwrap();
        assert!(!device.is_fence_signaled(fence));

        device.set_auto_signal(true);
        device
            .queue_submit(&SubmitDesc {
                fence,
                ..Default::default()
            })
            .unwrap();
        assert!(device.is_fence_signaled(fence));
        assert_eq!(device.submit_count(), 2);
    }

    #[test]
    fn test_host_memory_is_writable_through_map() {
        let device = MockDevice::new();
        let memory = device
            .allocate_memory(16, 1, vk::MemoryAllocateFlags::empty())
            .unwrap();
        let ptr = device.map_memory(memory, 4, 4).unwrap();
        unsafe { std::ptr::copy_nonoverlapping([1u8, 2, 3, 4].as_ptr(), ptr, 4) };
        device.unmap_memory(memory);
        assert_eq!(device.read_memory(memory, 4, 4), Some(vec![1, 2, 3, 4]));
    }

    #[test]
    fn test_device_local_memory_cannot_be_mapped() {
        let device = MockDevice::new();
        let memory = device
            .allocate_memory(16, 0, vk::MemoryAllocateFlags::empty())
            .unwrap();
        assert!(device.map_memory(memory, 0, 16).is_err());
    }

    #[test]
    fn test_swapchain_round_robin_and_out_of_date() {
        let swapchain = MockSwapchain::new(
            3,
            vk::Extent2D {
                width: 8,
                height: 8,
            },
        );
        let indices: Vec<u32> = (0..4)
            .map(|_| swapchain.acquire_next_image(vk::Semaphore::null()).unwrap().0)
            .collect();
        assert_eq!(indices, vec![0, 1, 2, 0]);

        swapchain.set_out_of_date(true);
        assert_eq!(
            swapchain.acquire_next_image(vk::Semaphore::null()),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR)
        );
    }
}
