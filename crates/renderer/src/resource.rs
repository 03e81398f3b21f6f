//! Image and buffer records owned by the allocator.
//!
//! Records are created during the declare phase and live until the allocator
//! is destroyed. Passes refer to them through [`ImageId`] and [`BufferId`],
//! which stay valid because the allocator never removes or reorders records.

use ash::vk;

/// Stable handle of an allocator-owned image.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ImageId(pub(crate) usize);

/// Stable handle of an allocator-owned buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BufferId(pub(crate) usize);

/// Synchronization state of an image as seen by the next barrier.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ImageState {
    pub layout: vk::ImageLayout,
    pub stage: vk::PipelineStageFlags,
    pub access: vk::AccessFlags,
}

impl ImageState {
    /// State of an image whose contents are undefined and unused so far.
    pub const UNDEFINED: ImageState = ImageState {
        layout: vk::ImageLayout::UNDEFINED,
        stage: vk::PipelineStageFlags::TOP_OF_PIPE,
        access: vk::AccessFlags::empty(),
    };
}

/// Description of an image to declare.
#[derive(Clone, Debug)]
pub struct CreateImageInfo {
    pub image_type: vk::ImageType,
    pub view_type: vk::ImageViewType,
    pub flags: vk::ImageCreateFlags,
    pub format: vk::Format,
    pub extent: vk::Extent3D,
    pub mip_levels: u32,
    pub array_layers: u32,
    pub usage: vk::ImageUsageFlags,
    pub initial_layout: vk::ImageLayout,
    pub aspect: vk::ImageAspectFlags,
    pub name: String,
}

impl CreateImageInfo {
    /// A single-layer 2D color image.
    pub fn new_2d(
        name: impl Into<String>,
        width: u32,
        height: u32,
        format: vk::Format,
        usage: vk::ImageUsageFlags,
    ) -> Self {
        Self {
            image_type: vk::ImageType::TYPE_2D,
            view_type: vk::ImageViewType::TYPE_2D,
            flags: vk::ImageCreateFlags::empty(),
            format,
            extent: vk::Extent3D {
                width,
                height,
                depth: 1,
            },
            mip_levels: 1,
            array_layers: 1,
            usage,
            initial_layout: vk::ImageLayout::UNDEFINED,
            aspect: vk::ImageAspectFlags::COLOR,
            name: name.into(),
        }
    }

    /// A 3D color image.
    pub fn new_3d(
        name: impl Into<String>,
        extent: vk::Extent3D,
        format: vk::Format,
        usage: vk::ImageUsageFlags,
    ) -> Self {
        Self {
            image_type: vk::ImageType::TYPE_3D,
            view_type: vk::ImageViewType::TYPE_3D,
            extent,
            ..Self::new_2d(name, extent.width, extent.height, format, usage)
        }
    }

    /// A six-layer cube-compatible image viewed as a cube.
    pub fn new_cube(
        name: impl Into<String>,
        size: u32,
        format: vk::Format,
        usage: vk::ImageUsageFlags,
    ) -> Self {
        Self {
            view_type: vk::ImageViewType::CUBE,
            flags: vk::ImageCreateFlags::CUBE_COMPATIBLE,
            array_layers: 6,
            ..Self::new_2d(name, size, size, format, usage)
        }
    }

    pub(crate) fn to_vk(&self) -> vk::ImageCreateInfo<'static> {
        vk::ImageCreateInfo::default()
            .flags(self.flags)
            .image_type(self.image_type)
            .format(self.format)
            .extent(self.extent)
            .mip_levels(self.mip_levels)
            .array_layers(self.array_layers)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(self.usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(self.initial_layout)
    }
}

/// Description of a buffer to declare.
#[derive(Clone, Debug)]
pub struct CreateBufferInfo {
    pub size: vk::DeviceSize,
    pub usage: vk::BufferUsageFlags,
    pub name: String,
}

impl CreateBufferInfo {
    pub fn new(name: impl Into<String>, size: vk::DeviceSize, usage: vk::BufferUsageFlags) -> Self {
        Self {
            size,
            usage,
            name: name.into(),
        }
    }

    pub(crate) fn to_vk(&self) -> vk::BufferCreateInfo<'static> {
        vk::BufferCreateInfo::default()
            .size(self.size)
            .usage(self.usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
    }
}

/// Where a resource lives inside the allocator's memory blocks.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MemoryPlacement {
    pub memory_type_index: u32,
    pub offset: vk::DeviceSize,
    pub size: vk::DeviceSize,
    pub alignment: vk::DeviceSize,
}

impl MemoryPlacement {
    pub fn end(&self) -> vk::DeviceSize {
        self.offset + self.size
    }
}

/// An allocator-owned image and its tracked state.
#[derive(Debug)]
pub struct Image {
    pub(crate) handle: vk::Image,
    pub(crate) view: vk::ImageView,
    pub(crate) info: CreateImageInfo,
    pub(crate) placement: MemoryPlacement,
    pub(crate) state: ImageState,
}

impl Image {
    #[inline]
    pub fn handle(&self) -> vk::Image {
        self.handle
    }

    /// The image view; null until resources are presented.
    #[inline]
    pub fn view(&self) -> vk::ImageView {
        self.view
    }

    pub fn name(&self) -> &str {
        &self.info.name
    }

    pub fn format(&self) -> vk::Format {
        self.info.format
    }

    pub fn extent(&self) -> vk::Extent3D {
        self.info.extent
    }

    pub fn array_layers(&self) -> u32 {
        self.info.array_layers
    }

    pub fn usage(&self) -> vk::ImageUsageFlags {
        self.info.usage
    }

    #[inline]
    pub fn state(&self) -> ImageState {
        self.state
    }

    #[inline]
    pub fn layout(&self) -> vk::ImageLayout {
        self.state.layout
    }

    #[inline]
    pub fn stage(&self) -> vk::PipelineStageFlags {
        self.state.stage
    }

    #[inline]
    pub fn access(&self) -> vk::AccessFlags {
        self.state.access
    }

    pub fn placement(&self) -> MemoryPlacement {
        self.placement
    }

    /// Every mip level and layer of the image.
    pub fn full_range(&self) -> vk::ImageSubresourceRange {
        vk::ImageSubresourceRange {
            aspect_mask: self.info.aspect,
            base_mip_level: 0,
            level_count: self.info.mip_levels,
            base_array_layer: 0,
            layer_count: self.info.array_layers,
        }
    }
}

/// An allocator-owned buffer.
#[derive(Debug)]
pub struct Buffer {
    pub(crate) handle: vk::Buffer,
    pub(crate) info: CreateBufferInfo,
    pub(crate) placement: MemoryPlacement,
    pub(crate) memory: vk::DeviceMemory,
    /// Size of the whole block behind `memory`.
    pub(crate) memory_size: vk::DeviceSize,
    pub(crate) memory_flags: vk::MemoryPropertyFlags,
}

impl Buffer {
    #[inline]
    pub fn handle(&self) -> vk::Buffer {
        self.handle
    }

    pub fn name(&self) -> &str {
        &self.info.name
    }

    /// Requested size in bytes.
    #[inline]
    pub fn size(&self) -> vk::DeviceSize {
        self.info.size
    }

    pub fn usage(&self) -> vk::BufferUsageFlags {
        self.info.usage
    }

    /// Backing memory; null until resources are presented.
    #[inline]
    pub fn memory(&self) -> vk::DeviceMemory {
        self.memory
    }

    /// Offset of the buffer inside [`Buffer::memory`].
    #[inline]
    pub fn memory_offset(&self) -> vk::DeviceSize {
        self.placement.offset
    }

    pub fn placement(&self) -> MemoryPlacement {
        self.placement
    }

    /// Size of the memory block the buffer is bound into; 0 until presented.
    pub fn memory_size(&self) -> vk::DeviceSize {
        self.memory_size
    }

    pub fn is_host_visible(&self) -> bool {
        self.memory_flags
            .contains(vk::MemoryPropertyFlags::HOST_VISIBLE)
    }

    pub fn is_host_coherent(&self) -> bool {
        self.memory_flags
            .contains(vk::MemoryPropertyFlags::HOST_COHERENT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cube_info() {
        let info = CreateImageInfo::new_cube(
            "sky",
            512,
            vk::Format::R8G8B8A8_UNORM,
            vk::ImageUsageFlags::SAMPLED,
        );
        assert_eq!(info.array_layers, 6);
        assert_eq!(info.view_type, vk::ImageViewType::CUBE);
        assert!(info.flags.contains(vk::ImageCreateFlags::CUBE_COMPATIBLE));
        assert_eq!(info.to_vk().array_layers, 6);
    }

    #[test]
    fn test_3d_info() {
        let extent = vk::Extent3D {
            width: 64,
            height: 64,
            depth: 64,
        };
        let info = CreateImageInfo::new_3d(
            "volume",
            extent,
            vk::Format::R32G32_SFLOAT,
            vk::ImageUsageFlags::STORAGE,
        );
        assert_eq!(info.image_type, vk::ImageType::TYPE_3D);
        assert_eq!(info.extent.depth, 64);
        assert_eq!(info.array_layers, 1);
    }
}
