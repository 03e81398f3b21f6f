//! Plumbing shared by the black-hole passes.
//!
//! - [`ComputeProgram`]: one descriptor set, one pipeline layout and one or
//!   more compute pipelines sharing them, recorded through [`ProgramHandles`]
//! - [`Skybox`]: the cube map and its staging buffer, uploaded on the first
//!   recorded frame
//! - [`CameraPush`]: the push constant block every black-hole shader reads

use std::path::{Path, PathBuf};
use std::sync::Arc;

use ash::vk;
use bytemuck::{Pod, Zeroable};
use tracing::{debug, info};

use blackhole_resources::cubemap::{face_extent, staging_size};
use blackhole_resources::{CUBE_FACE_COUNT, CubeMapFaces, ResourceError};
use blackhole_rhi::DeviceApi;
use blackhole_rhi::command::CommandBuffer;
use blackhole_rhi::debug::{LabelGuard, colors};
use blackhole_rhi::descriptor::{
    DescriptorPool, DescriptorSetLayout, pool_sizes_for, update_descriptor_sets,
};
use blackhole_rhi::device::Device;
use blackhole_rhi::pipeline::{ComputePipeline, PipelineLayout, compute_push_constant_range};
use blackhole_rhi::shader::Shader;
use blackhole_scene::Camera;

use crate::allocator::{GpuAllocator, MemoryPolicy};
use crate::barrier::{color_layers, image_barrier, memory_barrier};
use crate::error::{RenderError, RenderResult};
use crate::resource::{BufferId, CreateBufferInfo, CreateImageInfo, Image, ImageId, ImageState};
use crate::staging::write_buffer;

/// Layout the compute shaders sample read-only textures in.
pub const SHADER_READ: ImageState = ImageState {
    layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
    stage: vk::PipelineStageFlags::COMPUTE_SHADER,
    access: vk::AccessFlags::SHADER_READ,
};

/// Layout the compute shaders write storage images in.
pub const SHADER_WRITE: ImageState = ImageState {
    layout: vk::ImageLayout::GENERAL,
    stage: vk::PipelineStageFlags::COMPUTE_SHADER,
    access: vk::AccessFlags::SHADER_WRITE,
};

/// Layout of an image about to be copied into.
pub const TRANSFER_WRITE: ImageState = ImageState {
    layout: vk::ImageLayout::TRANSFER_DST_OPTIMAL,
    stage: vk::PipelineStageFlags::TRANSFER,
    access: vk::AccessFlags::TRANSFER_WRITE,
};

/// Layout of an image about to be blitted or copied from.
pub const TRANSFER_READ: ImageState = ImageState {
    layout: vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
    stage: vk::PipelineStageFlags::TRANSFER,
    access: vk::AccessFlags::TRANSFER_READ,
};

/// Camera push constants.
///
/// `vec3` members are 16-byte aligned on the shader side: the position lives
/// at offset 0 and the direction at offset 16.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct CameraPush {
    pub position: [f32; 3],
    _pad0: f32,
    pub direction: [f32; 3],
    _pad1: f32,
}

impl CameraPush {
    pub fn from_camera(camera: &Camera) -> Self {
        Self {
            position: camera.position().to_array(),
            direction: camera.direction().to_array(),
            ..Self::default()
        }
    }
}

/// Descriptor image info for a storage image written in `GENERAL` layout.
pub fn storage_image_info(image: &Image) -> vk::DescriptorImageInfo {
    vk::DescriptorImageInfo::default()
        .image_view(image.view())
        .image_layout(vk::ImageLayout::GENERAL)
}

/// Descriptor image info for a texture read through an immutable sampler.
pub fn sampled_image_info(image: &Image) -> vk::DescriptorImageInfo {
    vk::DescriptorImageInfo::default()
        .image_view(image.view())
        .image_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
}

/// Pipelines, layout and set of a [`ComputeProgram`], as recorded into
/// command buffers.
///
/// The handles stay valid while the program that produced them is alive.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProgramHandles {
    pub pipelines: Vec<vk::Pipeline>,
    pub pipeline_layout: vk::PipelineLayout,
    pub descriptor_set: vk::DescriptorSet,
}

impl ProgramHandles {
    /// Binds pipeline `index` and the descriptor set.
    pub fn bind<D: DeviceApi>(&self, cmd: &CommandBuffer<D>, index: usize) {
        self.switch_pipeline(cmd, index);
        cmd.bind_descriptor_sets(
            vk::PipelineBindPoint::COMPUTE,
            self.pipeline_layout,
            0,
            &[self.descriptor_set],
        );
    }

    /// Switches to pipeline `index` keeping the bound descriptor set.
    pub fn switch_pipeline<D: DeviceApi>(&self, cmd: &CommandBuffer<D>, index: usize) {
        if let Some(&pipeline) = self.pipelines.get(index) {
            cmd.bind_pipeline(vk::PipelineBindPoint::COMPUTE, pipeline);
        }
    }

    pub fn push<D: DeviceApi, T: Pod>(&self, cmd: &CommandBuffer<D>, data: &T) {
        cmd.push_constants(
            self.pipeline_layout,
            vk::ShaderStageFlags::COMPUTE,
            0,
            bytemuck::bytes_of(data),
        );
    }
}

/// A descriptor set shared by one or more compute pipelines.
pub struct ComputeProgram {
    // Field order is drop order: pipelines before their layout, the set's
    // pool before the set layout.
    pipelines: Vec<ComputePipeline>,
    pipeline_layout: PipelineLayout,
    _descriptor_pool: DescriptorPool,
    _descriptor_set_layout: DescriptorSetLayout,
    descriptor_set: vk::DescriptorSet,
    device: Arc<Device>,
}

impl ComputeProgram {
    /// Creates the set layout, allocates the set and builds one pipeline per shader.
    ///
    /// `push_constant_size` of zero means the pipelines take no push constants.
    pub fn new(
        device: &Arc<Device>,
        name: &str,
        bindings: &[vk::DescriptorSetLayoutBinding<'_>],
        push_constant_size: u32,
        shaders: &[Shader],
    ) -> RenderResult<Self> {
        let descriptor_set_layout = DescriptorSetLayout::new(Arc::clone(device), bindings)?;
        blackhole_rhi::debug::name_object(
            device.as_ref(),
            descriptor_set_layout.handle(),
            &format!("{}::DescriptorSetLayout", name),
        );

        let descriptor_pool = DescriptorPool::new(Arc::clone(device), 1, &pool_sizes_for(bindings))?;
        let descriptor_set = descriptor_pool.allocate(&descriptor_set_layout)?;
        blackhole_rhi::debug::name_object(
            device.as_ref(),
            descriptor_set,
            &format!("{}::DescriptorSet", name),
        );

        let push_ranges = if push_constant_size > 0 {
            vec![compute_push_constant_range(push_constant_size)]
        } else {
            Vec::new()
        };
        let pipeline_layout =
            PipelineLayout::new(Arc::clone(device), &[&descriptor_set_layout], &push_ranges)?;

        let pipelines = shaders
            .iter()
            .map(|shader| ComputePipeline::new(Arc::clone(device), shader, &pipeline_layout))
            .collect::<Result<Vec<_>, _>>()?;
        for (index, pipeline) in pipelines.iter().enumerate() {
            blackhole_rhi::debug::name_object(
                device.as_ref(),
                pipeline.handle(),
                &format!("{}::Pipeline{}", name, index),
            );
        }

        debug!("{}: {} compute pipeline(s) ready", name, pipelines.len());

        Ok(Self {
            pipelines,
            pipeline_layout,
            _descriptor_pool: descriptor_pool,
            _descriptor_set_layout: descriptor_set_layout,
            descriptor_set,
            device: Arc::clone(device),
        })
    }

    /// Applies descriptor writes; `dst_set` is filled in.
    pub fn write(&self, writes: &mut [vk::WriteDescriptorSet<'_>]) {
        for write in writes.iter_mut() {
            write.dst_set = self.descriptor_set;
        }
        update_descriptor_sets(&self.device, writes);
    }

    /// Raw handles the recording side binds.
    pub fn handles(&self) -> ProgramHandles {
        ProgramHandles {
            pipelines: self.pipelines.iter().map(ComputePipeline::handle).collect(),
            pipeline_layout: self.pipeline_layout.handle(),
            descriptor_set: self.descriptor_set,
        }
    }
}

/// Skybox cube map declared through the allocator.
#[derive(Debug)]
pub struct Skybox {
    dir: PathBuf,
    extent: (u32, u32),
    cube_map: ImageId,
    staging: BufferId,
    name: String,
}

impl Skybox {
    /// Declares the cube map and its staging buffer.
    ///
    /// Only the first face's header is read here; faces are decoded by
    /// [`upload`](Self::upload).
    pub fn declare<D: DeviceApi>(
        allocator: &mut GpuAllocator<D>,
        owner: &str,
        dir: &Path,
    ) -> RenderResult<Self> {
        let extent = face_extent(dir)?;

        let staging = allocator.add_buffer(
            &CreateBufferInfo::new(
                format!("{}::StagingBuffer", owner),
                staging_size(extent),
                vk::BufferUsageFlags::TRANSFER_SRC,
            ),
            MemoryPolicy::HOST_VISIBLE,
        )?;

        let cube_info = CreateImageInfo::new_cube(
            format!("{}::CubeMap", owner),
            extent.0,
            vk::Format::R8G8B8A8_UNORM,
            vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::TRANSFER_DST,
        );
        let cube_map = allocator.add_image(&cube_info, MemoryPolicy::DEVICE_LOCAL)?;

        Ok(Self {
            dir: dir.to_path_buf(),
            extent,
            cube_map,
            staging,
            name: format!("{}::LoadCubeMap", owner),
        })
    }

    #[inline]
    pub fn cube_map(&self) -> ImageId {
        self.cube_map
    }

    #[inline]
    pub fn staging(&self) -> BufferId {
        self.staging
    }

    /// Decodes the faces into the staging buffer and records the copies.
    ///
    /// Leaves the cube map in `SHADER_READ_ONLY_OPTIMAL` for the compute stage.
    pub fn upload<D: DeviceApi>(
        &self,
        cmd: &CommandBuffer<D>,
        allocator: &mut GpuAllocator<D>,
    ) -> RenderResult<()> {
        let _label = LabelGuard::new(cmd, &self.name, colors::UPLOAD);

        let faces = CubeMapFaces::load(&self.dir)?;
        if (faces.width, faces.height) != self.extent {
            return Err(ResourceError::FaceSizeMismatch {
                path: self.dir.clone(),
                expected: self.extent,
                actual: (faces.width, faces.height),
            }
            .into());
        }

        // Recorded now, executed after the host writes below are visible.
        memory_barrier(
            cmd,
            vk::PipelineStageFlags::HOST,
            vk::AccessFlags::HOST_WRITE,
            vk::PipelineStageFlags::TRANSFER,
            vk::AccessFlags::TRANSFER_READ,
        );
        let layers = color_layers(0, CUBE_FACE_COUNT);
        image_barrier(
            cmd,
            allocator.image_mut(self.cube_map)?,
            TRANSFER_WRITE,
            Some(layers),
        );

        let device = Arc::clone(allocator.device());
        let staging = allocator.buffer(self.staging)?;
        let cube_map = allocator.image(self.cube_map)?;
        let face_size = faces.face_size();
        for (layer, face) in (0u32..).zip(&faces.faces) {
            let offset = face_size * u64::from(layer);
            write_buffer(device.as_ref(), staging, offset, &face.pixels)?;

            let region = vk::BufferImageCopy {
                buffer_offset: offset,
                buffer_row_length: 0,
                buffer_image_height: 0,
                image_subresource: vk::ImageSubresourceLayers {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    mip_level: 0,
                    base_array_layer: layer,
                    layer_count: 1,
                },
                image_offset: vk::Offset3D::default(),
                image_extent: cube_map.extent(),
            };
            cmd.copy_buffer_to_image(
                staging.handle(),
                cube_map.handle(),
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[region],
            );
        }

        image_barrier(
            cmd,
            allocator.image_mut(self.cube_map)?,
            SHADER_READ,
            Some(layers),
        );

        info!("{}: uploaded {} cube map faces", self.name, faces.faces.len());
        Ok(())
    }
}

/// Work groups needed to cover `size` texels with the compute local size.
pub fn group_count(size: u32) -> u32 {
    size.div_ceil(blackhole_core::COMPUTE_LOCAL_SIZE)
}

pub(crate) fn capacity_check(
    what: &'static str,
    capacity: usize,
    requested: usize,
) -> RenderResult<()> {
    if requested > capacity {
        Err(RenderError::CapacityExceeded {
            what,
            capacity,
            requested,
        })
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    #[test]
    fn test_camera_push_layout() {
        assert_eq!(std::mem::size_of::<CameraPush>(), 32);
        let camera = Camera::new(Vec3::new(1.0, 2.0, 3.0), Vec3::X, 1.0, 1.0, 90.0);
        let push = CameraPush::from_camera(&camera);
        let floats: [f32; 8] = bytemuck::cast(push);
        assert_eq!(&floats[0..3], &[1.0, 2.0, 3.0]);
        assert_eq!(&floats[4..7], &[1.0, 0.0, 0.0]);
    }

    #[test]
    fn test_group_count_rounds_up() {
        assert_eq!(group_count(800), 50);
        assert_eq!(group_count(512), 32);
        assert_eq!(group_count(100), 7);
    }

    #[test]
    fn test_capacity_check() {
        assert!(capacity_check("mesh textures", 8, 8).is_ok());
        assert!(matches!(
            capacity_check("mesh textures", 8, 9),
            Err(RenderError::CapacityExceeded { requested: 9, .. })
        ));
    }
}
