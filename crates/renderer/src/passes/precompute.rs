//! One-shot pass filling the lookup textures of the precomputed variant.

use std::path::PathBuf;
use std::sync::Arc;

use ash::vk;
use tracing::info;

use blackhole_rhi::DeviceApi;
use blackhole_rhi::command::CommandBuffer;
use blackhole_rhi::debug::{LabelGuard, colors};
use blackhole_rhi::descriptor::DescriptorBindingBuilder;
use blackhole_rhi::device::Device;
use blackhole_rhi::shader::{ShaderId, ShaderLibrary};

use crate::allocator::{GpuAllocator, MemoryPolicy};
use crate::barrier::image_barrier;
use crate::error::{RenderError, RenderResult};
use crate::pass::{FrameContext, Pass, WarmUp};
use crate::passes::common::{
    ComputeProgram, ProgramHandles, SHADER_READ, SHADER_WRITE, group_count, storage_image_info,
};
use crate::resource::{CreateImageInfo, ImageId};

pub const PRECOMPUTE_PASS_NAME: &str = "BlackHolePrecomputePass";
pub const PHI_TEXTURE_NAME: &str = "BlackHolePrecomputePass::PrecomputedPhiTexture";
pub const ACCRETION_DISK_TEXTURE_NAME: &str =
    "BlackHolePrecomputePass::PrecomputedAccrDiskDataTexture";

pub const PHI_TEXTURE_SIZE: u32 = 512;
pub const ACCRETION_DISK_TEXTURE_SIZE: u32 = 64;

const BINDING_PHI_TEXTURE: u32 = 0;
const BINDING_ACCRETION_DISK_TEXTURE: u32 = 1;

const PHI_PIPELINE: usize = 0;
const ACCRETION_DISK_PIPELINE: usize = 1;

/// Declares and records the two lookup textures on any device.
///
/// The dispatches are recorded on the first frame only; later frames record
/// nothing.
#[derive(Debug)]
pub struct PrecomputeRecorder {
    phi_texture: ImageId,
    accretion_disk_texture: ImageId,
    program: Option<ProgramHandles>,
    warm_up: WarmUp,
}

impl PrecomputeRecorder {
    /// Declares both textures as device-local storage images.
    pub fn declare<D: DeviceApi>(allocator: &mut GpuAllocator<D>) -> RenderResult<Self> {
        let usage = vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::STORAGE;

        let phi_texture = allocator.add_image(
            &CreateImageInfo::new_2d(
                PHI_TEXTURE_NAME,
                PHI_TEXTURE_SIZE,
                PHI_TEXTURE_SIZE,
                vk::Format::R32G32_SFLOAT,
                usage,
            ),
            MemoryPolicy::DEVICE_LOCAL,
        )?;

        let accretion_disk_texture = allocator.add_image(
            &CreateImageInfo::new_3d(
                ACCRETION_DISK_TEXTURE_NAME,
                vk::Extent3D {
                    width: ACCRETION_DISK_TEXTURE_SIZE,
                    height: ACCRETION_DISK_TEXTURE_SIZE,
                    depth: ACCRETION_DISK_TEXTURE_SIZE,
                },
                vk::Format::R32G32_SFLOAT,
                usage,
            ),
            MemoryPolicy::DEVICE_LOCAL,
        )?;

        Ok(Self {
            phi_texture,
            accretion_disk_texture,
            program: None,
            warm_up: WarmUp::Cold,
        })
    }

    /// Attaches the program whose pipelines `0` and `1` fill the phi
    /// texture and the accretion-disk volume.
    pub fn set_program(&mut self, program: ProgramHandles) {
        self.program = Some(program);
    }

    #[inline]
    pub fn phi_texture(&self) -> ImageId {
        self.phi_texture
    }

    #[inline]
    pub fn accretion_disk_texture(&self) -> ImageId {
        self.accretion_disk_texture
    }

    #[inline]
    pub fn warm_up(&self) -> WarmUp {
        self.warm_up
    }

    /// Records both dispatches on the first call, nothing afterwards.
    ///
    /// Leaves both textures in `SHADER_READ_ONLY_OPTIMAL` for the compute stage.
    pub fn record<D: DeviceApi>(
        &mut self,
        cmd: &CommandBuffer<D>,
        allocator: &mut GpuAllocator<D>,
    ) -> RenderResult<()> {
        if !self.warm_up.is_cold() {
            return Ok(());
        }
        let Some(program) = &self.program else {
            return Err(RenderError::InvalidState {
                operation: "BlackHolePrecomputePass::record_command_buffer",
                state: "the pass is not initialized",
            });
        };
        let (phi, disk) = (self.phi_texture, self.accretion_disk_texture);

        let _label = LabelGuard::new(cmd, PRECOMPUTE_PASS_NAME, colors::PRECOMPUTE);

        image_barrier(cmd, allocator.image_mut(phi)?, SHADER_WRITE, None);
        image_barrier(cmd, allocator.image_mut(disk)?, SHADER_WRITE, None);

        program.bind(cmd, PHI_PIPELINE);
        cmd.dispatch(
            group_count(PHI_TEXTURE_SIZE),
            group_count(PHI_TEXTURE_SIZE),
            1,
        );

        // Same layout, the bound set stays valid.
        program.switch_pipeline(cmd, ACCRETION_DISK_PIPELINE);
        cmd.dispatch(
            group_count(ACCRETION_DISK_TEXTURE_SIZE),
            group_count(ACCRETION_DISK_TEXTURE_SIZE),
            ACCRETION_DISK_TEXTURE_SIZE,
        );

        image_barrier(cmd, allocator.image_mut(phi)?, SHADER_READ, None);
        image_barrier(cmd, allocator.image_mut(disk)?, SHADER_READ, None);

        self.warm_up = WarmUp::WarmedUp;
        info!("Recorded lookup texture precomputation");
        Ok(())
    }
}

/// Fills the deflection-angle texture and the accretion-disk volume once.
///
/// Registered ahead of the black-hole pass, which samples both textures.
pub struct BlackHolePrecomputePass {
    shader_dir: PathBuf,
    recorder: Option<PrecomputeRecorder>,
    program: Option<ComputeProgram>,
}

impl BlackHolePrecomputePass {
    pub fn new(shader_dir: impl Into<PathBuf>) -> Self {
        Self {
            shader_dir: shader_dir.into(),
            recorder: None,
            program: None,
        }
    }

    fn recorder_mut(&mut self) -> RenderResult<&mut PrecomputeRecorder> {
        self.recorder.as_mut().ok_or(RenderError::InvalidState {
            operation: "BlackHolePrecomputePass",
            state: "its textures are not declared",
        })
    }
}

impl Pass<Device> for BlackHolePrecomputePass {
    fn name(&self) -> &str {
        PRECOMPUTE_PASS_NAME
    }

    fn allocate_resources(&mut self, allocator: &mut GpuAllocator<Device>) -> RenderResult<()> {
        self.recorder = Some(PrecomputeRecorder::declare(allocator)?);
        Ok(())
    }

    fn init(&mut self, device: &Arc<Device>, allocator: &GpuAllocator<Device>) -> RenderResult<()> {
        let shader_dir = self.shader_dir.clone();
        let recorder = self.recorder_mut()?;
        let (phi, disk) = (recorder.phi_texture(), recorder.accretion_disk_texture());

        let bindings = [
            DescriptorBindingBuilder::storage_image(BINDING_PHI_TEXTURE),
            DescriptorBindingBuilder::storage_image(BINDING_ACCRETION_DISK_TEXTURE),
        ];
        let library = ShaderLibrary::new(shader_dir);
        let shaders = [
            library.load(Arc::clone(device), ShaderId::PrecomputePhi)?,
            library.load(Arc::clone(device), ShaderId::PrecomputeAccretionDisk)?,
        ];
        let program = ComputeProgram::new(device, PRECOMPUTE_PASS_NAME, &bindings, 0, &shaders)?;

        let phi_info = [storage_image_info(allocator.image(phi)?)];
        let disk_info = [storage_image_info(allocator.image(disk)?)];
        program.write(&mut [
            vk::WriteDescriptorSet::default()
                .dst_binding(BINDING_PHI_TEXTURE)
                .descriptor_type(vk::DescriptorType::STORAGE_IMAGE)
                .image_info(&phi_info),
            vk::WriteDescriptorSet::default()
                .dst_binding(BINDING_ACCRETION_DISK_TEXTURE)
                .descriptor_type(vk::DescriptorType::STORAGE_IMAGE)
                .image_info(&disk_info),
        ]);

        recorder.set_program(program.handles());
        self.program = Some(program);
        Ok(())
    }

    fn record_command_buffer(
        &mut self,
        cmd: &CommandBuffer,
        allocator: &mut GpuAllocator<Device>,
        _frame: &FrameContext<'_>,
    ) -> RenderResult<()> {
        self.recorder_mut()?.record(cmd, allocator)
    }

    fn destroy(&mut self) {
        if let Some(recorder) = &mut self.recorder {
            recorder.program = None;
        }
        self.program = None;
    }
}
