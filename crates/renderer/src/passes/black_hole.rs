//! The black-hole compute pass.
//!
//! Every variant writes the same final image from the same camera push
//! constants; they differ in the shader and in the extra bindings:
//!
//! | variant        | binding 2                 | binding 3                  |
//! |----------------|---------------------------|----------------------------|
//! | ray marching   | -                         | -                          |
//! | precomputed    | phi lookup texture        | accretion-disk volume      |
//! | ray query      | TLAS                      | mesh texture array         |

use std::path::PathBuf;
use std::sync::Arc;

use ash::vk;
use bytemuck::{Pod, Zeroable};
use tracing::{debug, info};

use blackhole_core::{Config, MeshConfig, RenderVariant};
use blackhole_rhi::DeviceApi;
use blackhole_rhi::command::CommandBuffer;
use blackhole_rhi::debug::{LabelGuard, colors};
use blackhole_rhi::descriptor::DescriptorBindingBuilder;
use blackhole_rhi::device::Device;
use blackhole_rhi::sampler::{Sampler, SamplerDesc};
use blackhole_rhi::shader::{ShaderId, ShaderLibrary};

use crate::allocator::{GpuAllocator, MemoryPolicy};
use crate::barrier::{discard_contents, image_barrier};
use crate::error::{RenderError, RenderResult};
use crate::pass::{FrameContext, Pass, WarmUp};
use crate::passes::acceleration::{MESH_TEXTURE_CAPACITY, SceneGeometry};
use crate::passes::common::{
    CameraPush, ComputeProgram, ProgramHandles, SHADER_WRITE, Skybox, TRANSFER_READ, group_count,
    sampled_image_info, storage_image_info,
};
use crate::passes::precompute::{ACCRETION_DISK_TEXTURE_NAME, PHI_TEXTURE_NAME};
use crate::resource::{CreateImageInfo, ImageId};

pub const BLACK_HOLE_PASS_NAME: &str = "BlackHolePass";
pub const FINAL_IMAGE_NAME: &str = "BlackHolePass::FinalImage";

const BINDING_FINAL_IMAGE: u32 = 0;
const BINDING_CUBE_MAP: u32 = 1;
const BINDING_PHI_TEXTURE: u32 = 2;
const BINDING_ACCRETION_DISK_TEXTURE: u32 = 3;
const BINDING_TLAS: u32 = 2;
const BINDING_MESH_TEXTURES: u32 = 3;

/// Shader and binding set used by a [`BlackHolePass`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum BlackHoleVariant {
    Precomputed,
    #[default]
    RayMarchingRk4,
    RayMarchingRk2,
    RayMarchingRk1,
    RayQuery,
}

impl BlackHoleVariant {
    pub fn shader(self) -> ShaderId {
        match self {
            BlackHoleVariant::Precomputed => ShaderId::Precomputed,
            BlackHoleVariant::RayMarchingRk4 => ShaderId::RayMarchingRk4,
            BlackHoleVariant::RayMarchingRk2 => ShaderId::RayMarchingRk2,
            BlackHoleVariant::RayMarchingRk1 => ShaderId::RayMarchingRk1,
            BlackHoleVariant::RayQuery => ShaderId::RayQuery,
        }
    }

    /// Whether the precompute pass must run first.
    pub fn needs_precompute(self) -> bool {
        self == BlackHoleVariant::Precomputed
    }

    fn push_constant_size(self) -> u32 {
        let size = match self {
            BlackHoleVariant::RayQuery => std::mem::size_of::<RayQueryPush>(),
            _ => std::mem::size_of::<CameraPush>(),
        };
        size as u32
    }
}

impl From<RenderVariant> for BlackHoleVariant {
    fn from(variant: RenderVariant) -> Self {
        match variant {
            RenderVariant::Precomputed => BlackHoleVariant::Precomputed,
            RenderVariant::RayMarchingRk4 => BlackHoleVariant::RayMarchingRk4,
            RenderVariant::RayMarchingRk2 => BlackHoleVariant::RayMarchingRk2,
            RenderVariant::RayMarchingRk1 => BlackHoleVariant::RayMarchingRk1,
            RenderVariant::RayQuery => BlackHoleVariant::RayQuery,
        }
    }
}

/// Push constants of the ray-query shader.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
struct RayQueryPush {
    camera: CameraPush,
    instance_data: u64,
}

/// Everything a [`BlackHolePass`] needs from the configuration.
#[derive(Clone, Debug)]
pub struct BlackHoleSettings {
    pub variant: BlackHoleVariant,
    pub extent: (u32, u32),
    pub skybox_dir: PathBuf,
    pub shader_dir: PathBuf,
    pub meshes: Vec<MeshConfig>,
}

impl BlackHoleSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            variant: config.render.variant.into(),
            extent: config.render_extent(),
            skybox_dir: config.assets.skybox_dir.clone(),
            shader_dir: config.render.shader_dir.clone(),
            meshes: config.assets.meshes.clone(),
        }
    }
}

/// Final image, skybox and per-frame recording of a [`BlackHolePass`].
///
/// Works with any device; the pass attaches the program it built in `init`.
/// The first recorded frame uploads the skybox (and builds the scene of the
/// ray-query variant) before dispatching.
#[derive(Debug)]
pub struct BlackHoleRecorder {
    variant: BlackHoleVariant,
    extent: (u32, u32),
    final_image: ImageId,
    skybox: Skybox,
    program: Option<ProgramHandles>,
    instance_data_address: vk::DeviceAddress,
    warm_up: WarmUp,
}

impl BlackHoleRecorder {
    /// Declares the final image and the skybox.
    pub fn declare<D: DeviceApi>(
        allocator: &mut GpuAllocator<D>,
        settings: &BlackHoleSettings,
    ) -> RenderResult<Self> {
        let (width, height) = settings.extent;
        let final_image = allocator.add_image(
            &CreateImageInfo::new_2d(
                FINAL_IMAGE_NAME,
                width,
                height,
                vk::Format::R8G8B8A8_UNORM,
                vk::ImageUsageFlags::TRANSFER_SRC | vk::ImageUsageFlags::STORAGE,
            ),
            MemoryPolicy::DEVICE_LOCAL,
        )?;
        let skybox = Skybox::declare(allocator, BLACK_HOLE_PASS_NAME, &settings.skybox_dir)?;

        Ok(Self {
            variant: settings.variant,
            extent: settings.extent,
            final_image,
            skybox,
            program: None,
            instance_data_address: 0,
            warm_up: WarmUp::Cold,
        })
    }

    /// Attaches the program to dispatch. `instance_data_address` is pushed
    /// by the ray-query variant only.
    pub fn set_program(&mut self, program: ProgramHandles, instance_data_address: vk::DeviceAddress) {
        self.program = Some(program);
        self.instance_data_address = instance_data_address;
    }

    #[inline]
    pub fn final_image(&self) -> ImageId {
        self.final_image
    }

    #[inline]
    pub fn cube_map(&self) -> ImageId {
        self.skybox.cube_map()
    }

    #[inline]
    pub fn warm_up(&self) -> WarmUp {
        self.warm_up
    }

    /// Records one frame.
    ///
    /// `build_scene` runs once, on the first frame, after the skybox upload.
    /// The final image is left in `TRANSFER_SRC_OPTIMAL` for the blit.
    pub fn record<D, F>(
        &mut self,
        cmd: &CommandBuffer<D>,
        allocator: &mut GpuAllocator<D>,
        frame: &FrameContext<'_>,
        build_scene: F,
    ) -> RenderResult<()>
    where
        D: DeviceApi,
        F: FnOnce(&CommandBuffer<D>, &mut GpuAllocator<D>) -> RenderResult<()>,
    {
        let Some(program) = &self.program else {
            return Err(BlackHolePass::not_ready("BlackHolePass::record_command_buffer"));
        };

        let _label = LabelGuard::new(cmd, BLACK_HOLE_PASS_NAME, colors::PASS);

        if self.warm_up.is_cold() {
            self.skybox.upload(cmd, allocator)?;
            build_scene(cmd, allocator)?;
            self.warm_up = WarmUp::WarmedUp;
            debug!("BlackHolePass warmed up");
        }

        // Every texel is overwritten, the previous contents are irrelevant.
        let image = allocator.image_mut(self.final_image)?;
        discard_contents(image);
        image_barrier(cmd, image, SHADER_WRITE, None);

        program.bind(cmd, 0);
        let camera = CameraPush::from_camera(frame.camera);
        match self.variant {
            BlackHoleVariant::RayQuery => program.push(
                cmd,
                &RayQueryPush {
                    camera,
                    instance_data: self.instance_data_address,
                },
            ),
            _ => program.push(cmd, &camera),
        }

        let (width, height) = self.extent;
        cmd.dispatch(group_count(width), group_count(height), 1);

        image_barrier(cmd, allocator.image_mut(self.final_image)?, TRANSFER_READ, None);
        Ok(())
    }
}

/// Renders the black hole into [`FINAL_IMAGE_NAME`].
pub struct BlackHolePass {
    settings: BlackHoleSettings,
    recorder: Option<BlackHoleRecorder>,
    scene: Option<SceneGeometry>,
    // Dropped before the sampler its set layout uses.
    program: Option<ComputeProgram>,
    sampler: Option<Sampler>,
}

impl BlackHolePass {
    pub fn new(settings: BlackHoleSettings) -> Self {
        Self {
            settings,
            recorder: None,
            scene: None,
            program: None,
            sampler: None,
        }
    }

    #[inline]
    pub fn variant(&self) -> BlackHoleVariant {
        self.settings.variant
    }

    fn not_ready(operation: &'static str) -> RenderError {
        RenderError::InvalidState {
            operation,
            state: "BlackHolePass is not initialized",
        }
    }
}

impl Pass<Device> for BlackHolePass {
    fn name(&self) -> &str {
        BLACK_HOLE_PASS_NAME
    }

    fn allocate_resources(&mut self, allocator: &mut GpuAllocator<Device>) -> RenderResult<()> {
        self.recorder = Some(BlackHoleRecorder::declare(allocator, &self.settings)?);

        if self.settings.variant == BlackHoleVariant::RayQuery {
            self.scene = Some(SceneGeometry::declare(allocator, &self.settings.meshes)?);
        }

        Ok(())
    }

    fn init(&mut self, device: &Arc<Device>, allocator: &GpuAllocator<Device>) -> RenderResult<()> {
        let variant = self.settings.variant;
        let (final_image, cube_map) = self
            .recorder
            .as_ref()
            .map(|recorder| (recorder.final_image(), recorder.cube_map()))
            .ok_or_else(|| Self::not_ready("BlackHolePass::init"))?;

        let sampler = Sampler::new(
            Arc::clone(device),
            &SamplerDesc::default(),
            "BlackHolePass::Sampler",
        )?;
        let samplers = [sampler.handle(); MESH_TEXTURE_CAPACITY];
        let single = &samplers[..1];

        let mut bindings = vec![
            DescriptorBindingBuilder::storage_image(BINDING_FINAL_IMAGE),
            DescriptorBindingBuilder::immutable_sampled_images(BINDING_CUBE_MAP, single),
        ];
        match variant {
            BlackHoleVariant::Precomputed => {
                bindings.push(DescriptorBindingBuilder::immutable_sampled_images(
                    BINDING_PHI_TEXTURE,
                    single,
                ));
                bindings.push(DescriptorBindingBuilder::immutable_sampled_images(
                    BINDING_ACCRETION_DISK_TEXTURE,
                    single,
                ));
            }
            BlackHoleVariant::RayQuery => {
                bindings.push(DescriptorBindingBuilder::acceleration_structure(BINDING_TLAS));
                bindings.push(DescriptorBindingBuilder::immutable_sampled_images(
                    BINDING_MESH_TEXTURES,
                    &samplers,
                ));
            }
            _ => {}
        }

        let shader =
            ShaderLibrary::new(self.settings.shader_dir.clone()).load(Arc::clone(device), variant.shader())?;
        let program = ComputeProgram::new(
            device,
            BLACK_HOLE_PASS_NAME,
            &bindings,
            variant.push_constant_size(),
            std::slice::from_ref(&shader),
        )?;

        let final_info = [storage_image_info(allocator.image(final_image)?)];
        let cube_info = [sampled_image_info(allocator.image(cube_map)?)];
        program.write(&mut [
            vk::WriteDescriptorSet::default()
                .dst_binding(BINDING_FINAL_IMAGE)
                .descriptor_type(vk::DescriptorType::STORAGE_IMAGE)
                .image_info(&final_info),
            vk::WriteDescriptorSet::default()
                .dst_binding(BINDING_CUBE_MAP)
                .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                .image_info(&cube_info),
        ]);

        let mut instance_data_address = 0;
        match variant {
            BlackHoleVariant::Precomputed => {
                let phi = allocator.image(allocator.find_image(PHI_TEXTURE_NAME)?)?;
                let disk = allocator.image(allocator.find_image(ACCRETION_DISK_TEXTURE_NAME)?)?;
                let phi_info = [sampled_image_info(phi)];
                let disk_info = [sampled_image_info(disk)];
                program.write(&mut [
                    vk::WriteDescriptorSet::default()
                        .dst_binding(BINDING_PHI_TEXTURE)
                        .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                        .image_info(&phi_info),
                    vk::WriteDescriptorSet::default()
                        .dst_binding(BINDING_ACCRETION_DISK_TEXTURE)
                        .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                        .image_info(&disk_info),
                ]);
            }
            BlackHoleVariant::RayQuery => {
                let scene = self
                    .scene
                    .as_mut()
                    .ok_or_else(|| Self::not_ready("BlackHolePass::init"))?;
                scene.create(device, allocator)?;

                let textures = scene.textures();
                let Some(&first) = textures.first() else {
                    return Err(RenderError::ResourceNotFound {
                        kind: "mesh",
                        name: "ray-query scene mesh".to_string(),
                    });
                };
                // Unused slots repeat the first texture so every descriptor is valid.
                let texture_infos = (0..MESH_TEXTURE_CAPACITY)
                    .map(|slot| {
                        let id = textures.get(slot).copied().unwrap_or(first);
                        Ok(sampled_image_info(allocator.image(id)?))
                    })
                    .collect::<RenderResult<Vec<_>>>()?;

                let tlas = [scene.tlas()];
                let mut tlas_write = vk::WriteDescriptorSetAccelerationStructureKHR::default()
                    .acceleration_structures(&tlas);
                program.write(&mut [
                    vk::WriteDescriptorSet::default()
                        .dst_binding(BINDING_TLAS)
                        .descriptor_type(vk::DescriptorType::ACCELERATION_STRUCTURE_KHR)
                        .descriptor_count(1)
                        .push_next(&mut tlas_write),
                    vk::WriteDescriptorSet::default()
                        .dst_binding(BINDING_MESH_TEXTURES)
                        .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                        .image_info(&texture_infos),
                ]);

                let instance_data = allocator.buffer(scene.instance_data())?;
                instance_data_address = device.buffer_device_address(instance_data.handle());
            }
            _ => {}
        }

        if let Some(recorder) = &mut self.recorder {
            recorder.set_program(program.handles(), instance_data_address);
        }
        self.program = Some(program);
        self.sampler = Some(sampler);
        info!(
            "BlackHolePass ready: {:?}, {}x{}",
            variant, self.settings.extent.0, self.settings.extent.1
        );
        Ok(())
    }

    fn record_command_buffer(
        &mut self,
        cmd: &CommandBuffer,
        allocator: &mut GpuAllocator<Device>,
        frame: &FrameContext<'_>,
    ) -> RenderResult<()> {
        let recorder = self
            .recorder
            .as_mut()
            .ok_or_else(|| Self::not_ready("BlackHolePass::record_command_buffer"))?;
        let scene = &self.scene;
        recorder.record(cmd, allocator, frame, |cmd, allocator| match scene {
            Some(scene) => scene.record_build(cmd, allocator),
            None => Ok(()),
        })
    }

    fn destroy(&mut self) {
        if let Some(recorder) = &mut self.recorder {
            recorder.program = None;
        }
        self.program = None;
        if let Some(scene) = &mut self.scene {
            scene.destroy();
        }
        self.sampler = None;
        debug!("BlackHolePass destroyed");
    }

    fn final_image(&self) -> Option<ImageId> {
        self.recorder.as_ref().map(BlackHoleRecorder::final_image)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_variant_selects_shader() {
        assert_eq!(
            BlackHoleVariant::from(RenderVariant::RayMarchingRk2).shader(),
            ShaderId::RayMarchingRk2
        );
        assert_eq!(
            BlackHoleVariant::from(RenderVariant::Precomputed).shader(),
            ShaderId::Precomputed
        );
        assert_eq!(BlackHoleVariant::default(), BlackHoleVariant::RayMarchingRk4);
    }

    #[test]
    fn test_only_precomputed_needs_precompute() {
        assert!(BlackHoleVariant::Precomputed.needs_precompute());
        assert!(!BlackHoleVariant::RayQuery.needs_precompute());
        assert!(!BlackHoleVariant::RayMarchingRk1.needs_precompute());
    }

    #[test]
    fn test_push_constant_sizes() {
        assert_eq!(BlackHoleVariant::RayMarchingRk4.push_constant_size(), 32);
        assert_eq!(BlackHoleVariant::RayQuery.push_constant_size(), 40);
    }

    #[test]
    fn test_settings_follow_config() {
        let mut config = Config::default();
        config.render.variant = RenderVariant::RayQuery;
        config.render.render_width = Some(320);
        config.render.render_height = Some(160);

        let settings = BlackHoleSettings::from_config(&config);
        assert_eq!(settings.variant, BlackHoleVariant::RayQuery);
        assert_eq!(settings.extent, (320, 160));
        assert_eq!(settings.skybox_dir, config.assets.skybox_dir);
    }
}
