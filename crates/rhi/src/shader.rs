//! Compute shader modules and the shader library.
//!
//! Every shader in the renderer is a pre-compiled SPIR-V compute shader.
//! [`ShaderLibrary`] resolves a logical [`ShaderId`] to a `.spv` file under
//! the configured shader directory and creates a [`Shader`] module from it.
//! Modules only need to live until their pipeline is created and destroy
//! themselves on drop.

use std::ffi::CStr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use ash::vk;
use tracing::{debug, info};

use crate::device::Device;
use crate::error::{RhiError, RhiResult};

/// Entry point shared by every compute shader.
const ENTRY_POINT: &CStr = c"main";

/// Logical identifier of a compute shader.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ShaderId {
    /// Ray marching with a fourth-order Runge-Kutta integrator.
    RayMarchingRk4,
    /// Ray marching with a second-order Runge-Kutta integrator.
    RayMarchingRk2,
    /// Ray marching with an Euler step.
    RayMarchingRk1,
    /// Ray marching plus ray queries against scene meshes.
    RayQuery,
    /// Rendering from the precomputed lookup textures.
    Precomputed,
    /// Fills the deflection-angle (phi) lookup texture.
    PrecomputePhi,
    /// Fills the accretion-disk lookup volume.
    PrecomputeAccretionDisk,
}

impl ShaderId {
    pub const ALL: [ShaderId; 7] = [
        ShaderId::RayMarchingRk4,
        ShaderId::RayMarchingRk2,
        ShaderId::RayMarchingRk1,
        ShaderId::RayQuery,
        ShaderId::Precomputed,
        ShaderId::PrecomputePhi,
        ShaderId::PrecomputeAccretionDisk,
    ];

    /// File name of the compiled shader.
    pub fn file_name(self) -> &'static str {
        match self {
            ShaderId::RayMarchingRk4 => "black_hole_ray_marching_rk4.comp.spv",
            ShaderId::RayMarchingRk2 => "black_hole_ray_marching_rk2.comp.spv",
            ShaderId::RayMarchingRk1 => "black_hole_ray_marching_rk1.comp.spv",
            ShaderId::RayQuery => "black_hole_ray_query.comp.spv",
            ShaderId::Precomputed => "black_hole_precomputed.comp.spv",
            ShaderId::PrecomputePhi => "black_hole_precompute_phi_texture.comp.spv",
            ShaderId::PrecomputeAccretionDisk => {
                "black_hole_precompute_accr_disk_data_texture.comp.spv"
            }
        }
    }
}

impl std::fmt::Display for ShaderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Resolves shader identifiers to SPIR-V files.
#[derive(Clone, Debug)]
pub struct ShaderLibrary {
    directory: PathBuf,
}

impl ShaderLibrary {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    /// Path of the compiled shader for `id`.
    pub fn path(&self, id: ShaderId) -> PathBuf {
        self.directory.join(id.file_name())
    }

    /// Loads `id` and creates its shader module.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::ShaderError`] if the file cannot be read or is not
    /// valid SPIR-V, or a Vulkan error if module creation fails.
    pub fn load(&self, device: Arc<Device>, id: ShaderId) -> RhiResult<Shader> {
        Shader::from_spirv_file(device, &self.path(id))
    }
}

/// Vulkan compute shader module wrapper.
pub struct Shader {
    device: Arc<Device>,
    module: vk::ShaderModule,
}

impl Shader {
    /// Loads a SPIR-V file and creates a shader module.
    pub fn from_spirv_file(device: Arc<Device>, path: &Path) -> RhiResult<Self> {
        debug!("Loading compute shader from {:?}", path);

        let bytes = std::fs::read(path).map_err(|e| {
            RhiError::ShaderError(format!("Failed to read shader file {:?}: {}", path, e))
        })?;

        Self::from_spirv_bytes(device, &bytes)
    }

    /// Creates a shader module from SPIR-V bytes.
    pub fn from_spirv_bytes(device: Arc<Device>, bytes: &[u8]) -> RhiResult<Self> {
        let code = spirv_words(bytes)?;
        let create_info = vk::ShaderModuleCreateInfo::default().code(&code);
        let module = unsafe { device.handle().create_shader_module(&create_info, None)? };

        info!("Created compute shader module ({} words)", code.len());

        Ok(Self { device, module })
    }

    #[inline]
    pub fn handle(&self) -> vk::ShaderModule {
        self.module
    }

    /// Stage description for compute pipeline creation.
    pub fn stage_create_info(&self) -> vk::PipelineShaderStageCreateInfo<'_> {
        vk::PipelineShaderStageCreateInfo::default()
            .stage(vk::ShaderStageFlags::COMPUTE)
            .module(self.module)
            .name(ENTRY_POINT)
    }
}

impl Drop for Shader {
    fn drop(&mut self) {
        unsafe {
            self.device
                .handle()
                .destroy_shader_module(self.module, None);
        }
        debug!("Destroyed compute shader module");
    }
}

/// SPIR-V magic number in host byte order.
const SPIRV_MAGIC: u32 = 0x0723_0203;

/// Converts little-endian SPIR-V bytes to code words.
fn spirv_words(bytes: &[u8]) -> RhiResult<Vec<u32>> {
    if !bytes.len().is_multiple_of(4) {
        return Err(RhiError::ShaderError(format!(
            "SPIR-V code must be 4-byte aligned, got {} bytes",
            bytes.len()
        )));
    }

    let code: Vec<u32> = bytes
        .chunks_exact(4)
        .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect();

    match code.first() {
        Some(&SPIRV_MAGIC) => Ok(code),
        _ => Err(RhiError::ShaderError(
            "missing SPIR-V magic number".to_string(),
        )),
    }
}
