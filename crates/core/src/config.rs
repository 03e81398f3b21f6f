//! Application configuration loaded from TOML.
//!
//! Every field has a default, so a missing file or a partial file yields a
//! usable configuration. The file is looked up in `BLACKHOLE_CONFIG`, then
//! `blackhole.toml` in the working directory.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{Error, Result};

/// Environment variable naming the configuration file.
pub const CONFIG_ENV: &str = "BLACKHOLE_CONFIG";
/// Configuration file used when [`CONFIG_ENV`] is not set.
pub const DEFAULT_CONFIG_FILE: &str = "blackhole.toml";

/// Workgroup size of every full-screen compute shader, in both dimensions.
pub const COMPUTE_LOCAL_SIZE: u32 = 16;
/// Upper bound for frames in flight.
pub const MAX_FRAMES_IN_FLIGHT: u32 = 4;

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub window: WindowConfig,
    pub render: RenderConfig,
    pub camera: CameraConfig,
    pub assets: AssetConfig,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct WindowConfig {
    pub width: u32,
    pub height: u32,
    pub title: String,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            width: 800,
            height: 800,
            title: "Black Hole".to_string(),
        }
    }
}

/// Shader family the black-hole pass renders with.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RenderVariant {
    /// Lookup textures filled once by a precompute pass.
    Precomputed,
    #[default]
    RayMarchingRk4,
    RayMarchingRk2,
    RayMarchingRk1,
    /// Ray marching with ray queries against the configured meshes.
    RayQuery,
}

impl RenderVariant {
    pub fn needs_ray_query(self) -> bool {
        self == RenderVariant::RayQuery
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct RenderConfig {
    pub variant: RenderVariant,
    pub frames_in_flight: u32,
    pub validation: bool,
    pub shader_dir: PathBuf,
    /// Internal image width; the window width when absent.
    pub render_width: Option<u32>,
    /// Internal image height; the window height when absent.
    pub render_height: Option<u32>,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            variant: RenderVariant::default(),
            frames_in_flight: 2,
            validation: cfg!(debug_assertions),
            shader_dir: PathBuf::from("shaders/spv"),
            render_width: None,
            render_height: None,
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct CameraConfig {
    pub position: [f32; 3],
    pub direction: [f32; 3],
    /// Units per second.
    pub speed: f32,
    /// Radians per second.
    pub rotation_speed: f32,
    /// Degrees.
    pub fov: f32,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            position: [0.0, -20.0, 2.0],
            direction: [0.0, 1.0, -0.1],
            speed: 5.0,
            rotation_speed: 1.0,
            fov: 90.0,
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct AssetConfig {
    /// Directory holding the six skybox faces.
    pub skybox_dir: PathBuf,
    /// Meshes placed in the scene by the ray-query variant.
    pub meshes: Vec<MeshConfig>,
}

impl Default for AssetConfig {
    fn default() -> Self {
        Self {
            skybox_dir: PathBuf::from("textures/black_hole"),
            meshes: Vec::new(),
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct MeshConfig {
    pub obj: PathBuf,
    pub texture: PathBuf,
    /// Row-major 3x4 object-to-world transform.
    #[serde(default = "identity_transform")]
    pub transform: [f32; 12],
}

fn identity_transform() -> [f32; 12] {
    [1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0]
}

impl Config {
    /// Loads the configuration from [`CONFIG_ENV`] or [`DEFAULT_CONFIG_FILE`].
    ///
    /// A missing file yields the defaults.
    pub fn load() -> Result<Self> {
        let path = std::env::var_os(CONFIG_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

        if !path.exists() {
            tracing::info!("No config file at {:?}, using defaults", path);
            let config = Self::default();
            config.validate()?;
            return Ok(config);
        }

        Self::from_file(&path)
    }

    /// Loads and validates a configuration file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_toml(&content)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        tracing::info!("Loaded config from {:?}", path);
        Ok(config)
    }

    /// Parses and validates a TOML document.
    pub fn from_toml(content: &str) -> Result<Self> {
        let mut config: Config =
            toml::from_str(content).map_err(|e| Error::Config(e.to_string()))?;
        config.render.frames_in_flight = config
            .render
            .frames_in_flight
            .clamp(1, MAX_FRAMES_IN_FLIGHT);
        config.validate()?;
        Ok(config)
    }

    /// Internal render resolution.
    pub fn render_extent(&self) -> (u32, u32) {
        (
            self.render.render_width.unwrap_or(self.window.width),
            self.render.render_height.unwrap_or(self.window.height),
        )
    }

    pub fn validate(&self) -> Result<()> {
        if self.window.width == 0 || self.window.height == 0 {
            return Err(Error::Config(format!(
                "window size must be non-zero, got {}x{}",
                self.window.width, self.window.height
            )));
        }

        let (width, height) = self.render_extent();
        if width == 0 || height == 0 {
            return Err(Error::Config(format!(
                "render size must be non-zero, got {}x{}",
                width, height
            )));
        }
        if !width.is_multiple_of(COMPUTE_LOCAL_SIZE) || !height.is_multiple_of(COMPUTE_LOCAL_SIZE)
        {
            return Err(Error::Config(format!(
                "render size {}x{} must be a multiple of {}",
                width, height, COMPUTE_LOCAL_SIZE
            )));
        }

        let [x, y, z] = self.camera.direction;
        if x * x + y * y + z * z <= f32::EPSILON {
            return Err(Error::Config(
                "camera direction must not be zero".to_string(),
            ));
        }

        if self.render.variant.needs_ray_query() && self.assets.meshes.is_empty() {
            return Err(Error::Config(
                "the ray_query variant needs at least one [[assets.meshes]] entry".to_string(),
            ));
        }

        Ok(())
    }
}
