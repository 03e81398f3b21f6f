//! Core utilities for the black-hole renderer.
//!
//! This crate provides foundational types and utilities used across the workspace:
//! - Error types and result aliases
//! - Logging initialization
//! - Timer and frame rate utilities
//! - Configuration management

mod config;
mod error;
mod logging;
mod timer;

pub use config::{
    AssetConfig, COMPUTE_LOCAL_SIZE, CONFIG_ENV, CameraConfig, Config, DEFAULT_CONFIG_FILE,
    MAX_FRAMES_IN_FLIGHT, MeshConfig, RenderConfig, RenderVariant, WindowConfig,
};
pub use error::{Error, Result};
pub use logging::{DEFAULT_FILTER, init_logging};
pub use timer::{FpsCounter, Timer};
