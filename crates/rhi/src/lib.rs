//! Vulkan abstraction layer (Render Hardware Interface).
//!
//! This crate provides a safe abstraction over Vulkan using the `ash` crate.
//! It handles:
//! - Instance, physical device and device creation
//! - Swapchain management
//! - Command buffer recording and synchronization primitives
//! - Compute pipelines, descriptors, samplers and shaders
//!
//! The render core only depends on the [`DeviceApi`] and [`SwapchainApi`]
//! seams; the `mock` feature provides in-memory implementations of both.

mod error;

pub mod api;
pub mod command;
pub mod debug;
pub mod descriptor;
pub mod device;
pub mod instance;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
pub mod physical_device;
pub mod pipeline;
pub mod sampler;
pub mod shader;
pub mod swapchain;
pub mod sync;

pub use api::{DeviceApi, SubmitDesc, SwapchainApi};
pub use error::{RhiError, RhiResult};

// Re-export ash types that users might need
pub use ash::vk;
