//! Compute render core for the black-hole renderer.
//!
//! This crate orchestrates the rendering process:
//! - Two-phase GPU memory allocation shared by every pass
//! - Image state tracking and barrier helpers
//! - The pass lifecycle and the render core that drives it
//! - Frames in flight: acquire, record, blit, submit, present
//! - The black-hole passes and the device controller

pub mod allocator;
pub mod barrier;
pub mod controller;
pub mod core;
mod error;
pub mod frame;
pub mod pass;
pub mod passes;
pub mod resource;
pub mod staging;

pub use allocator::{GpuAllocator, MemoryPolicy};
pub use controller::VulkanController;
pub use core::RenderCore;
pub use error::{RenderError, RenderResult};
pub use frame::{FrameOrchestrator, FrameStatus};
pub use pass::{FrameContext, Pass, PassState, WarmUp};
pub use resource::{Buffer, BufferId, CreateBufferInfo, CreateImageInfo, Image, ImageId, ImageState};
