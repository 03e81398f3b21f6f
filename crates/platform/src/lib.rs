//! Platform abstraction layer for the black-hole renderer.
//!
//! This crate provides platform-specific functionality:
//! - Window management via winit
//! - Keyboard state and the per-frame control snapshot
//! - Vulkan surface creation

mod input;
mod window;

pub use input::{ControlSnapshot, InputState, KeyCode};
pub use window::{Surface, Window};

// Re-export winit types that users might need
pub use winit::event::{ElementState, KeyEvent, WindowEvent};
pub use winit::event_loop::{ActiveEventLoop, EventLoop};
pub use winit::keyboard::PhysicalKey;
