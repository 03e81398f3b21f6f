//! Scene state driven by input.
//!
//! This crate provides the camera the black-hole shaders ray march from.

pub mod camera;

pub use camera::{Camera, MAX_POLAR_ANGLE};
