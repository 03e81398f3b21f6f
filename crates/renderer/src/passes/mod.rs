//! Black-hole render passes.

pub mod acceleration;
pub mod black_hole;
pub mod common;
pub mod precompute;

pub use black_hole::{
    BLACK_HOLE_PASS_NAME, BlackHolePass, BlackHoleRecorder, BlackHoleSettings, BlackHoleVariant,
};
pub use precompute::{BlackHolePrecomputePass, PrecomputeRecorder};
