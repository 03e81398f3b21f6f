//! The pass abstraction.
//!
//! A pass is one unit of GPU work. The [`RenderCore`](crate::RenderCore)
//! drives every pass through the same lifecycle:
//!
//! ```text
//! Uninitialized --allocate_resources--> ResourcesAllocated --init--> Initialized
//!     Initialized --record_command_buffer--> Initialized (once per frame)
//!     any --destroy--> Destroyed
//! ```
//!
//! Resources are declared in `allocate_resources` and referenced afterwards
//! through the returned ids. Resources of earlier passes are found by name.

use std::sync::Arc;

use blackhole_rhi::DeviceApi;
use blackhole_rhi::command::CommandBuffer;
use blackhole_rhi::device::Device;
use blackhole_scene::Camera;

use crate::allocator::GpuAllocator;
use crate::error::RenderResult;
use crate::resource::ImageId;

/// Read-only data for the frame being recorded.
#[derive(Clone, Copy, Debug)]
pub struct FrameContext<'a> {
    pub camera: &'a Camera,
    /// Number of frames recorded before this one.
    pub frame_number: u64,
}

/// Lifecycle state of a registered pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PassState {
    Uninitialized,
    ResourcesAllocated,
    Initialized,
    Destroyed,
}

/// One-time work done on a pass's first recorded frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum WarmUp {
    #[default]
    Cold,
    WarmedUp,
}

impl WarmUp {
    pub fn is_cold(self) -> bool {
        self == WarmUp::Cold
    }
}

/// A unit of GPU work recorded once per frame.
pub trait Pass<D: DeviceApi = Device> {
    /// Name used in logs and command buffer labels.
    fn name(&self) -> &str;

    /// Declares every GPU resource the pass owns.
    fn allocate_resources(&mut self, allocator: &mut GpuAllocator<D>) -> RenderResult<()>;

    /// Creates pipelines, descriptor sets and samplers.
    ///
    /// Called after the allocator has bound every resource, so image views
    /// and buffer memory are valid.
    fn init(&mut self, device: &Arc<D>, allocator: &GpuAllocator<D>) -> RenderResult<()>;

    /// Records the pass's work for one frame.
    fn record_command_buffer(
        &mut self,
        cmd: &CommandBuffer<D>,
        allocator: &mut GpuAllocator<D>,
        frame: &FrameContext<'_>,
    ) -> RenderResult<()>;

    /// Releases pipeline objects. Allocator-owned resources are left alone.
    fn destroy(&mut self);

    /// The image this pass leaves for presentation, if any.
    fn final_image(&self) -> Option<ImageId> {
        None
    }
}
