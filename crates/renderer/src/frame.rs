//! Frames in flight and the per-frame submission sequence.
//!
//! The [`FrameOrchestrator`] owns one [`FrameSlot`] per frame in flight and
//! one present semaphore per swapchain image. Each call to
//! [`FrameOrchestrator::draw_frame`] runs the full sequence:
//!
//! ```text
//! 1. Wait on the slot's fence (the only blocking point)
//! 2. Acquire a swapchain image (signals the slot's acquire semaphore)
//! 3. Reset the fence
//! 4. Reset and re-record the slot's command buffer:
//!    - every pass, through the render core
//!    - swapchain image -> TRANSFER_DST, blit, -> PRESENT_SRC
//! 5. Submit: wait on the acquire semaphore at TRANSFER,
//!    signal the image's present semaphore and the slot's fence
//! 6. Present
//! 7. Advance to the next slot
//! ```
//!
//! The fence is reset only after a successful acquire, so an out-of-date
//! swapchain never leaves the slot with an unsignaled fence and nothing
//! submitted.

use std::sync::Arc;

use ash::vk;
use tracing::{debug, info};

use blackhole_rhi::command::{CommandBuffer, CommandPool};
use blackhole_rhi::debug::{LabelGuard, colors};
use blackhole_rhi::device::Device;
use blackhole_rhi::sync::{Fence, Semaphore};
use blackhole_rhi::{DeviceApi, SubmitDesc, SwapchainApi};
use blackhole_scene::Camera;

use crate::barrier::{color_layers, transition_state};
use crate::core::RenderCore;
use crate::error::{RenderError, RenderResult};
use crate::pass::FrameContext;
use crate::resource::{Image, ImageState};

/// Outcome of one [`FrameOrchestrator::draw_frame`] call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameStatus {
    /// The frame was submitted and presented.
    Presented,
    /// The frame was presented but the swapchain no longer matches the surface.
    Suboptimal,
    /// The swapchain must be recreated. Nothing was presented.
    OutOfDate,
}

impl FrameStatus {
    pub fn needs_recreate(self) -> bool {
        self != FrameStatus::Presented
    }
}

/// Resources of one frame in flight.
///
/// The command buffer and the acquire semaphore are only touched after the
/// slot's fence has been observed signaled.
pub struct FrameSlot<D: DeviceApi = Device> {
    command_buffer: CommandBuffer<D>,
    image_available: Semaphore<D>,
    in_flight: Fence<D>,
    // Dropped last: the command buffer belongs to it.
    _pool: CommandPool<D>,
}

impl<D: DeviceApi> FrameSlot<D> {
    fn new(device: &Arc<D>, index: usize) -> RenderResult<Self> {
        let pool = CommandPool::new_transient(Arc::clone(device))?;
        let command_buffer = pool.allocate()?;
        let image_available =
            Semaphore::named(Arc::clone(device), &format!("Frame{}::ImageAvailable", index))?;
        // Signaled so the first wait returns immediately.
        let in_flight = Fence::named(Arc::clone(device), true, &format!("Frame{}::InFlight", index))?;

        Ok(Self {
            command_buffer,
            image_available,
            in_flight,
            _pool: pool,
        })
    }

    #[inline]
    pub fn command_buffer(&self) -> &CommandBuffer<D> {
        &self.command_buffer
    }

    #[inline]
    pub fn image_available(&self) -> &Semaphore<D> {
        &self.image_available
    }

    #[inline]
    pub fn in_flight(&self) -> &Fence<D> {
        &self.in_flight
    }
}

/// Drives the frame loop over a fixed number of frames in flight.
pub struct FrameOrchestrator<D: DeviceApi = Device> {
    device: Arc<D>,
    slots: Vec<FrameSlot<D>>,
    /// Present semaphores, one per swapchain image.
    render_finished: Vec<Semaphore<D>>,
    current_slot: usize,
    frame_number: u64,
}

impl<D: DeviceApi> FrameOrchestrator<D> {
    /// Creates `frames_in_flight` slots and `image_count` present semaphores.
    pub fn new(device: Arc<D>, frames_in_flight: usize, image_count: u32) -> RenderResult<Self> {
        let frames_in_flight = frames_in_flight.max(1);
        let slots = (0..frames_in_flight)
            .map(|index| FrameSlot::new(&device, index))
            .collect::<RenderResult<Vec<_>>>()?;
        let render_finished = Self::create_present_semaphores(&device, image_count)?;

        info!(
            "Frame orchestrator created with {} frame(s) in flight and {} swapchain image(s)",
            frames_in_flight, image_count
        );

        Ok(Self {
            device,
            slots,
            render_finished,
            current_slot: 0,
            frame_number: 0,
        })
    }

    fn create_present_semaphores(device: &Arc<D>, count: u32) -> RenderResult<Vec<Semaphore<D>>> {
        (0..count)
            .map(|index| {
                Semaphore::named(Arc::clone(device), &format!("SwapchainImage{}::RenderFinished", index))
                    .map_err(RenderError::from)
            })
            .collect()
    }

    /// Replaces the present semaphores after the swapchain was recreated.
    ///
    /// The device must be idle.
    pub fn rebuild_image_sync(&mut self, image_count: u32) -> RenderResult<()> {
        self.render_finished = Self::create_present_semaphores(&self.device, image_count)?;
        debug!("Rebuilt present semaphores for {} image(s)", image_count);
        Ok(())
    }

    /// Records, submits and presents one frame.
    pub fn draw_frame<S: SwapchainApi>(
        &mut self,
        core: &mut RenderCore<D>,
        swapchain: &S,
        camera: &Camera,
    ) -> RenderResult<FrameStatus> {
        self.wait_for_frame()?;

        let Some((image_index, acquire_suboptimal)) = self.acquire_next_image(swapchain)? else {
            return Ok(FrameStatus::OutOfDate);
        };

        let slot = &self.slots[self.current_slot];
        let render_finished = self
            .render_finished
            .get(image_index as usize)
            .ok_or(RenderError::InvalidState {
                operation: "draw_frame",
                state: "the swapchain has more images than present semaphores",
            })?;

        let cmd = &slot.command_buffer;
        cmd.reset()?;
        cmd.begin()?;
        {
            let _label = LabelGuard::new(cmd, "Frame", colors::FRAME);
            let frame = FrameContext {
                camera,
                frame_number: self.frame_number,
            };
            let final_image = core.record_command_buffer(cmd, &frame)?;
            record_present_blit(
                cmd,
                final_image,
                swapchain.image(image_index as usize),
                swapchain.extent(),
            );
        }
        cmd.end()?;

        let command_buffers = [cmd.handle()];
        let wait_semaphores = [slot.image_available.handle()];
        let wait_stages = [vk::PipelineStageFlags::TRANSFER];
        let signal_semaphores = [render_finished.handle()];
        // Only once recording succeeded: a failed frame leaves the fence
        // signaled and the next wait returns.
        slot.in_flight.reset()?;
        self.device.queue_submit(&SubmitDesc {
            command_buffers: &command_buffers,
            wait_semaphores: &wait_semaphores,
            wait_stages: &wait_stages,
            signal_semaphores: &signal_semaphores,
            fence: slot.in_flight.handle(),
        })?;

        let status = match swapchain.present(image_index, render_finished.handle()) {
            Ok(false) if !acquire_suboptimal => FrameStatus::Presented,
            Ok(_) | Err(vk::Result::SUBOPTIMAL_KHR) => FrameStatus::Suboptimal,
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                debug!("Swapchain out of date during present");
                FrameStatus::OutOfDate
            }
            Err(e) => return Err(e.into()),
        };

        self.next_frame();
        Ok(status)
    }

    /// Blocks until the current slot's previous submission has completed.
    fn wait_for_frame(&self) -> RenderResult<()> {
        self.slots[self.current_slot].in_flight.wait(u64::MAX)?;
        Ok(())
    }

    /// Returns `None` when the swapchain is out of date.
    fn acquire_next_image<S: SwapchainApi>(&self, swapchain: &S) -> RenderResult<Option<(u32, bool)>> {
        let slot = &self.slots[self.current_slot];
        match swapchain.acquire_next_image(slot.image_available.handle()) {
            Ok(acquired) => Ok(Some(acquired)),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                debug!("Swapchain out of date during acquire");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn next_frame(&mut self) {
        self.current_slot = (self.current_slot + 1) % self.slots.len();
        self.frame_number += 1;
    }

    /// Waits until the device has finished all submitted work.
    pub fn wait_idle(&self) -> RenderResult<()> {
        self.device.wait_idle()?;
        Ok(())
    }

    #[inline]
    pub fn current_slot(&self) -> usize {
        self.current_slot
    }

    pub fn slot(&self, index: usize) -> Option<&FrameSlot<D>> {
        self.slots.get(index)
    }

    #[inline]
    pub fn frames_in_flight(&self) -> usize {
        self.slots.len()
    }

    /// Number of frames submitted so far.
    #[inline]
    pub fn frame_number(&self) -> u64 {
        self.frame_number
    }
}

/// Copies `source` onto the swapchain image, scaling with linear filtering.
///
/// The swapchain image's previous contents are discarded. `source` must be in
/// `TRANSFER_SRC_OPTIMAL` or `GENERAL` layout.
fn record_present_blit<D: DeviceApi>(
    cmd: &CommandBuffer<D>,
    source: &Image,
    target: vk::Image,
    target_extent: vk::Extent2D,
) {
    let _label = LabelGuard::new(cmd, "Blit", colors::BLIT);
    let range = color_layers(0, 1);
    let mut target_state = ImageState {
        layout: vk::ImageLayout::UNDEFINED,
        stage: vk::PipelineStageFlags::TRANSFER,
        access: vk::AccessFlags::empty(),
    };

    transition_state(
        cmd,
        target,
        &mut target_state,
        range,
        ImageState {
            layout: vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            stage: vk::PipelineStageFlags::TRANSFER,
            access: vk::AccessFlags::TRANSFER_WRITE,
        },
    );

    let subresource = vk::ImageSubresourceLayers {
        aspect_mask: vk::ImageAspectFlags::COLOR,
        mip_level: 0,
        base_array_layer: 0,
        layer_count: 1,
    };
    let source_extent = source.extent();
    let region = vk::ImageBlit {
        src_subresource: subresource,
        src_offsets: [
            vk::Offset3D::default(),
            vk::Offset3D {
                x: source_extent.width as i32,
                y: source_extent.height as i32,
                z: 1,
            },
        ],
        dst_subresource: subresource,
        dst_offsets: [
            vk::Offset3D::default(),
            vk::Offset3D {
                x: target_extent.width as i32,
                y: target_extent.height as i32,
                z: 1,
            },
        ],
    };
    cmd.blit_image(
        source.handle(),
        source.layout(),
        target,
        target_state.layout,
        &[region],
        vk::Filter::LINEAR,
    );

    transition_state(
        cmd,
        target,
        &mut target_state,
        range,
        ImageState {
            layout: vk::ImageLayout::PRESENT_SRC_KHR,
            stage: vk::PipelineStageFlags::BOTTOM_OF_PIPE,
            access: vk::AccessFlags::empty(),
        },
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use blackhole_rhi::mock::{MockCall, MockDevice, MockSwapchain};

    fn extent(width: u32, height: u32) -> vk::Extent2D {
        vk::Extent2D { width, height }
    }

    #[test]
    fn test_slots_start_signaled() {
        let device = Arc::new(MockDevice::new());
        let orchestrator = FrameOrchestrator::new(device.clone(), 3, 2).unwrap();
        assert_eq!(orchestrator.frames_in_flight(), 3);
        for index in 0..3 {
            let slot = orchestrator.slot(index).unwrap();
            assert!(device.is_fence_signaled(slot.in_flight().handle()));
        }
    }

    #[test]
    fn test_zero_frames_in_flight_still_has_one_slot() {
        let device = Arc::new(MockDevice::new());
        let orchestrator = FrameOrchestrator::new(device, 0, 2).unwrap();
        assert_eq!(orchestrator.frames_in_flight(), 1);
    }

    #[test]
    fn test_out_of_date_acquire_keeps_fence_signaled() {
        let device = Arc::new(MockDevice::new());
        let mut core = RenderCore::new(device.clone());
        core.init().unwrap();
        let mut orchestrator = FrameOrchestrator::new(device.clone(), 2, 2).unwrap();
        let swapchain = MockSwapchain::new(2, extent(64, 64));
        swapchain.set_out_of_date(true);

        let status = orchestrator
            .draw_frame(&mut core, &swapchain, &Camera::default())
            .unwrap();
        assert_eq!(status, FrameStatus::OutOfDate);
        assert_eq!(orchestrator.current_slot(), 0);
        let fence = orchestrator.slot(0).unwrap().in_flight().handle();
        assert!(device.is_fence_signaled(fence));
        assert!(!device
            .calls()
            .iter()
            .any(|call| matches!(call, MockCall::ResetFence(_))));
    }

    #[test]
    fn test_failed_recording_keeps_fence_signaled() {
        let device = Arc::new(MockDevice::new());
        // No passes: recording fails to find a final image.
        let mut core = RenderCore::new(device.clone());
        core.init().unwrap();
        let mut orchestrator = FrameOrchestrator::new(device.clone(), 1, 2).unwrap();
        let swapchain = MockSwapchain::new(2, extent(64, 64));

        let result = orchestrator.draw_frame(&mut core, &swapchain, &Camera::default());
        assert!(matches!(result, Err(RenderError::ResourceNotFound { .. })));
        let fence = orchestrator.slot(0).unwrap().in_flight().handle();
        assert!(device.is_fence_signaled(fence));
        assert!(!device
            .calls()
            .iter()
            .any(|call| matches!(call, MockCall::ResetFence(_))));
        assert_eq!(device.submit_count(), 0);

        // The next frame waits on the same fence and must not hang.
        let again = orchestrator.draw_frame(&mut core, &swapchain, &Camera::default());
        assert!(again.is_err());
    }

    #[test]
    fn test_rebuild_image_sync_replaces_semaphores() {
        let device = Arc::new(MockDevice::new());
        let mut orchestrator = FrameOrchestrator::new(device.clone(), 1, 2).unwrap();
        let before = device.live_object_count();
        orchestrator.rebuild_image_sync(4).unwrap();
        assert_eq!(device.live_object_count(), before + 2);
    }
}
