//! Device bootstrap and the per-window frame loop.
//!
//! [`VulkanController`] owns every Vulkan object created for a window, in
//! reverse destruction order:
//!
//! 1. Wait for the device to go idle
//! 2. Destroy the frame orchestrator (fences, semaphores, command pools)
//! 3. Destroy the passes and the allocator's resources
//! 4. Destroy the swapchain
//! 5. Destroy the device
//! 6. Destroy the surface
//! 7. Destroy the instance

use std::mem::ManuallyDrop;
use std::sync::Arc;

use tracing::{debug, error, info};

use blackhole_core::Config;
use blackhole_platform::{ControlSnapshot, Surface, Window};
use blackhole_rhi::device::Device;
use blackhole_rhi::instance::Instance;
use blackhole_rhi::physical_device::{DeviceRequirements, select_physical_device};
use blackhole_rhi::swapchain::Swapchain;
use blackhole_rhi::{RhiError, SwapchainApi};
use blackhole_scene::Camera;

use crate::core::RenderCore;
use crate::error::RenderResult;
use crate::frame::{FrameOrchestrator, FrameStatus};
use crate::passes::{BlackHolePass, BlackHolePrecomputePass, BlackHoleSettings};

/// Builds the render core for `config` and drives it every frame.
pub struct VulkanController {
    orchestrator: ManuallyDrop<FrameOrchestrator>,
    core: ManuallyDrop<RenderCore>,
    swapchain: ManuallyDrop<Swapchain>,
    device: ManuallyDrop<Arc<Device>>,
    surface: ManuallyDrop<Surface>,
    instance: ManuallyDrop<Instance>,

    camera: Camera,
    /// Set by [`resize`](Self::resize), consumed before the next acquire.
    framebuffer_resized: bool,
    width: u32,
    height: u32,
}

impl VulkanController {
    /// Creates the instance, device, swapchain, passes and frame slots.
    ///
    /// # Errors
    ///
    /// Returns an error if any Vulkan object cannot be created, no GPU meets
    /// the configured variant's requirements, or an asset fails to load.
    pub fn new(window: &Window, config: &Config) -> RenderResult<Self> {
        let (width, height) = window.extent();
        info!("Initializing Vulkan controller ({}x{})", width, height);

        let surface_extensions = window
            .required_extensions()
            .map_err(|e| RhiError::SurfaceError(e.to_string()))?;
        let instance = Instance::new(
            &config.window.title,
            &surface_extensions,
            config.render.validation,
        )?;

        let surface = window
            .create_surface(instance.entry(), instance.handle())
            .map_err(|e| RhiError::SurfaceError(e.to_string()))?;

        let requirements = DeviceRequirements {
            ray_query: config.render.variant.needs_ray_query(),
        };
        let physical_device_info = select_physical_device(
            instance.handle(),
            surface.handle(),
            surface.loader(),
            requirements,
        )?;
        info!("Using GPU: {:?}", physical_device_info);

        let device = Device::new(&instance, &physical_device_info)?;
        let swapchain = Swapchain::new(&instance, Arc::clone(&device), surface.handle(), width, height)?;

        let settings = BlackHoleSettings::from_config(config);
        let mut core = RenderCore::new(Arc::clone(&device));
        if settings.variant.needs_precompute() {
            core.add_pass(Box::new(BlackHolePrecomputePass::new(
                config.render.shader_dir.clone(),
            )))?;
        }
        core.add_pass(Box::new(BlackHolePass::new(settings)))?;
        core.init()?;

        let orchestrator = FrameOrchestrator::new(
            Arc::clone(&device),
            config.render.frames_in_flight as usize,
            swapchain.image_count(),
        )?;

        info!(
            "Controller ready: {:?}, {} swapchain images, {} frame(s) in flight",
            config.render.variant,
            swapchain.image_count(),
            orchestrator.frames_in_flight()
        );

        Ok(Self {
            orchestrator: ManuallyDrop::new(orchestrator),
            core: ManuallyDrop::new(core),
            swapchain: ManuallyDrop::new(swapchain),
            device: ManuallyDrop::new(device),
            surface: ManuallyDrop::new(surface),
            instance: ManuallyDrop::new(instance),
            camera: Camera::from_config(&config.camera),
            framebuffer_resized: false,
            width,
            height,
        })
    }

    /// Notes a new framebuffer size. The swapchain is rebuilt lazily.
    pub fn resize(&mut self, width: u32, height: u32) {
        if width == self.width && height == self.height {
            return;
        }
        debug!(
            "Resize triggered: {}x{} -> {}x{}",
            self.width, self.height, width, height
        );
        self.width = width;
        self.height = height;
        self.framebuffer_resized = true;
    }

    /// Moves the camera from this frame's controls.
    pub fn update(&mut self, controls: &ControlSnapshot, delta_time: f32) {
        self.camera.update(controls, delta_time);
    }

    /// Draws one frame. Zero-sized windows are skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if recording, submission or swapchain recreation
    /// fails, including [`RenderError::DeviceLost`](crate::RenderError::DeviceLost).
    pub fn draw_frame(&mut self) -> RenderResult<()> {
        if self.width == 0 || self.height == 0 {
            return Ok(());
        }

        if self.framebuffer_resized {
            debug!("Resize requested, recreating swapchain before acquire");
            self.recreate_swapchain()?;
        }

        let status = self
            .orchestrator
            .draw_frame(&mut self.core, &*self.swapchain, &self.camera)?;

        if status.needs_recreate() {
            debug!("Swapchain reported {:?}, recreating", status);
            self.recreate_swapchain()?;
        }
        Ok(())
    }

    fn recreate_swapchain(&mut self) -> RenderResult<()> {
        self.swapchain.recreate(self.width, self.height)?;
        self.orchestrator
            .rebuild_image_sync(self.swapchain.image_count())?;
        self.framebuffer_resized = false;
        Ok(())
    }

    #[inline]
    pub fn camera(&self) -> &Camera {
        &self.camera
    }

    #[inline]
    pub fn frame_number(&self) -> u64 {
        self.orchestrator.frame_number()
    }

    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }
}

impl Drop for VulkanController {
    fn drop(&mut self) {
        if let Err(e) = self.orchestrator.wait_idle() {
            error!("Failed to wait for device idle during controller drop: {}", e);
        }

        self.core.destroy();

        // SAFETY: every field is dropped exactly once, children before the
        // objects they were created from.
        unsafe {
            ManuallyDrop::drop(&mut self.orchestrator);
            ManuallyDrop::drop(&mut self.core);
            ManuallyDrop::drop(&mut self.swapchain);
            ManuallyDrop::drop(&mut self.device);
            ManuallyDrop::drop(&mut self.surface);
            ManuallyDrop::drop(&mut self.instance);
        }

        info!("Controller destroyed");
    }
}
