//! Black Hole - Main Entry Point
//!
//! Opens a window, builds the Vulkan controller for the configured render
//! variant and drives it once per event-loop iteration.

use anyhow::Result;
use tracing::{error, info};
use winit::application::ApplicationHandler;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::keyboard::{KeyCode, PhysicalKey};
use winit::window::WindowId;

use blackhole_core::{Config, FpsCounter, Timer};
use blackhole_platform::{InputState, Window};
use blackhole_renderer::VulkanController;

struct App {
    config: Config,
    // Dropped before the window: the surface must not outlive it.
    controller: Option<VulkanController>,
    window: Option<Window>,
    input: InputState,
    timer: Timer,
    fps: FpsCounter,
    /// First fatal error, reported by `main` after the loop exits.
    failure: Option<anyhow::Error>,
}

impl App {
    fn new(config: Config) -> Self {
        Self {
            config,
            controller: None,
            window: None,
            input: InputState::new(),
            timer: Timer::new(),
            fps: FpsCounter::new(),
            failure: None,
        }
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, err: anyhow::Error) {
        error!("{:#}", err);
        self.failure.get_or_insert(err);
        event_loop.exit();
    }

    fn redraw(&mut self, event_loop: &ActiveEventLoop) {
        let delta = self.timer.delta_secs();
        let Some(controller) = self.controller.as_mut() else {
            return;
        };

        controller.update(&self.input.snapshot(), delta);
        match controller.draw_frame() {
            Ok(()) => {
                self.fps.frame();
            }
            Err(e) => self.fail(event_loop, anyhow::Error::new(e).context("Failed to draw frame")),
        }
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let window = match Window::new(event_loop, &self.config.window) {
            Ok(window) => window,
            Err(e) => {
                self.fail(event_loop, anyhow::Error::new(e).context("Failed to create window"));
                return;
            }
        };

        match VulkanController::new(&window, &self.config) {
            Ok(controller) => {
                info!("Initialization complete, entering main loop");
                self.controller = Some(controller);
                self.window = Some(window);
                self.timer.reset();
            }
            Err(e) => {
                self.fail(event_loop, anyhow::Error::new(e).context("Failed to create controller"));
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                info!("Close requested, shutting down");
                event_loop.exit();
            }
            WindowEvent::Resized(size) => {
                if let Some(ref mut window) = self.window {
                    window.resize(size.width, size.height);
                }
                if let Some(ref mut controller) = self.controller {
                    controller.resize(size.width, size.height);
                }
            }
            WindowEvent::Focused(false) => self.input.clear(),
            WindowEvent::RedrawRequested => self.redraw(event_loop),
            WindowEvent::KeyboardInput { event, .. } => {
                if let PhysicalKey::Code(key) = event.physical_key {
                    if event.state.is_pressed() {
                        self.input.on_key_pressed(key);
                    } else {
                        self.input.on_key_released(key);
                    }
                }
                if self.input.is_key_just_pressed(KeyCode::Escape) {
                    info!("Escape pressed, shutting down");
                    event_loop.exit();
                }
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        self.input.begin_frame();
        if let Some(ref window) = self.window
            && !window.is_minimized()
        {
            window.request_redraw();
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(controller) = self.controller.take() {
            info!("Exiting after {} frames", controller.frame_number());
        }
    }
}

fn main() -> Result<()> {
    blackhole_core::init_logging();
    info!("Starting Black Hole");

    let config = Config::load()?;
    info!("Render variant: {:?}", config.render.variant);

    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = App::new(config);
    event_loop.run_app(&mut app)?;

    match app.failure.take() {
        Some(err) => Err(err),
        None => Ok(()),
    }
}
