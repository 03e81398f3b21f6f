//! Ordered pass list and the allocator they share.

use std::sync::Arc;

use tracing::{debug, info};

use blackhole_rhi::DeviceApi;
use blackhole_rhi::command::CommandBuffer;
use blackhole_rhi::device::Device;

use crate::allocator::GpuAllocator;
use crate::error::{RenderError, RenderResult};
use crate::pass::{FrameContext, Pass, PassState};
use crate::resource::Image;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum CoreState {
    Building,
    Ready,
    Destroyed,
}

impl CoreState {
    fn describe(self) -> &'static str {
        match self {
            CoreState::Building => "the render core is not initialized",
            CoreState::Ready => "the render core is initialized",
            CoreState::Destroyed => "the render core is destroyed",
        }
    }
}

struct RegisteredPass<D: DeviceApi> {
    pass: Box<dyn Pass<D>>,
    state: PassState,
}

/// Drives every registered pass through its lifecycle.
///
/// Passes are recorded in registration order; the last pass designates the
/// image the frame orchestrator presents.
pub struct RenderCore<D: DeviceApi = Device> {
    device: Arc<D>,
    allocator: GpuAllocator<D>,
    passes: Vec<RegisteredPass<D>>,
    state: CoreState,
}

impl<D: DeviceApi> RenderCore<D> {
    pub fn new(device: Arc<D>) -> Self {
        let allocator = GpuAllocator::new(Arc::clone(&device));
        Self {
            device,
            allocator,
            passes: Vec::new(),
            state: CoreState::Building,
        }
    }

    /// Appends a pass. Only allowed before [`init`](Self::init).
    pub fn add_pass(&mut self, pass: Box<dyn Pass<D>>) -> RenderResult<()> {
        self.expect_state(CoreState::Building, "add_pass")?;
        debug!("Registered pass '{}'", pass.name());
        self.passes.push(RegisteredPass {
            pass,
            state: PassState::Uninitialized,
        });
        Ok(())
    }

    /// Declares every pass's resources, binds them, then initializes every pass.
    pub fn init(&mut self) -> RenderResult<()> {
        self.expect_state(CoreState::Building, "init")?;

        for entry in &mut self.passes {
            entry.pass.allocate_resources(&mut self.allocator)?;
            entry.state = PassState::ResourcesAllocated;
        }

        self.allocator.present_resources()?;

        for entry in &mut self.passes {
            entry.pass.init(&self.device, &self.allocator)?;
            entry.state = PassState::Initialized;
            debug!("Pass '{}' initialized", entry.pass.name());
        }

        self.state = CoreState::Ready;
        info!("Render core ready with {} pass(es)", self.passes.len());
        Ok(())
    }

    /// Records every pass into `cmd` and returns the final image.
    ///
    /// The returned image is in whatever state the last pass left it.
    pub fn record_command_buffer(
        &mut self,
        cmd: &CommandBuffer<D>,
        frame: &FrameContext<'_>,
    ) -> RenderResult<&Image> {
        self.expect_state(CoreState::Ready, "record_command_buffer")?;

        for entry in &mut self.passes {
            if entry.state != PassState::Initialized {
                return Err(RenderError::InvalidState {
                    operation: "record_command_buffer",
                    state: "a pass is not initialized",
                });
            }
            entry.pass.record_command_buffer(cmd, &mut self.allocator, frame)?;
        }

        let last = self
            .passes
            .last()
            .ok_or_else(|| RenderError::ResourceNotFound {
                kind: "pass",
                name: "final pass".to_string(),
            })?;
        let id = last
            .pass
            .final_image()
            .ok_or_else(|| RenderError::ResourceNotFound {
                kind: "image",
                name: format!("final image of '{}'", last.pass.name()),
            })?;
        self.allocator.image(id)
    }

    /// Destroys every pass, then the allocator.
    ///
    /// The GPU must be idle. Calling it again is a no-op.
    pub fn destroy(&mut self) {
        if self.state == CoreState::Destroyed {
            return;
        }
        for entry in &mut self.passes {
            if entry.state != PassState::Destroyed {
                entry.pass.destroy();
                entry.state = PassState::Destroyed;
            }
        }
        self.allocator.destroy();
        self.state = CoreState::Destroyed;
        debug!("Render core destroyed");
    }

    pub fn allocator(&self) -> &GpuAllocator<D> {
        &self.allocator
    }

    pub fn pass_states(&self) -> Vec<PassState> {
        self.passes.iter().map(|entry| entry.state).collect()
    }

    pub fn is_ready(&self) -> bool {
        self.state == CoreState::Ready
    }

    #[inline]
    pub fn device(&self) -> &Arc<D> {
        &self.device
    }

    fn expect_state(&self, expected: CoreState, operation: &'static str) -> RenderResult<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(RenderError::InvalidState {
                operation,
                state: self.state.describe(),
            })
        }
    }
}

impl<D: DeviceApi> Drop for RenderCore<D> {
    fn drop(&mut self) {
        self.destroy();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use ash::vk;

    use super::*;
    use crate::allocator::MemoryPolicy;
    use crate::resource::{CreateImageInfo, ImageId};
    use blackhole_rhi::command::CommandPool;
    use blackhole_rhi::mock::MockDevice;
    use blackhole_scene::Camera;

    type Log = Arc<Mutex<Vec<String>>>;

    struct LoggingPass {
        name: String,
        log: Log,
        image: Option<ImageId>,
    }

    impl LoggingPass {
        fn boxed(name: &str, log: &Log) -> Box<dyn Pass<MockDevice>> {
            Box::new(Self {
                name: name.to_string(),
                log: Arc::clone(log),
                image: None,
            })
        }

        fn push(&self, event: &str) {
            self.log
                .lock()
                .unwrap()
                .push(format!("{}:{}", self.name, event));
        }
    }

    impl Pass<MockDevice> for LoggingPass {
        fn name(&self) -> &str {
            &self.name
        }

        fn allocate_resources(
            &mut self,
            allocator: &mut GpuAllocator<MockDevice>,
        ) -> RenderResult<()> {
            assert!(!allocator.is_presented());
            self.image = Some(allocator.add_image(
                &CreateImageInfo::new_2d(
                    format!("{}::Image", self.name),
                    8,
                    8,
                    vk::Format::R8G8B8A8_UNORM,
                    vk::ImageUsageFlags::STORAGE,
                ),
                MemoryPolicy::DEVICE_LOCAL,
            )?);
            self.push("allocate");
            Ok(())
        }

        fn init(
            &mut self,
            _device: &Arc<MockDevice>,
            allocator: &GpuAllocator<MockDevice>,
        ) -> RenderResult<()> {
            assert!(allocator.is_presented());
            self.push("init");
            Ok(())
        }

        fn record_command_buffer(
            &mut self,
            _cmd: &CommandBuffer<MockDevice>,
            _allocator: &mut GpuAllocator<MockDevice>,
            _frame: &FrameContext<'_>,
        ) -> RenderResult<()> {
            self.push("record");
            Ok(())
        }

        fn destroy(&mut self) {
            self.push("destroy");
        }

        fn final_image(&self) -> Option<ImageId> {
            self.image
        }
    }

    #[test]
    fn test_lifecycle_order() {
        let device = Arc::new(MockDevice::new());
        let log: Log = Arc::default();
        let mut core = RenderCore::new(device.clone());
        core.add_pass(LoggingPass::boxed("a", &log)).unwrap();
        core.add_pass(LoggingPass::boxed("b", &log)).unwrap();
        core.init().unwrap();

        let pool = CommandPool::new_transient(device.clone()).unwrap();
        let cmd = pool.allocate().unwrap();
        let camera = Camera::default();
        for frame_number in 0..2 {
            let frame = FrameContext {
                camera: &camera,
                frame_number,
            };
            let image = core.record_command_buffer(&cmd, &frame).unwrap();
            assert_eq!(image.name(), "b::Image");
        }
        core.destroy();
        core.destroy();

        let log = log.lock().unwrap().clone();
        assert_eq!(
            log,
            vec![
                "a:allocate",
                "b:allocate",
                "a:init",
                "b:init",
                "a:record",
                "b:record",
                "a:record",
                "b:record",
                "a:destroy",
                "b:destroy",
            ]
        );
        assert_eq!(core.pass_states(), vec![PassState::Destroyed; 2]);
        assert_eq!(device.live_object_count(), 1);
    }

    #[test]
    fn test_misuse_is_rejected() {
        let device = Arc::new(MockDevice::new());
        let log: Log = Arc::default();
        let mut core = RenderCore::new(device.clone());
        core.add_pass(LoggingPass::boxed("a", &log)).unwrap();

        let pool = CommandPool::new_transient(device).unwrap();
        let cmd = pool.allocate().unwrap();
        let camera = Camera::default();
        let frame = FrameContext {
            camera: &camera,
            frame_number: 0,
        };
        assert!(matches!(
            core.record_command_buffer(&cmd, &frame),
            Err(RenderError::InvalidState { .. })
        ));

        core.init().unwrap();
        assert!(matches!(
            core.add_pass(LoggingPass::boxed("late", &log)),
            Err(RenderError::InvalidState { .. })
        ));
        assert!(matches!(core.init(), Err(RenderError::InvalidState { .. })));
    }

    #[test]
    fn test_missing_final_image() {
        struct Silent;

        impl Pass<MockDevice> for Silent {
            fn name(&self) -> &str {
                "silent"
            }
            fn allocate_resources(&mut self, _: &mut GpuAllocator<MockDevice>) -> RenderResult<()> {
                Ok(())
            }
            fn init(&mut self, _: &Arc<MockDevice>, _: &GpuAllocator<MockDevice>) -> RenderResult<()> {
                Ok(())
            }
            fn record_command_buffer(
                &mut self,
                _: &CommandBuffer<MockDevice>,
                _: &mut GpuAllocator<MockDevice>,
                _: &FrameContext<'_>,
            ) -> RenderResult<()> {
                Ok(())
            }
            fn destroy(&mut self) {}
        }

        let device = Arc::new(MockDevice::new());
        let mut core = RenderCore::new(device.clone());
        core.add_pass(Box::new(Silent)).unwrap();
        core.init().unwrap();

        let pool = CommandPool::new_transient(device).unwrap();
        let cmd = pool.allocate().unwrap();
        let camera = Camera::default();
        let frame = FrameContext {
            camera: &camera,
            frame_number: 0,
        };
        assert!(matches!(
            core.record_command_buffer(&cmd, &frame),
            Err(RenderError::ResourceNotFound { kind: "image", .. })
        ));
    }
}
