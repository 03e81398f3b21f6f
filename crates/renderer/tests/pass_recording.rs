//! Per-frame recording of the compute passes against the in-memory device.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use ash::vk;

use blackhole_renderer::passes::common::ProgramHandles;
use blackhole_renderer::passes::{
    BlackHoleRecorder, BlackHoleSettings, BlackHoleVariant, PrecomputeRecorder,
};
use blackhole_renderer::{FrameContext, GpuAllocator, WarmUp};
use blackhole_resources::CUBE_FACE_NAMES;
use blackhole_rhi::command::CommandPool;
use blackhole_rhi::mock::{MockCall, MockDevice, MockImageBarrier};
use blackhole_scene::Camera;

const EXTENT: (u32, u32) = (100, 60);

fn skybox_dir(name: &str) -> PathBuf {
    let dir = Path::new(env!("CARGO_TARGET_TMPDIR")).join(name);
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();
    for name in CUBE_FACE_NAMES {
        image::RgbaImage::from_pixel(4, 4, image::Rgba([9, 8, 7, 255]))
            .save(dir.join(format!("{}.png", name)))
            .unwrap();
    }
    dir
}

fn fake_program() -> ProgramHandles {
    ProgramHandles {
        pipelines: vec![vk::Pipeline::null(); 2],
        ..Default::default()
    }
}

struct Frame {
    calls: Vec<MockCall>,
    builds: usize,
}

impl Frame {
    fn copies(&self) -> usize {
        self.calls
            .iter()
            .filter(|call| matches!(call, MockCall::CopyBufferToImage { .. }))
            .count()
    }

    fn dispatches(&self) -> Vec<[u32; 3]> {
        self.calls
            .iter()
            .filter_map(|call| match call {
                MockCall::Dispatch(groups) => Some(*groups),
                _ => None,
            })
            .collect()
    }

    /// Call-log position and transition of every barrier touching `image`.
    fn transitions_of(&self, image: vk::Image) -> Vec<(usize, MockImageBarrier)> {
        self.calls
            .iter()
            .enumerate()
            .filter_map(|(i, call)| match call {
                MockCall::PipelineBarrier(barrier) => barrier
                    .image_barriers
                    .iter()
                    .find(|b| b.image == image)
                    .map(|b| (i, *b)),
                _ => None,
            })
            .collect()
    }

    fn position(&self, call: &MockCall) -> Option<usize> {
        self.calls.iter().position(|c| c == call)
    }
}

struct Harness {
    device: Arc<MockDevice>,
    allocator: GpuAllocator<MockDevice>,
    precompute: PrecomputeRecorder,
    black_hole: BlackHoleRecorder,
    camera: Camera,
}

impl Harness {
    fn new(dir_name: &str) -> Self {
        let device = Arc::new(MockDevice::new());
        let mut allocator = GpuAllocator::new(device.clone());
        let settings = BlackHoleSettings {
            variant: BlackHoleVariant::Precomputed,
            extent: EXTENT,
            skybox_dir: skybox_dir(dir_name),
            shader_dir: PathBuf::new(),
            meshes: Vec::new(),
        };
        let mut precompute = PrecomputeRecorder::declare(&mut allocator).unwrap();
        let mut black_hole = BlackHoleRecorder::declare(&mut allocator, &settings).unwrap();
        allocator.present_resources().unwrap();

        precompute.set_program(fake_program());
        black_hole.set_program(fake_program(), 0);

        Self {
            device,
            allocator,
            precompute,
            black_hole,
            camera: Camera::default(),
        }
    }

    fn record_frame(&mut self, frame_number: u64) -> Frame {
        let pool = CommandPool::new_transient(self.device.clone()).unwrap();
        let cmd = pool.allocate().unwrap();
        let frame = FrameContext {
            camera: &self.camera,
            frame_number,
        };

        self.device.clear_calls();
        let mut builds = 0;
        self.precompute.record(&cmd, &mut self.allocator).unwrap();
        self.black_hole
            .record(&cmd, &mut self.allocator, &frame, |_, _| {
                builds += 1;
                Ok(())
            })
            .unwrap();

        Frame {
            calls: self.device.calls(),
            builds,
        }
    }

    fn final_image_handle(&self) -> vk::Image {
        self.allocator
            .image(self.black_hole.final_image())
            .unwrap()
            .handle()
    }

    fn assert_final_image_ready_for_blit(&self) {
        let image = self.allocator.image(self.black_hole.final_image()).unwrap();
        assert_eq!(image.layout(), vk::ImageLayout::TRANSFER_SRC_OPTIMAL);
        assert_eq!(image.stage(), vk::PipelineStageFlags::TRANSFER);
        assert_eq!(image.access(), vk::AccessFlags::TRANSFER_READ);
    }
}

#[test]
fn test_first_frame_warms_up_once() {
    let mut harness = Harness::new("pass_recording_warm_up");

    let first = harness.record_frame(0);
    assert_eq!(first.copies(), 6);
    assert_eq!(first.builds, 1);
    assert_eq!(
        first.dispatches(),
        vec![[32, 32, 1], [4, 4, 64], [EXTENT.0.div_ceil(16), EXTENT.1.div_ceil(16), 1]]
    );
    assert_eq!(harness.precompute.warm_up(), WarmUp::WarmedUp);
    assert_eq!(harness.black_hole.warm_up(), WarmUp::WarmedUp);
    harness.assert_final_image_ready_for_blit();

    let second = harness.record_frame(1);
    assert_eq!(second.copies(), 0);
    assert_eq!(second.builds, 0);
    assert_eq!(second.dispatches(), vec![[7, 4, 1]]);
    harness.assert_final_image_ready_for_blit();
}

#[test]
fn test_final_image_transitions_around_dispatch() {
    let mut harness = Harness::new("pass_recording_transitions");
    let final_image = harness.final_image_handle();

    for frame_number in 0..2 {
        let frame = harness.record_frame(frame_number);
        let transitions = frame.transitions_of(final_image);
        assert_eq!(transitions.len(), 2, "frame {}", frame_number);

        // Previous contents are discarded every frame.
        let (to_write_at, to_write) = transitions[0];
        assert_eq!(to_write.old_layout, vk::ImageLayout::UNDEFINED);
        assert_eq!(to_write.new_layout, vk::ImageLayout::GENERAL);
        assert_eq!(to_write.dst_access, vk::AccessFlags::SHADER_WRITE);

        let (to_blit_at, to_blit) = transitions[1];
        assert_eq!(to_blit.old_layout, vk::ImageLayout::GENERAL);
        assert_eq!(to_blit.new_layout, vk::ImageLayout::TRANSFER_SRC_OPTIMAL);
        assert_eq!(to_blit.src_access, vk::AccessFlags::SHADER_WRITE);
        assert_eq!(to_blit.dst_access, vk::AccessFlags::TRANSFER_READ);

        let dispatch_at = frame.position(&MockCall::Dispatch([7, 4, 1])).unwrap();
        assert!(to_write_at < dispatch_at && dispatch_at < to_blit_at);
        if let MockCall::PipelineBarrier(barrier) = &frame.calls[to_write_at] {
            assert_eq!(barrier.dst_stage, vk::PipelineStageFlags::COMPUTE_SHADER);
        }
        if let MockCall::PipelineBarrier(barrier) = &frame.calls[to_blit_at] {
            assert_eq!(barrier.dst_stage, vk::PipelineStageFlags::TRANSFER);
        }
    }
}

#[test]
fn test_camera_is_pushed_before_dispatch() {
    let mut harness = Harness::new("pass_recording_push");
    let frame = harness.record_frame(0);

    let pushes: Vec<_> = frame
        .calls
        .iter()
        .enumerate()
        .filter_map(|(i, call)| match call {
            MockCall::PushConstants { bytes, .. } => Some((i, bytes.len())),
            _ => None,
        })
        .collect();
    assert_eq!(pushes.len(), 1);
    assert_eq!(pushes[0].1, 32);

    let dispatch_at = frame.position(&MockCall::Dispatch([7, 4, 1])).unwrap();
    assert!(pushes[0].0 < dispatch_at);
    assert_eq!(frame.calls.first(), Some(&MockCall::BeginLabel("BlackHolePrecomputePass".to_string())));
}

#[test]
fn test_recording_without_program_fails() {
    let device = Arc::new(MockDevice::new());
    let mut allocator = GpuAllocator::new(device.clone());
    let mut precompute = PrecomputeRecorder::declare(&mut allocator).unwrap();
    allocator.present_resources().unwrap();

    let pool = CommandPool::new_transient(device.clone()).unwrap();
    let cmd = pool.allocate().unwrap();
    assert!(precompute.record(&cmd, &mut allocator).is_err());
    assert_eq!(precompute.warm_up(), WarmUp::Cold);
    assert!(device.dispatches().is_empty());
}
