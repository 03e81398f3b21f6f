//! Cube map staging and upload against the in-memory device.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use ash::vk;

use blackhole_renderer::passes::common::Skybox;
use blackhole_renderer::{GpuAllocator, RenderError};
use blackhole_resources::{CUBE_FACE_NAMES, ResourceError};
use blackhole_rhi::command::CommandPool;
use blackhole_rhi::mock::{MockCall, MockDevice};

fn scratch_dir(name: &str) -> PathBuf {
    let dir = Path::new(env!("CARGO_TARGET_TMPDIR")).join(name);
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

fn write_faces(dir: &Path, size_of: impl Fn(usize) -> u32) {
    write_rect_faces(dir, |i| (size_of(i), size_of(i)));
}

fn write_rect_faces(dir: &Path, extent_of: impl Fn(usize) -> (u32, u32)) {
    for (i, name) in CUBE_FACE_NAMES.iter().enumerate() {
        let (width, height) = extent_of(i);
        let image =
            image::RgbaImage::from_pixel(width, height, image::Rgba([i as u8 * 10, 1, 2, 255]));
        image.save(dir.join(format!("{}.png", name))).unwrap();
    }
}

#[test]
fn test_cube_map_upload() {
    let dir = scratch_dir("skybox_upload_ok");
    write_faces(&dir, |_| 4);

    let device = Arc::new(MockDevice::new());
    let mut allocator = GpuAllocator::new(device.clone());
    let skybox = Skybox::declare(&mut allocator, "TestPass", &dir).unwrap();
    allocator.present_resources().unwrap();

    let cube = allocator.image(skybox.cube_map()).unwrap();
    assert_eq!(cube.name(), "TestPass::CubeMap");
    assert_eq!(cube.array_layers(), 6);
    assert_eq!(cube.extent().width, cube.extent().height);
    let staging = allocator.buffer(skybox.staging()).unwrap();
    assert_eq!(staging.size(), 6 * 4 * 4 * 4);
    assert!(staging.is_host_visible());

    let pool = CommandPool::new_transient(device.clone()).unwrap();
    let cmd = pool.allocate().unwrap();
    device.clear_calls();
    skybox.upload(&cmd, &mut allocator).unwrap();

    let calls = device.calls();
    let copies: Vec<_> = calls
        .iter()
        .filter_map(|call| match call {
            MockCall::CopyBufferToImage { layout, region_count, .. } => Some((*layout, *region_count)),
            _ => None,
        })
        .collect();
    assert_eq!(copies, vec![(vk::ImageLayout::TRANSFER_DST_OPTIMAL, 1); 6]);
    assert_eq!(calls.first(), Some(&MockCall::BeginLabel("TestPass::LoadCubeMap".to_string())));
    assert_eq!(calls.last(), Some(&MockCall::EndLabel));

    let barriers = device.barriers();
    assert_eq!(barriers.len(), 3);
    assert_eq!(barriers[0].src_stage, vk::PipelineStageFlags::HOST);
    assert_eq!(
        barriers[0].memory_barriers,
        vec![(vk::AccessFlags::HOST_WRITE, vk::AccessFlags::TRANSFER_READ)]
    );
    let to_read = barriers[2].image_barriers[0];
    assert_eq!(to_read.new_layout, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
    assert_eq!(to_read.layer_count, 6);

    let cube = allocator.image(skybox.cube_map()).unwrap();
    assert_eq!(cube.layout(), vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
    assert_eq!(cube.stage(), vk::PipelineStageFlags::COMPUTE_SHADER);

    // Each face lands at its layer's offset in the staging buffer.
    let staging = allocator.buffer(skybox.staging()).unwrap();
    let face_size = 4 * 4 * 4;
    for layer in 0..6u64 {
        let texel = device
            .read_memory(staging.memory(), staging.memory_offset() + layer * face_size, 4)
            .unwrap();
        assert_eq!(texel, vec![layer as u8 * 10, 1, 2, 255]);
    }
}

#[test]
fn test_cube_map_face_size_mismatch() {
    let dir = scratch_dir("skybox_upload_mismatch");
    write_faces(&dir, |_| 4);

    let device = Arc::new(MockDevice::new());
    let mut allocator = GpuAllocator::new(device.clone());
    let skybox = Skybox::declare(&mut allocator, "TestPass", &dir).unwrap();
    allocator.present_resources().unwrap();

    // Faces change size after the resources were sized.
    write_faces(&dir, |_| 8);

    let pool = CommandPool::new_transient(device.clone()).unwrap();
    let cmd = pool.allocate().unwrap();
    let result = skybox.upload(&cmd, &mut allocator);
    assert!(matches!(
        result,
        Err(RenderError::AssetLoadFailed(ResourceError::FaceSizeMismatch { .. }))
    ));
}

#[test]
fn test_missing_skybox_fails_at_declaration() {
    let dir = scratch_dir("skybox_upload_missing");

    let device = Arc::new(MockDevice::new());
    let mut allocator = GpuAllocator::new(device);
    assert!(matches!(
        Skybox::declare(&mut allocator, "TestPass", &dir),
        Err(RenderError::AssetLoadFailed(ResourceError::FileNotFound(_)))
    ));
}

#[test]
fn test_non_square_faces_fail_at_declaration() {
    let dir = scratch_dir("skybox_upload_non_square");
    write_rect_faces(&dir, |_| (8, 4));

    let device = Arc::new(MockDevice::new());
    let mut allocator = GpuAllocator::new(device.clone());
    assert!(matches!(
        Skybox::declare(&mut allocator, "TestPass", &dir),
        Err(RenderError::AssetLoadFailed(ResourceError::NonSquareFace {
            width: 8,
            height: 4,
            ..
        }))
    ));
    assert!(allocator.find_image("TestPass::CubeMap").is_err());
}
