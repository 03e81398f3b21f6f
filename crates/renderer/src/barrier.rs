//! Image and memory barriers.
//!
//! Every image transition goes through [`transition_state`], which builds the
//! barrier from the tracked [`ImageState`] and then overwrites that state with
//! the destination. Callers never write layouts by hand, so the recorded
//! state always matches the last barrier in the command stream.

use ash::vk;

use blackhole_rhi::DeviceApi;
use blackhole_rhi::command::CommandBuffer;

use crate::resource::{Image, ImageState};

/// Records a transition of `image` to `dst` and updates the tracked state.
///
/// `range` defaults to every mip level and layer of the image.
pub fn image_barrier<D: DeviceApi>(
    cmd: &CommandBuffer<D>,
    image: &mut Image,
    dst: ImageState,
    range: Option<vk::ImageSubresourceRange>,
) {
    let range = range.unwrap_or_else(|| image.full_range());
    transition_state(cmd, image.handle, &mut image.state, range, dst);
}

/// Records a transition of a raw image whose state is tracked by the caller.
pub fn transition_state<D: DeviceApi>(
    cmd: &CommandBuffer<D>,
    image: vk::Image,
    state: &mut ImageState,
    range: vk::ImageSubresourceRange,
    dst: ImageState,
) {
    let barrier = vk::ImageMemoryBarrier::default()
        .src_access_mask(state.access)
        .dst_access_mask(dst.access)
        .old_layout(state.layout)
        .new_layout(dst.layout)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image)
        .subresource_range(range);

    cmd.pipeline_barrier(
        state.stage,
        dst.stage,
        vk::DependencyFlags::BY_REGION,
        &[],
        &[barrier],
    );

    *state = dst;
}

/// Records a global memory barrier.
pub fn memory_barrier<D: DeviceApi>(
    cmd: &CommandBuffer<D>,
    src_stage: vk::PipelineStageFlags,
    src_access: vk::AccessFlags,
    dst_stage: vk::PipelineStageFlags,
    dst_access: vk::AccessFlags,
) {
    let barrier = vk::MemoryBarrier::default()
        .src_access_mask(src_access)
        .dst_access_mask(dst_access);
    cmd.pipeline_barrier(
        src_stage,
        dst_stage,
        vk::DependencyFlags::BY_REGION,
        &[barrier],
        &[],
    );
}

/// Forgets the contents of `image`; the next barrier starts from `UNDEFINED`.
///
/// Used before an image is fully overwritten, where keeping the old
/// contents would only cost a layout conversion.
pub fn discard_contents(image: &mut Image) {
    image.state.layout = vk::ImageLayout::UNDEFINED;
}

/// Color subresource range covering `layer_count` layers from `base_layer`.
pub fn color_layers(base_layer: u32, layer_count: u32) -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange {
        aspect_mask: vk::ImageAspectFlags::COLOR,
        base_mip_level: 0,
        level_count: 1,
        base_array_layer: base_layer,
        layer_count,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::allocator::{GpuAllocator, MemoryPolicy};
    use crate::resource::CreateImageInfo;
    use blackhole_rhi::command::CommandPool;
    use blackhole_rhi::mock::MockDevice;

    const STORAGE_WRITE: ImageState = ImageState {
        layout: vk::ImageLayout::GENERAL,
        stage: vk::PipelineStageFlags::COMPUTE_SHADER,
        access: vk::AccessFlags::SHADER_WRITE,
    };

    #[test]
    fn test_barrier_uses_and_updates_tracked_state() {
        let device = Arc::new(MockDevice::new());
        let mut allocator = GpuAllocator::new(device.clone());
        let id = allocator
            .add_image(
                &CreateImageInfo::new_2d(
                    "target",
                    32,
                    32,
                    vk::Format::R8G8B8A8_UNORM,
                    vk::ImageUsageFlags::STORAGE,
                ),
                MemoryPolicy::DEVICE_LOCAL,
            )
            .unwrap();
        allocator.present_resources().unwrap();

        let pool = CommandPool::new_transient(device.clone()).unwrap();
        let cmd = pool.allocate().unwrap();
        device.clear_calls();

        let image = allocator.image_mut(id).unwrap();
        image_barrier(&cmd, image, STORAGE_WRITE, None);
        assert_eq!(image.state(), STORAGE_WRITE);

        let barriers = device.barriers();
        assert_eq!(barriers.len(), 1);
        let barrier = &barriers[0];
        assert_eq!(barrier.src_stage, vk::PipelineStageFlags::TOP_OF_PIPE);
        assert_eq!(barrier.dst_stage, vk::PipelineStageFlags::COMPUTE_SHADER);
        assert_eq!(barrier.dependency_flags, vk::DependencyFlags::BY_REGION);
        assert_eq!(barrier.image_barriers[0].old_layout, vk::ImageLayout::UNDEFINED);
        assert_eq!(barrier.image_barriers[0].new_layout, vk::ImageLayout::GENERAL);
        assert_eq!(barrier.image_barriers[0].src_access, vk::AccessFlags::empty());
    }

    #[test]
    fn test_transition_of_caller_tracked_state() {
        let device = Arc::new(MockDevice::new());
        let pool = CommandPool::new_transient(device.clone()).unwrap();
        let cmd = pool.allocate().unwrap();

        let mut state = STORAGE_WRITE;
        let range = color_layers(0, 1);
        transition_state(
            &cmd,
            vk::Image::null(),
            &mut state,
            range,
            ImageState {
                layout: vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                stage: vk::PipelineStageFlags::TRANSFER,
                access: vk::AccessFlags::TRANSFER_READ,
            },
        );

        let barrier = &device.barriers()[0];
        assert_eq!(barrier.src_stage, vk::PipelineStageFlags::COMPUTE_SHADER);
        assert_eq!(barrier.image_barriers[0].src_access, vk::AccessFlags::SHADER_WRITE);
        assert_eq!(state.layout, vk::ImageLayout::TRANSFER_SRC_OPTIMAL);
    }

    #[test]
    fn test_discard_contents_only_resets_layout() {
        let device = Arc::new(MockDevice::new());
        let mut allocator = GpuAllocator::new(device);
        let id = allocator
            .add_image(
                &CreateImageInfo::new_2d(
                    "target",
                    16,
                    16,
                    vk::Format::R8G8B8A8_UNORM,
                    vk::ImageUsageFlags::STORAGE,
                ),
                MemoryPolicy::DEVICE_LOCAL,
            )
            .unwrap();
        allocator.present_resources().unwrap();

        let image = allocator.image_mut(id).unwrap();
        image.state = STORAGE_WRITE;
        discard_contents(image);
        assert_eq!(image.layout(), vk::ImageLayout::UNDEFINED);
        assert_eq!(image.stage(), vk::PipelineStageFlags::COMPUTE_SHADER);
        assert_eq!(image.access(), vk::AccessFlags::SHADER_WRITE);
    }

    #[test]
    fn test_memory_barrier_records_access_pair() {
        let device = Arc::new(MockDevice::new());
        let pool = CommandPool::new_transient(device.clone()).unwrap();
        let cmd = pool.allocate().unwrap();

        memory_barrier(
            &cmd,
            vk::PipelineStageFlags::HOST,
            vk::AccessFlags::HOST_WRITE,
            vk::PipelineStageFlags::TRANSFER,
            vk::AccessFlags::TRANSFER_READ,
        );

        let barrier = &device.barriers()[0];
        assert_eq!(
            barrier.memory_barriers,
            vec![(vk::AccessFlags::HOST_WRITE, vk::AccessFlags::TRANSFER_READ)]
        );
        assert!(barrier.image_barriers.is_empty());
    }
}
