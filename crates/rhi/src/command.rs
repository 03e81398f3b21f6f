//! Command pool and command buffer management.
//!
//! - [`CommandPool`] owns a VkCommandPool on the render queue family
//! - [`CommandBuffer`] wraps a VkCommandBuffer with recording helpers
//!
//! Recording helpers go through [`DeviceApi`] and work with any device.
//! Acceleration structure builds need the real [`Device`] and live in a
//! dedicated `impl CommandBuffer<Device>` block.

use std::sync::Arc;

use ash::vk;
use tracing::debug;

use crate::api::DeviceApi;
use crate::device::Device;
use crate::error::RhiResult;

/// Vulkan command pool wrapper.
///
/// Command pools are not thread-safe; each frame slot owns its own.
pub struct CommandPool<D: DeviceApi = Device> {
    device: Arc<D>,
    pool: vk::CommandPool,
}

impl<D: DeviceApi> CommandPool<D> {
    /// Creates a command pool on the render queue family.
    ///
    /// # Errors
    ///
    /// Returns an error if pool creation fails.
    pub fn new(device: Arc<D>, flags: vk::CommandPoolCreateFlags) -> RhiResult<Self> {
        let pool = device.create_command_pool(flags)?;
        debug!("Created command pool ({:?})", flags);
        Ok(Self { device, pool })
    }

    /// Creates a pool whose buffers are short-lived and individually
    /// resettable, as used by frame slots.
    pub fn new_transient(device: Arc<D>) -> RhiResult<Self> {
        Self::new(
            device,
            vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER
                | vk::CommandPoolCreateFlags::TRANSIENT,
        )
    }

    /// Returns the command pool handle.
    #[inline]
    pub fn handle(&self) -> vk::CommandPool {
        self.pool
    }

    /// Allocates one primary command buffer.
    pub fn allocate(&self) -> RhiResult<CommandBuffer<D>> {
        let mut buffers = self.device.allocate_command_buffers(self.pool, 1)?;
        let buffer = buffers.pop().ok_or(vk::Result::ERROR_OUT_OF_HOST_MEMORY)?;
        Ok(CommandBuffer::from_handle(Arc::clone(&self.device), buffer))
    }

    /// Resets every command buffer allocated from this pool.
    pub fn reset(&self) -> RhiResult<()> {
        self.device.reset_command_pool(self.pool)
    }

    /// Returns a reference to the device.
    #[inline]
    pub fn device(&self) -> &Arc<D> {
        &self.device
    }
}

impl<D: DeviceApi> Drop for CommandPool<D> {
    fn drop(&mut self) {
        // Command buffers allocated from the pool are freed with it.
        self.device.destroy_command_pool(self.pool);
        debug!("Command pool destroyed");
    }
}

/// Vulkan command buffer wrapper.
///
/// The buffer is freed together with its pool.
pub struct CommandBuffer<D: DeviceApi = Device> {
    device: Arc<D>,
    buffer: vk::CommandBuffer,
}

impl<D: DeviceApi> CommandBuffer<D> {
    /// Wraps an existing command buffer handle.
    #[inline]
    pub fn from_handle(device: Arc<D>, buffer: vk::CommandBuffer) -> Self {
        Self { device, buffer }
    }

    /// Returns the raw Vulkan command buffer handle.
    #[inline]
    pub fn handle(&self) -> vk::CommandBuffer {
        self.buffer
    }

    /// Returns the device this buffer records for.
    #[inline]
    pub fn device(&self) -> &Arc<D> {
        &self.device
    }

    // =========================================================================
    // Recording Control
    // =========================================================================

    /// Begins recording for a single submission.
    pub fn begin(&self) -> RhiResult<()> {
        self.device
            .begin_command_buffer(self.buffer, vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT)
    }

    /// Ends recording. The buffer is ready for submission afterwards.
    pub fn end(&self) -> RhiResult<()> {
        self.device.end_command_buffer(self.buffer)
    }

    /// Resets the buffer to the initial state so it can be re-recorded.
    pub fn reset(&self) -> RhiResult<()> {
        self.device.reset_command_buffer(self.buffer)
    }

    // =========================================================================
    // Synchronization
    // =========================================================================

    /// Records a pipeline barrier.
    pub fn pipeline_barrier(
        &self,
        src_stage: vk::PipelineStageFlags,
        dst_stage: vk::PipelineStageFlags,
        dependency_flags: vk::DependencyFlags,
        memory_barriers: &[vk::MemoryBarrier<'_>],
        image_barriers: &[vk::ImageMemoryBarrier<'_>],
    ) {
        self.device.cmd_pipeline_barrier(
            self.buffer,
            src_stage,
            dst_stage,
            dependency_flags,
            memory_barriers,
            image_barriers,
        );
    }

    // =========================================================================
    // Transfer Commands
    // =========================================================================

    /// Copies buffer regions into an image in `layout`.
    pub fn copy_buffer_to_image(
        &self,
        buffer: vk::Buffer,
        image: vk::Image,
        layout: vk::ImageLayout,
        regions: &[vk::BufferImageCopy],
    ) {
        self.device
            .cmd_copy_buffer_to_image(self.buffer, buffer, image, layout, regions);
    }

    /// Blits between images, scaling with `filter` when extents differ.
    pub fn blit_image(
        &self,
        src_image: vk::Image,
        src_layout: vk::ImageLayout,
        dst_image: vk::Image,
        dst_layout: vk::ImageLayout,
        regions: &[vk::ImageBlit],
        filter: vk::Filter,
    ) {
        self.device.cmd_blit_image(
            self.buffer,
            src_image,
            src_layout,
            dst_image,
            dst_layout,
            regions,
            filter,
        );
    }

    // =========================================================================
    // Pipeline State
    // =========================================================================

    /// Binds a pipeline.
    pub fn bind_pipeline(&self, bind_point: vk::PipelineBindPoint, pipeline: vk::Pipeline) {
        self.device
            .cmd_bind_pipeline(self.buffer, bind_point, pipeline);
    }

    /// Binds descriptor sets starting at `first_set`.
    pub fn bind_descriptor_sets(
        &self,
        bind_point: vk::PipelineBindPoint,
        layout: vk::PipelineLayout,
        first_set: u32,
        descriptor_sets: &[vk::DescriptorSet],
    ) {
        self.device.cmd_bind_descriptor_sets(
            self.buffer,
            bind_point,
            layout,
            first_set,
            descriptor_sets,
        );
    }

    /// Updates push constant data from a byte slice.
    pub fn push_constants(
        &self,
        layout: vk::PipelineLayout,
        stages: vk::ShaderStageFlags,
        offset: u32,
        data: &[u8],
    ) {
        self.device
            .cmd_push_constants(self.buffer, layout, stages, offset, data);
    }

    // =========================================================================
    // Compute Commands
    // =========================================================================

    /// Dispatches compute work groups.
    pub fn dispatch(&self, group_count_x: u32, group_count_y: u32, group_count_z: u32) {
        self.device
            .cmd_dispatch(self.buffer, group_count_x, group_count_y, group_count_z);
    }

    // =========================================================================
    // Debug Labels
    // =========================================================================

    pub fn begin_label(&self, name: &str, color: [f32; 4]) {
        self.device.cmd_begin_label(self.buffer, name, color);
    }

    pub fn end_label(&self) {
        self.device.cmd_end_label(self.buffer);
    }
}

impl CommandBuffer<Device> {
    // =========================================================================
    // Acceleration Structures
    // =========================================================================

    /// Records acceleration structure builds.
    ///
    /// `ranges[i]` holds the build ranges of `infos[i]`.
    ///
    /// # Errors
    ///
    /// Returns an error if the device was created without ray-query support.
    pub fn build_acceleration_structures(
        &self,
        infos: &[vk::AccelerationStructureBuildGeometryInfoKHR<'_>],
        ranges: &[&[vk::AccelerationStructureBuildRangeInfoKHR]],
    ) -> RhiResult<()> {
        let loader = self.device.acceleration_structure()?;
        unsafe { loader.cmd_build_acceleration_structures(self.buffer, infos, ranges) };
        Ok(())
    }
}
