//! Device and presentation seams used by the render core.
//!
//! The allocator, the render core and the frame orchestrator talk to the GPU
//! exclusively through [`DeviceApi`] and [`SwapchainApi`]. The production
//! implementations live in [`crate::device::Device`] and
//! [`crate::swapchain::Swapchain`]; the `mock` feature provides in-memory
//! implementations for tests.
//!
//! The methods mirror the Vulkan calls one-to-one. Handles are plain
//! `vk` handles so that command-recording code is identical for both
//! implementations.

use ash::vk;

use crate::error::RhiResult;

/// Parameters of a single queue submission.
#[derive(Clone, Copy, Debug, Default)]
pub struct SubmitDesc<'a> {
    /// Command buffers to execute, in order.
    pub command_buffers: &'a [vk::CommandBuffer],
    /// Semaphores waited on before execution.
    pub wait_semaphores: &'a [vk::Semaphore],
    /// Stage at which each wait semaphore is waited on.
    pub wait_stages: &'a [vk::PipelineStageFlags],
    /// Semaphores signaled on completion.
    pub signal_semaphores: &'a [vk::Semaphore],
    /// Fence signaled on completion (may be null).
    pub fence: vk::Fence,
}

/// The subset of the Vulkan device API the render core depends on.
///
/// All creation calls are fallible and their failure is fatal for the
/// caller. Destruction calls are infallible, as in Vulkan.
pub trait DeviceApi: Send + Sync {
    // =========================================================================
    // Memory
    // =========================================================================

    /// Memory heaps and types of the physical device.
    fn memory_properties(&self) -> vk::PhysicalDeviceMemoryProperties;

    /// Granularity of flushes of non-coherent host memory.
    fn non_coherent_atom_size(&self) -> vk::DeviceSize;

    /// Page size separating linear from optimal-tiling resources that share
    /// one memory block.
    fn buffer_image_granularity(&self) -> vk::DeviceSize;

    /// Allocates one block of device memory.
    fn allocate_memory(
        &self,
        size: vk::DeviceSize,
        memory_type_index: u32,
        flags: vk::MemoryAllocateFlags,
    ) -> RhiResult<vk::DeviceMemory>;

    fn free_memory(&self, memory: vk::DeviceMemory);

    /// Maps `size` bytes of host-visible memory starting at `offset`.
    fn map_memory(
        &self,
        memory: vk::DeviceMemory,
        offset: vk::DeviceSize,
        size: vk::DeviceSize,
    ) -> RhiResult<*mut u8>;

    fn flush_memory(
        &self,
        memory: vk::DeviceMemory,
        offset: vk::DeviceSize,
        size: vk::DeviceSize,
    ) -> RhiResult<()>;

    fn unmap_memory(&self, memory: vk::DeviceMemory);

    // =========================================================================
    // Images and buffers
    // =========================================================================

    fn create_image(&self, info: &vk::ImageCreateInfo<'_>) -> RhiResult<vk::Image>;
    fn image_memory_requirements(&self, image: vk::Image) -> vk::MemoryRequirements;
    fn bind_image_memory(
        &self,
        image: vk::Image,
        memory: vk::DeviceMemory,
        offset: vk::DeviceSize,
    ) -> RhiResult<()>;
    fn create_image_view(&self, info: &vk::ImageViewCreateInfo<'_>) -> RhiResult<vk::ImageView>;
    fn destroy_image_view(&self, view: vk::ImageView);
    fn destroy_image(&self, image: vk::Image);

    fn create_buffer(&self, info: &vk::BufferCreateInfo<'_>) -> RhiResult<vk::Buffer>;
    fn buffer_memory_requirements(&self, buffer: vk::Buffer) -> vk::MemoryRequirements;
    fn bind_buffer_memory(
        &self,
        buffer: vk::Buffer,
        memory: vk::DeviceMemory,
        offset: vk::DeviceSize,
    ) -> RhiResult<()>;
    fn destroy_buffer(&self, buffer: vk::Buffer);

    // =========================================================================
    // Synchronization
    // =========================================================================

    fn create_fence(&self, signaled: bool) -> RhiResult<vk::Fence>;

    /// Blocks until `fence` is signaled or `timeout` nanoseconds elapse.
    ///
    /// A timeout is reported as `vk::Result::TIMEOUT`.
    fn wait_for_fence(&self, fence: vk::Fence, timeout: u64) -> RhiResult<()>;

    /// Returns true if the fence is currently signaled.
    fn fence_status(&self, fence: vk::Fence) -> RhiResult<bool>;

    fn reset_fence(&self, fence: vk::Fence) -> RhiResult<()>;
    fn destroy_fence(&self, fence: vk::Fence);

    fn create_semaphore(&self) -> RhiResult<vk::Semaphore>;
    fn destroy_semaphore(&self, semaphore: vk::Semaphore);

    // =========================================================================
    // Command pools and buffers
    // =========================================================================

    /// Creates a command pool on the device's render queue family.
    fn create_command_pool(&self, flags: vk::CommandPoolCreateFlags) -> RhiResult<vk::CommandPool>;
    fn reset_command_pool(&self, pool: vk::CommandPool) -> RhiResult<()>;
    fn destroy_command_pool(&self, pool: vk::CommandPool);
    fn allocate_command_buffers(
        &self,
        pool: vk::CommandPool,
        count: u32,
    ) -> RhiResult<Vec<vk::CommandBuffer>>;

    fn begin_command_buffer(
        &self,
        command_buffer: vk::CommandBuffer,
        flags: vk::CommandBufferUsageFlags,
    ) -> RhiResult<()>;
    fn end_command_buffer(&self, command_buffer: vk::CommandBuffer) -> RhiResult<()>;
    fn reset_command_buffer(&self, command_buffer: vk::CommandBuffer) -> RhiResult<()>;

    // =========================================================================
    // Recording
    // =========================================================================

    fn cmd_pipeline_barrier(
        &self,
        command_buffer: vk::CommandBuffer,
        src_stage: vk::PipelineStageFlags,
        dst_stage: vk::PipelineStageFlags,
        dependency_flags: vk::DependencyFlags,
        memory_barriers: &[vk::MemoryBarrier<'_>],
        image_barriers: &[vk::ImageMemoryBarrier<'_>],
    );

    #[allow(clippy::too_many_arguments)]
    fn cmd_blit_image(
        &self,
        command_buffer: vk::CommandBuffer,
        src_image: vk::Image,
        src_layout: vk::ImageLayout,
        dst_image: vk::Image,
        dst_layout: vk::ImageLayout,
        regions: &[vk::ImageBlit],
        filter: vk::Filter,
    );

    fn cmd_copy_buffer_to_image(
        &self,
        command_buffer: vk::CommandBuffer,
        buffer: vk::Buffer,
        image: vk::Image,
        layout: vk::ImageLayout,
        regions: &[vk::BufferImageCopy],
    );

    fn cmd_bind_pipeline(
        &self,
        command_buffer: vk::CommandBuffer,
        bind_point: vk::PipelineBindPoint,
        pipeline: vk::Pipeline,
    );

    fn cmd_bind_descriptor_sets(
        &self,
        command_buffer: vk::CommandBuffer,
        bind_point: vk::PipelineBindPoint,
        layout: vk::PipelineLayout,
        first_set: u32,
        descriptor_sets: &[vk::DescriptorSet],
    );

    fn cmd_push_constants(
        &self,
        command_buffer: vk::CommandBuffer,
        layout: vk::PipelineLayout,
        stages: vk::ShaderStageFlags,
        offset: u32,
        data: &[u8],
    );

    fn cmd_dispatch(&self, command_buffer: vk::CommandBuffer, x: u32, y: u32, z: u32);

    // =========================================================================
    // Queue
    // =========================================================================

    fn queue_submit(&self, submit: &SubmitDesc<'_>) -> RhiResult<()>;
    fn wait_idle(&self) -> RhiResult<()>;

    // =========================================================================
    // Debug utilities (no-ops when unavailable)
    // =========================================================================

    fn set_object_name(&self, object_type: vk::ObjectType, raw_handle: u64, name: &str);
    fn cmd_begin_label(&self, command_buffer: vk::CommandBuffer, name: &str, color: [f32; 4]);
    fn cmd_end_label(&self, command_buffer: vk::CommandBuffer);
}

/// Presentation target the frame orchestrator blits into.
///
/// Acquire and present return the raw `vk::Result` on failure so callers can
/// react to `ERROR_OUT_OF_DATE_KHR` and `SUBOPTIMAL_KHR`.
pub trait SwapchainApi {
    /// Acquires the next image, signaling `semaphore` when it is available.
    ///
    /// Returns the image index and whether the swapchain is suboptimal.
    fn acquire_next_image(&self, semaphore: vk::Semaphore) -> Result<(u32, bool), vk::Result>;

    /// Queues `image_index` for presentation after `wait_semaphore`.
    ///
    /// Returns true if the swapchain is suboptimal.
    fn present(&self, image_index: u32, wait_semaphore: vk::Semaphore)
    -> Result<bool, vk::Result>;

    fn image(&self, index: usize) -> vk::Image;
    fn image_count(&self) -> u32;
    fn extent(&self) -> vk::Extent2D;
}
