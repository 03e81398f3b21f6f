//! Synchronization primitives.
//!
//! - [`Semaphore`] - GPU-to-GPU ordering between acquire, submit and present
//! - [`Fence`] - GPU-to-CPU completion, used as frame-slot backpressure
//!
//! Both are generic over [`DeviceApi`] so the frame orchestrator can be driven
//! by the mock device in tests. The default parameter is the real [`Device`].

use std::sync::Arc;

use ash::vk;
use tracing::debug;

use crate::api::DeviceApi;
use crate::device::Device;
use crate::error::RhiResult;

/// Vulkan semaphore wrapper.
///
/// Created unsignaled and destroyed on drop.
pub struct Semaphore<D: DeviceApi = Device> {
    device: Arc<D>,
    semaphore: vk::Semaphore,
}

impl<D: DeviceApi> Semaphore<D> {
    /// Creates a new semaphore.
    ///
    /// # Errors
    ///
    /// Returns an error if semaphore creation fails.
    pub fn new(device: Arc<D>) -> RhiResult<Self> {
        let semaphore = device.create_semaphore()?;
        Ok(Self { device, semaphore })
    }

    /// Creates a semaphore and gives it a debug name.
    pub fn named(device: Arc<D>, name: &str) -> RhiResult<Self> {
        let semaphore = Self::new(device)?;
        semaphore.device.set_object_name(
            vk::ObjectType::SEMAPHORE,
            vk::Handle::as_raw(semaphore.semaphore),
            name,
        );
        debug!("Created semaphore '{}'", name);
        Ok(semaphore)
    }

    /// Returns the Vulkan semaphore handle.
    #[inline]
    pub fn handle(&self) -> vk::Semaphore {
        self.semaphore
    }
}

impl<D: DeviceApi> Drop for Semaphore<D> {
    fn drop(&mut self) {
        self.device.destroy_semaphore(self.semaphore);
    }
}

/// Vulkan fence wrapper.
pub struct Fence<D: DeviceApi = Device> {
    device: Arc<D>,
    fence: vk::Fence,
}

impl<D: DeviceApi> Fence<D> {
    /// Creates a new fence.
    ///
    /// Frame-slot fences are created `signaled` so the first wait on a slot
    /// returns immediately.
    ///
    /// # Errors
    ///
    /// Returns an error if fence creation fails.
    pub fn new(device: Arc<D>, signaled: bool) -> RhiResult<Self> {
        let fence = device.create_fence(signaled)?;
        debug!(
            "Created fence ({})",
            if signaled { "signaled" } else { "unsignaled" }
        );
        Ok(Self { device, fence })
    }

    /// Creates a fence and gives it a debug name.
    pub fn named(device: Arc<D>, signaled: bool, name: &str) -> RhiResult<Self> {
        let fence = Self::new(device, signaled)?;
        fence
            .device
            .set_object_name(vk::ObjectType::FENCE, vk::Handle::as_raw(fence.fence), name);
        Ok(fence)
    }

    /// Returns the Vulkan fence handle.
    #[inline]
    pub fn handle(&self) -> vk::Fence {
        self.fence
    }

    /// Blocks until the fence is signaled.
    ///
    /// `timeout` is in nanoseconds; `u64::MAX` waits forever.
    ///
    /// # Errors
    ///
    /// Returns `vk::Result::TIMEOUT` if the timeout expires, or the device
    /// error that interrupted the wait.
    pub fn wait(&self, timeout: u64) -> RhiResult<()> {
        self.device.wait_for_fence(self.fence, timeout)
    }

    /// Resets the fence to the unsignaled state.
    ///
    /// The fence must not be pending on any queue.
    pub fn reset(&self) -> RhiResult<()> {
        self.device.reset_fence(self.fence)
    }

    /// Checks the fence without blocking.
    pub fn is_signaled(&self) -> bool {
        matches!(self.device.fence_status(self.fence), Ok(true))
    }
}

impl<D: DeviceApi> Drop for Fence<D> {
    fn drop(&mut self) {
        self.device.destroy_fence(self.fence);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RhiError;
    use crate::mock::MockDevice;

    #[test]
    fn test_fence_created_signaled_does_not_block() {
        let device = Arc::new(MockDevice::new());
        let fence = Fence::new(device, true).unwrap();
        assert!(fence.is_signaled());
        fence.wait(0).unwrap();
    }

    #[test]
    fn test_fence_reset_then_wait_times_out() {
        let device = Arc::new(MockDevice::new());
        let fence = Fence::new(device, true).unwrap();
        fence.reset().unwrap();
        assert!(!fence.is_signaled());
        assert!(matches!(
            fence.wait(1_000),
            Err(RhiError::VulkanError(vk::Result::TIMEOUT))
        ));
    }

    #[test]
    fn test_drop_destroys_objects() {
        let device = Arc::new(MockDevice::new());
        {
            let _fence = Fence::new(device.clone(), false).unwrap();
            let _semaphore = Semaphore::named(device.clone(), "test").unwrap();
            assert_eq!(device.live_object_count(), 2);
        }
        assert_eq!(device.live_object_count(), 0);
    }

    #[test]
    fn test_sync_objects_are_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Semaphore>();
        assert_send_sync::<Fence>();
        assert_send_sync::<Fence<MockDevice>>();
    }
}
