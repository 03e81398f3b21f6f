//! Renderer error types.

use ash::vk;
use thiserror::Error;

use blackhole_resources::ResourceError;
use blackhole_rhi::RhiError;

/// Errors raised by the allocator, the passes and the frame loop.
///
/// None of them is recoverable: the application logs the chain and exits.
#[derive(Error, Debug)]
pub enum RenderError {
    /// A device memory allocation failed.
    #[error("Failed to allocate {size} bytes for {name}: {source}")]
    AllocationFailed {
        name: String,
        size: vk::DeviceSize,
        #[source]
        source: RhiError,
    },

    /// No memory type satisfies a resource's requirements and policy.
    #[error(
        "No memory type for '{name}' (type bits {type_bits:#b}, required {required:?}, avoided {avoidable:?})"
    )]
    NoCompatibleMemoryType {
        name: String,
        type_bits: u32,
        required: vk::MemoryPropertyFlags,
        avoidable: vk::MemoryPropertyFlags,
    },

    /// The GPU was lost.
    #[error("GPU device lost")]
    DeviceLost,

    /// A named resource lookup failed.
    #[error("{kind} '{name}' not found")]
    ResourceNotFound { kind: &'static str, name: String },

    /// Two resources were declared with the same name.
    #[error("{kind} '{name}' is declared twice")]
    DuplicateName { kind: &'static str, name: String },

    /// An asset could not be loaded.
    #[error("Failed to load asset: {0}")]
    AssetLoadFailed(#[from] ResourceError),

    /// A fixed-size table is too small.
    #[error("{what} holds at most {capacity} entries, {requested} requested")]
    CapacityExceeded {
        what: &'static str,
        capacity: usize,
        requested: usize,
    },

    /// A lifecycle operation was called in the wrong state.
    #[error("{operation} is not allowed while {state}")]
    InvalidState {
        operation: &'static str,
        state: &'static str,
    },

    /// Any other RHI failure.
    #[error(transparent)]
    Rhi(RhiError),
}

impl From<RhiError> for RenderError {
    fn from(error: RhiError) -> Self {
        if error.is_device_lost() {
            RenderError::DeviceLost
        } else {
            RenderError::Rhi(error)
        }
    }
}

impl From<vk::Result> for RenderError {
    fn from(result: vk::Result) -> Self {
        RhiError::from(result).into()
    }
}

/// Result type alias for renderer operations.
pub type RenderResult<T> = std::result::Result<T, RenderError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_lost_is_surfaced() {
        let error = RenderError::from(vk::Result::ERROR_DEVICE_LOST);
        assert!(matches!(error, RenderError::DeviceLost));

        let error = RenderError::from(RhiError::VulkanError(vk::Result::ERROR_DEVICE_LOST));
        assert!(matches!(error, RenderError::DeviceLost));
    }

    #[test]
    fn test_other_rhi_errors_are_wrapped() {
        let error = RenderError::from(vk::Result::ERROR_OUT_OF_HOST_MEMORY);
        assert!(matches!(
            error,
            RenderError::Rhi(RhiError::VulkanError(vk::Result::ERROR_OUT_OF_HOST_MEMORY))
        ));
    }

    #[test]
    fn test_messages_carry_context() {
        let error = RenderError::ResourceNotFound {
            kind: "image",
            name: "Output".to_string(),
        };
        assert_eq!(error.to_string(), "image 'Output' not found");
    }
}
