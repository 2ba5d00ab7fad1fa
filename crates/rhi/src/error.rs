//! RHI error types.
//!
//! Only backend call failures surface here. Contract violations (wrong
//! command-list state, oversized push constants, mismatched blit extents)
//! panic at the call site instead.

use thiserror::Error;

/// RHI error type.
#[derive(Error, Debug)]
pub enum RhiError {
    /// Vulkan API error
    #[cfg(feature = "vulkan")]
    #[error("Vulkan error: {0}")]
    VulkanError(#[from] ash::vk::Result),

    /// Failed to load Vulkan library
    #[cfg(feature = "vulkan")]
    #[error("Failed to load Vulkan: {0}")]
    LoadingError(#[from] ash::LoadingError),

    /// GPU allocator error
    #[cfg(feature = "vulkan")]
    #[error("Allocator error: {0}")]
    AllocatorError(#[from] gpu_allocator::AllocationError),

    /// No suitable GPU found
    #[error("No suitable GPU found")]
    NoSuitableGpu,

    /// A required extension or feature is missing
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// Shader module creation error
    #[error("Shader error: {0}")]
    ShaderError(String),

    /// Pipeline or pipeline layout creation error
    #[error("Pipeline error: {0}")]
    PipelineError(String),

    /// Invalid handle or resource description
    #[error("Invalid handle: {0}")]
    InvalidHandle(String),

    /// A wait on GPU work exceeded its timeout
    #[error("Timed out waiting for {0}")]
    Timeout(String),
}

/// Result type alias for RHI operations.
pub type RhiResult<T> = std::result::Result<T, RhiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        assert_eq!(RhiError::NoSuitableGpu.to_string(), "No suitable GPU found");
        assert_eq!(
            RhiError::Timeout("command list 'frame0'".to_string()).to_string(),
            "Timed out waiting for command list 'frame0'"
        );
    }

    #[cfg(feature = "vulkan")]
    #[test]
    fn test_vulkan_result_conversion() {
        let err: RhiError = ash::vk::Result::ERROR_DEVICE_LOST.into();
        assert!(matches!(err, RhiError::VulkanError(_)));
    }
}
