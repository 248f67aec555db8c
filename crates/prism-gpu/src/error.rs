//! GPU error types.

use ash::vk;
use thiserror::Error;

/// GPU-related errors.
#[derive(Error, Debug)]
pub enum GpuError {
    /// No GPU meets the minimum requirements.
    #[error("no supported GPU found")]
    NoSupportedDevice,

    /// A device or host allocation failed.
    #[error("out of device memory")]
    OutOfDeviceMemory,

    /// A shader binary could not be reflected.
    #[error("shader reflection failed: {0}")]
    ShaderReflect(String),

    /// Two stages disagree on the type or count of a binding.
    #[error("shader stage mismatch: {0}")]
    ShaderMismatch(String),

    /// An image usage combination the controller does not handle.
    #[error("unsupported image usage: {0}")]
    UnsupportedUsage(String),

    /// A uniform type the uniform-set assembler does not handle.
    #[error("unsupported uniform type: {0}")]
    UnsupportedUniform(String),

    /// A format missing from the format registry.
    #[error("unsupported format: {0:?}")]
    UnsupportedFormat(vk::Format),

    /// A uniform set addressed a binding the shader does not declare.
    #[error("shader declares no binding {binding} in set {set}")]
    NoSuchBinding { set: u32, binding: u32 },

    /// A fence wait timed out or the device was lost.
    #[error("device lost")]
    DeviceLost,

    /// Surface creation failed.
    #[error("surface creation failed: {0}")]
    SurfaceCreation(String),

    /// Swapchain creation failed.
    #[error("swapchain creation failed: {0}")]
    SwapchainCreation(String),

    /// Invalid state.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Any other Vulkan error.
    #[error("Vulkan error: {0}")]
    Vulkan(vk::Result),
}

impl From<vk::Result> for GpuError {
    fn from(result: vk::Result) -> Self {
        match result {
            vk::Result::ERROR_OUT_OF_DEVICE_MEMORY | vk::Result::ERROR_OUT_OF_HOST_MEMORY => {
                Self::OutOfDeviceMemory
            }
            vk::Result::ERROR_DEVICE_LOST | vk::Result::TIMEOUT => Self::DeviceLost,
            other => Self::Vulkan(other),
        }
    }
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, GpuError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vulkan_results_map_to_spec_kinds() {
        assert!(matches!(
            GpuError::from(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY),
            GpuError::OutOfDeviceMemory
        ));
        assert!(matches!(
            GpuError::from(vk::Result::ERROR_DEVICE_LOST),
            GpuError::DeviceLost
        ));
        assert!(matches!(
            GpuError::from(vk::Result::ERROR_UNKNOWN),
            GpuError::Vulkan(_)
        ));
    }
}
