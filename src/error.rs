//! Error types for spectroid.
//!
//! This module provides error types for flock orchestration, GPU backend
//! initialization, and buffer readback.

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, FlockError>;

/// Errors that can occur while setting up or driving the wgpu backend.
#[derive(Debug, thiserror::Error)]
pub enum GpuError {
    /// No compatible GPU adapter found.
    #[error("No compatible GPU adapter found. Ensure your system has a GPU with WebGPU/Vulkan/Metal/DX12 support.")]
    NoAdapter,
    /// Failed to create GPU device.
    #[error("Failed to create GPU device: {0}")]
    DeviceCreation(#[from] wgpu::RequestDeviceError),
    /// Failed to map buffer for reading.
    #[error("Failed to map GPU buffer: {0}")]
    BufferMapping(String),
    /// A buffer id that the backend never allocated (or already released).
    #[error("Unknown GPU buffer #{0}")]
    UnknownBuffer(u64),
}

/// Errors surfaced at the orchestration boundary.
///
/// All variants are local precondition violations: a failing `tick` drops
/// that frame and leaves the flock enabled for the next attempt.
#[derive(Debug, thiserror::Error)]
pub enum FlockError {
    /// A caller-supplied value is out of range (zero particle count,
    /// non-power-of-two length where one is required, ...).
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    /// An operation was requested in a state where it is undefined, e.g.
    /// capturing a spectrum with no audio clip bound.
    #[error("Invalid state: {0}")]
    InvalidState(String),
    /// Dispatch before enable, after disable, or a binding the backend
    /// does not know about.
    #[error("Resource lifecycle error: {0}")]
    ResourceLifecycle(String),
    /// GPU backend failure.
    #[error("GPU error: {0}")]
    Gpu(#[from] GpuError),
}

impl FlockError {
    pub(crate) fn invalid_argument(msg: impl Into<String>) -> Self {
        FlockError::InvalidArgument(msg.into())
    }

    pub(crate) fn invalid_state(msg: impl Into<String>) -> Self {
        FlockError::InvalidState(msg.into())
    }

    pub(crate) fn lifecycle(msg: impl Into<String>) -> Self {
        FlockError::ResourceLifecycle(msg.into())
    }
}

/// Errors that can occur when loading a configuration file.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read file from disk.
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    /// File is not valid config JSON.
    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    /// Parsed values violate an invariant.
    #[error(transparent)]
    Invalid(#[from] FlockError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn test_gpu_error_chains_into_flock_error() {
        let err: FlockError = GpuError::NoAdapter.into();
        assert!(matches!(err, FlockError::Gpu(GpuError::NoAdapter)));
        assert!(err.source().is_some());
        assert!(err.to_string().starts_with("GPU error"));
    }

    #[test]
    fn test_display_messages() {
        let err = FlockError::invalid_argument("particle count must be > 0");
        assert_eq!(err.to_string(), "Invalid argument: particle count must be > 0");

        let err = FlockError::lifecycle("flock is disabled");
        assert_eq!(err.to_string(), "Resource lifecycle error: flock is disabled");
    }
}
