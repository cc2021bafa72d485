//! Error types for voxelization.

use thiserror::Error;

use crate::tensor::Device;

/// Every failure is a caller programming error, raised before any
/// accumulation into a caller-supplied grid.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum VoxelError {
    /// Rank, length or channel-count mismatch
    #[error("Shape error: {0}")]
    Shape(String),

    /// Unrecognized name or out-of-range parameter
    #[error("Value error: {0}")]
    Value(String),

    /// Input not resident on the voxelizer's device
    #[error("Device error: expected {expected}, found {found}")]
    Device { expected: Device, found: Device },
}

impl VoxelError {
    pub fn shape(message: impl Into<String>) -> Self {
        VoxelError::Shape(message.into())
    }

    pub fn value(message: impl Into<String>) -> Self {
        VoxelError::Value(message.into())
    }

    pub fn device(expected: Device, found: Device) -> Self {
        VoxelError::Device { expected, found }
    }
}

pub type Result<T> = std::result::Result<T, VoxelError>;
