//! Error taxonomy for pooling operators.
//!
//! Every fallible operation in the crate reports a [`PoolingError`]. GPU
//! resource problems are wrapped as [`GpuFailure`] and are never retried;
//! there is no silent fallback to the CPU path once a GPU strategy is chosen.
//!
//! Numeric edge cases (NaN, infinities) are not errors. They flow through the
//! reductions as described on [`crate::ops::cpu::global_pool`].

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T, E = PoolingError> = core::result::Result<T, E>;

/// A failure while pooling a tensor.
#[derive(Debug, Error)]
pub enum PoolingError {
    /// The input shape is inconsistent with what the operator expects.
    #[error("shape mismatch: expected {expected}, found {found:?}")]
    ShapeMismatch {
        /// Human readable description of the expected shape.
        expected: String,
        /// The shape that was actually supplied.
        found: Vec<usize>,
    },

    /// The sequence dimension is empty, so there is nothing to reduce.
    #[error("cannot pool over an empty sequence (steps = 0)")]
    EmptySequence,

    /// The host buffer is stale; the data only lives on the GPU.
    #[error("tensor data is GPU-resident; transfer it back before reading on the host")]
    HostUnavailable,

    /// The layer configuration could not be parsed.
    #[error("invalid layer configuration: {0}")]
    Config(String),

    /// A GPU resource could not be created or used.
    #[error(transparent)]
    Gpu(#[from] GpuFailure),
}

impl From<serde_json::Error> for PoolingError {
    fn from(err: serde_json::Error) -> Self {
        Self::Config(err.to_string())
    }
}

/// A type of error closely related to the GPU.
///
/// The variants carry the rendered message of the underlying `wgpu` error so
/// this type stays available when the crate is built without GPU support.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GpuFailure {
    /// No adapter or device could be acquired.
    #[error("GPU unavailable: {0}")]
    Unavailable(String),

    /// The shader source was rejected before compilation.
    #[error("shader `{0}` failed validation")]
    InvalidShader(&'static str),

    /// Shader or pipeline compilation reported a validation error.
    #[error("GPU program compilation failed: {0}")]
    Compile(String),

    /// A dispatch could not be encoded or submitted.
    #[error("GPU dispatch failed: {0}")]
    Dispatch(String),

    /// Mapping or decoding a result buffer failed.
    #[error("GPU readback failed: {0}")]
    Readback(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gpu_failure_converts_into_pooling_error() {
        let err: PoolingError = GpuFailure::Dispatch("queue lost".into()).into();
        assert!(matches!(err, PoolingError::Gpu(GpuFailure::Dispatch(_))));
        assert_eq!(err.to_string(), "GPU dispatch failed: queue lost");
    }

    #[test]
    fn shape_mismatch_mentions_found_shape() {
        let err = PoolingError::ShapeMismatch {
            expected: "[steps, features]".into(),
            found: vec![1, 2, 3],
        };
        assert!(err.to_string().contains("[1, 2, 3]"));
    }
}
