//! # Reduction Backends
//!
//! Global pooling collapses the step axis of a `[steps, features]` tensor
//! into one value per feature. This module holds the two interchangeable
//! implementations of that reduction:
//!
//! - [`cpu`] — `rayon`-parallel reduction over strided columns (always built)
//! - [`wgpu`] *(opt-in)* — compute shader dispatch through `wgpu`
//!
//! Both backends reduce rows in ascending step order. Averages are summed in
//! `f64` on the CPU and with compensated `f32` summation on the GPU, so long
//! sequences stay within `f32` precision of the true mean.
//!
//! ## Feature Flags
//!
//! - `wgpu` — Enables the `wgpu` (WebGPU) backend

use crate::error::{PoolingError, Result};

pub mod cpu;

#[cfg(feature = "wgpu")]
pub mod wgpu;

/// The reduction applied along the step axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PoolingMode {
    /// Largest value of each feature column.
    #[default]
    Max,
    /// Arithmetic mean of each feature column.
    Average,
}

impl PoolingMode {
    /// `true` for [`PoolingMode::Max`]; the shader's `isMaxPooling` flag.
    #[must_use]
    pub const fn is_max(self) -> bool {
        matches!(self, Self::Max)
    }
}

/// Splits a pooling input shape into `(steps, features)`.
///
/// # Errors
/// - [`PoolingError::ShapeMismatch`] unless the shape is `[steps, features]`
///   with `features >= 1`.
/// - [`PoolingError::EmptySequence`] if `steps == 0`.
pub(crate) fn pool_dims(shape: &[usize]) -> Result<(usize, usize)> {
    let &[steps, features] = shape else {
        return Err(PoolingError::ShapeMismatch {
            expected: "[steps, features]".into(),
            found: shape.to_vec(),
        });
    };
    if features == 0 {
        return Err(PoolingError::ShapeMismatch {
            expected: "[steps, features] with features >= 1".into(),
            found: shape.to_vec(),
        });
    }
    if steps == 0 {
        return Err(PoolingError::EmptySequence);
    }
    Ok((steps, features))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_dims_accepts_rank_two() {
        assert_eq!(pool_dims(&[3, 2]).unwrap(), (3, 2));
        assert_eq!(pool_dims(&[1, 1]).unwrap(), (1, 1));
    }

    #[test]
    fn pool_dims_rejects_malformed_shapes() {
        assert!(matches!(pool_dims(&[6]), Err(PoolingError::ShapeMismatch { .. })));
        assert!(matches!(pool_dims(&[1, 2, 3]), Err(PoolingError::ShapeMismatch { .. })));
        assert!(matches!(pool_dims(&[4, 0]), Err(PoolingError::ShapeMismatch { .. })));
        assert!(matches!(pool_dims(&[0, 4]), Err(PoolingError::EmptySequence)));
    }
}
