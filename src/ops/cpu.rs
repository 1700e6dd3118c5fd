//! Parallel CPU global pooling.
//!
//! Each feature column is reduced independently, so the columns are spread
//! across the [`rayon`](https://docs.rs/rayon) pool. Within a column the rows
//! are folded in ascending step order. Averages accumulate in `f64` and are
//! narrowed to `f32` once, after the division.

use super::{pool_dims, PoolingMode};
use crate::error::{PoolingError, Result};
use crate::tensors::{StridedView, Tensor};
use rayon::prelude::*;

/// Reduces a `[steps, features]` tensor to `[features]`.
///
/// - `Max`: `out[i] = max over s of input[s, i]`, folded with [`f32::max`].
///   A NaN element is skipped unless the whole column is NaN.
/// - `Average`: `out[i] = (sum over s of input[s, i]) / steps`, summed in
///   `f64`. NaN and infinities propagate as IEEE arithmetic dictates.
///
/// A fresh output tensor is allocated on every call.
///
/// # Errors
/// - [`PoolingError::ShapeMismatch`] / [`PoolingError::EmptySequence`] for
///   malformed input shapes.
/// - [`PoolingError::HostUnavailable`] if `input` only lives on the GPU.
///
/// # Example
/// ```rust
/// use briny_pool::ops::{cpu::global_pool, PoolingMode};
/// use briny_pool::tensor;
///
/// let x = tensor!([[1.0, 2.0], [3.0, 0.0], [2.0, 4.0]]);
/// let max = global_pool(&x, PoolingMode::Max).unwrap();
/// let avg = global_pool(&x, PoolingMode::Average).unwrap();
/// assert_eq!(max.data(), Some(&[3.0, 4.0][..]));
/// assert_eq!(avg.data(), Some(&[2.0, 2.0][..]));
/// ```
pub fn global_pool(input: &Tensor, mode: PoolingMode) -> Result<Tensor> {
    let (steps, features) = pool_dims(input.shape())?;
    if input.data().is_none() {
        return Err(PoolingError::HostUnavailable);
    }

    let out = (0..features)
        .into_par_iter()
        .map(|i| input.column(i).map(|col| reduce(col, steps, mode)))
        .collect::<Result<Vec<f32>>>()?;

    Ok(Tensor::new(vec![features], out))
}

#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
fn reduce(column: StridedView<'_>, steps: usize, mode: PoolingMode) -> f32 {
    match mode {
        PoolingMode::Max => column.reduce(f32::max).unwrap_or(f32::NEG_INFINITY),
        PoolingMode::Average => (column.map(f64::from).sum::<f64>() / steps as f64) as f32,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::approx::approx_eq;
    use crate::tensor;

    #[test]
    fn max_and_average_of_small_matrix() {
        let x = tensor!([[1.0, 2.0], [3.0, 0.0], [2.0, 4.0]]);
        let max = global_pool(&x, PoolingMode::Max).unwrap();
        let avg = global_pool(&x, PoolingMode::Average).unwrap();
        assert_eq!(max.shape(), &[2]);
        assert_eq!(max.data().unwrap(), &[3.0, 4.0]);
        assert_eq!(avg.data().unwrap(), &[2.0, 2.0]);
    }

    #[test]
    fn single_step_is_identity() {
        let x = tensor!([[5.0, -1.0]]);
        for mode in [PoolingMode::Max, PoolingMode::Average] {
            let out = global_pool(&x, mode).unwrap();
            assert_eq!(out.data().unwrap(), &[5.0, -1.0]);
        }
    }

    #[test]
    fn single_feature_gives_length_one_vector() {
        let x = tensor!([[-3.0], [-7.0], [-1.0], [-5.0]]);
        let max = global_pool(&x, PoolingMode::Max).unwrap();
        let avg = global_pool(&x, PoolingMode::Average).unwrap();
        assert_eq!(max.shape(), &[1]);
        assert_eq!(max.data().unwrap(), &[-1.0]);
        assert!(approx_eq(avg.data().unwrap(), &[-4.0][..]));
    }

    #[test]
    fn nan_in_max_is_skipped_but_poisons_average() {
        let x = tensor!([[f32::NAN, 1.0], [2.0, f32::INFINITY]]);
        let max = global_pool(&x, PoolingMode::Max).unwrap();
        let avg = global_pool(&x, PoolingMode::Average).unwrap();
        assert_eq!(max.data().unwrap(), &[2.0, f32::INFINITY]);
        let avg = avg.data().unwrap();
        assert!(avg[0].is_nan());
        assert_eq!(avg[1], f32::INFINITY);
    }

    #[test]
    fn long_sequence_average_keeps_precision() {
        let x = Tensor::new(vec![100_000, 1], vec![0.1; 100_000]);
        let avg = global_pool(&x, PoolingMode::Average).unwrap();
        assert!(approx_eq(avg.data().unwrap(), &[0.1]));
    }

    #[test]
    fn rejects_wrong_rank_and_empty_sequence() {
        let flat = tensor!([1.0, 2.0, 3.0]);
        assert!(matches!(
            global_pool(&flat, PoolingMode::Max),
            Err(PoolingError::ShapeMismatch { .. })
        ));

        let empty = Tensor::zeros(vec![0, 3]);
        assert!(matches!(
            global_pool(&empty, PoolingMode::Average),
            Err(PoolingError::EmptySequence)
        ));
    }
}
