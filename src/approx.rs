//! Utilities to approximate equality of floating point values.
//!
//! Pooling on the GPU and on the CPU may round differently, so results are
//! compared with a relative tolerance rather than bit for bit.

/// The max relative error accepted on `f32`s.
pub const F32_MAX_ERROR: f32 = 1e-3;

/// The relative error expected between backends.
pub const F32_AVG_ERROR: f32 = 1e-5;

/// The best expected relative error.
pub const F32_MIN_ERROR: f32 = 1e-7;

/// The approximated equality enumerated, from best to worst.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ApproxEquality {
    /// Identical up to the last bits.
    Precise = 0,
    /// Within the cross-backend tolerance.
    Partial = 1,
    /// Acceptable epsilon.
    Relative = 2,
    /// No relative equality.
    Scarce = 3,
}

/// Checks the relative distance between two values.
pub trait RelativeEq<Rhs: ?Sized = Self> {
    /// Grades how close `self` is to `rhs`.
    fn approx_eq(&self, rhs: &Rhs) -> ApproxEquality;
}

impl RelativeEq for f32 {
    fn approx_eq(&self, rhs: &Self) -> ApproxEquality {
        // equal infinities and bit-identical values
        if self == rhs || (self.is_nan() && rhs.is_nan()) {
            return ApproxEquality::Precise;
        }
        let dif = (self - rhs).abs();
        let scale = self.abs().max(rhs.abs()).max(1.0);
        let rel = dif / scale;

        if rel < F32_MIN_ERROR {
            ApproxEquality::Precise
        } else if rel < F32_AVG_ERROR {
            ApproxEquality::Partial
        } else if rel < F32_MAX_ERROR {
            ApproxEquality::Relative
        } else {
            ApproxEquality::Scarce
        }
    }
}

impl<T: RelativeEq<U>, U> RelativeEq<[U]> for [T] {
    fn approx_eq(&self, rhs: &[U]) -> ApproxEquality {
        if self.len() != rhs.len() {
            return ApproxEquality::Scarce;
        }
        self.iter()
            .zip(rhs)
            .map(|(a, b)| a.approx_eq(b))
            .max()
            .unwrap_or(ApproxEquality::Precise)
    }
}

/// Whether the slices `a` and `b` agree within [`F32_AVG_ERROR`] relative error.
///
/// NaN compares equal to NaN here, since both backends are expected to
/// propagate it the same way through averages.
///
/// ```
/// use briny_pool::approx::approx_eq;
/// assert!(approx_eq(&[1.0_f32, 2.0][..], &[1.0, 2.000_001][..]));
/// assert!(!approx_eq(&[1.0_f32][..], &[1.1][..]));
/// ```
#[must_use]
pub fn approx_eq(a: &[f32], b: &[f32]) -> bool {
    a.approx_eq(b) <= ApproxEquality::Partial
}
