//! Core tensor data structure.
//!
//! A [`Tensor`] is a row-major `f32` host buffer with a shape, plus an
//! optional GPU-side mirror when the crate is built with the `wgpu` feature.
//!
//! ## Residency
//!
//! The tensor tracks which copy of its data is authoritative:
//!
//! - [`Residency::Host`] — only the host buffer exists.
//! - [`Residency::Synced`] — host buffer and GPU mirror hold the same values.
//! - [`Residency::Device`] — the GPU mirror was written by a kernel and the
//!   host buffer is stale. Host reads are refused until
//!   `transfer_from_mirror` is called.
//!
//! ## Example
//!
//! ```rust
//! use briny_pool::tensors::Tensor;
//! let t = Tensor::new(vec![2, 3], vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
//! assert_eq!(t.shape(), &[2, 3]);
//! let col: Vec<f32> = t.column(1).unwrap().collect();
//! assert_eq!(col, vec![2.0, 5.0]);
//! ```

use crate::error::{PoolingError, Result};
use core::iter::StepBy;
use core::slice::Iter;

#[cfg(feature = "wgpu")]
use crate::ops::wgpu::{self as gpu, GpuMirror};

/// Which copy of a tensor's data is currently valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Residency {
    /// Host buffer only.
    Host,
    /// Host buffer and GPU mirror agree.
    Synced,
    /// GPU mirror only; the host buffer is stale.
    Device,
}

/// An N-dimensional `f32` tensor with a shape and flat row-major data.
pub struct Tensor {
    shape: Vec<usize>,
    data: Vec<f32>,
    residency: Residency,
    #[cfg(feature = "wgpu")]
    mirror: Option<GpuMirror>,
}

impl Tensor {
    /// Creates a new host-resident tensor with the given shape and flat data.
    ///
    /// # Panics
    /// Panics if the number of elements in `data` does not match the shape product.
    #[must_use]
    pub fn new(shape: impl Into<Vec<usize>>, data: Vec<f32>) -> Self {
        let shape = shape.into();
        assert_eq!(
            shape.iter().product::<usize>(),
            data.len(),
            "shape {:?} is incompatible with {} data elements",
            shape,
            data.len()
        );
        Self::from_parts(shape, data)
    }

    /// Fallible counterpart of [`Tensor::new`].
    ///
    /// # Errors
    /// Returns [`PoolingError::ShapeMismatch`] if `data.len()` is not the
    /// product of `shape`.
    pub fn try_new(shape: impl Into<Vec<usize>>, data: Vec<f32>) -> Result<Self> {
        let shape = shape.into();
        if shape.iter().product::<usize>() != data.len() {
            return Err(PoolingError::ShapeMismatch {
                expected: format!("{} elements", data.len()),
                found: shape,
            });
        }
        Ok(Self::from_parts(shape, data))
    }

    /// Creates a zero-filled host tensor.
    #[must_use]
    pub fn zeros(shape: impl Into<Vec<usize>>) -> Self {
        let shape = shape.into();
        let len = shape.iter().product();
        Self::from_parts(shape, vec![0.0; len])
    }

    fn from_parts(shape: Vec<usize>, data: Vec<f32>) -> Self {
        Self {
            shape,
            data,
            residency: Residency::Host,
            #[cfg(feature = "wgpu")]
            mirror: None,
        }
    }

    /// Stacks equally shaped tensors along a new leading axis.
    ///
    /// # Panics
    /// Panics if `rows` is empty, if the rows have mismatched shapes, or if
    /// any row is GPU-resident.
    #[must_use]
    pub fn stack(rows: Vec<Self>) -> Self {
        assert!(!rows.is_empty(), "cannot stack zero tensors");
        let inner = rows[0].shape.clone();
        assert!(
            rows.iter().all(|r| r.shape == inner),
            "ragged tensor literal (rows have mismatched shapes)"
        );
        let mut shape = vec![rows.len()];
        shape.extend_from_slice(&inner);
        let mut data = Vec::with_capacity(shape.iter().product());
        for row in rows {
            assert!(row.residency != Residency::Device, "cannot stack GPU-resident tensors");
            data.extend(row.data);
        }
        Self::from_parts(shape, data)
    }

    /// The dimension sizes of this tensor.
    #[must_use]
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Number of dimensions.
    #[must_use]
    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    /// Total number of elements.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the tensor holds no elements.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Which copy of the data is valid.
    #[must_use]
    pub const fn residency(&self) -> Residency {
        self.residency
    }

    /// The host buffer, or `None` while the data is GPU-resident only.
    #[must_use]
    pub fn data(&self) -> Option<&[f32]> {
        match self.residency {
            Residency::Host | Residency::Synced => Some(&self.data),
            Residency::Device => None,
        }
    }

    /// A strided view over column `index` of a `[rows, cols]` tensor.
    ///
    /// No data is copied; the view walks the host buffer with a stride of
    /// `cols`.
    ///
    /// # Errors
    /// - [`PoolingError::ShapeMismatch`] if the tensor is not rank 2 or
    ///   `index` is out of range.
    /// - [`PoolingError::HostUnavailable`] if the data is GPU-resident.
    pub fn column(&self, index: usize) -> Result<StridedView<'_>> {
        let &[_, cols] = self.shape.as_slice() else {
            return Err(PoolingError::ShapeMismatch {
                expected: "[rows, cols]".into(),
                found: self.shape.clone(),
            });
        };
        if index >= cols {
            return Err(PoolingError::ShapeMismatch {
                expected: format!("column index < {cols}"),
                found: self.shape.clone(),
            });
        }
        let data = self.data().ok_or(PoolingError::HostUnavailable)?;
        Ok(StridedView {
            inner: data.get(index..).unwrap_or_default().iter().step_by(cols),
        })
    }

    /// Reads the element at a multi-dimensional `index`.
    ///
    /// # Errors
    /// - [`PoolingError::ShapeMismatch`] if `index` has the wrong length or
    ///   is out of bounds.
    /// - [`PoolingError::HostUnavailable`] if the data is GPU-resident.
    pub fn get(&self, index: &[usize]) -> Result<f32> {
        let offset = self.offset(index)?;
        let data = self.data().ok_or(PoolingError::HostUnavailable)?;
        Ok(data[offset])
    }

    /// Writes the element at a multi-dimensional `index`.
    ///
    /// The GPU mirror, if any, no longer matches the host buffer and is
    /// dropped; the tensor becomes [`Residency::Host`] and the next
    /// `create_mirror` uploads the new values.
    ///
    /// # Errors
    /// - [`PoolingError::ShapeMismatch`] if `index` has the wrong length or
    ///   is out of bounds.
    /// - [`PoolingError::HostUnavailable`] if the data is GPU-resident, since
    ///   the host buffer is stale.
    pub fn set(&mut self, index: &[usize], value: f32) -> Result<()> {
        let offset = self.offset(index)?;
        if self.residency == Residency::Device {
            return Err(PoolingError::HostUnavailable);
        }
        self.data[offset] = value;
        self.residency = Residency::Host;
        #[cfg(feature = "wgpu")]
        {
            self.mirror = None;
        }
        Ok(())
    }

    /// Row-major offset of `index`.
    fn offset(&self, index: &[usize]) -> Result<usize> {
        if index.len() != self.rank() || index.iter().zip(&self.shape).any(|(&i, &d)| i >= d) {
            return Err(PoolingError::ShapeMismatch {
                expected: format!("an index into {:?}", self.shape),
                found: index.to_vec(),
            });
        }
        Ok(index
            .iter()
            .zip(&self.shape)
            .fold(0, |acc, (&i, &d)| acc * d + i))
    }
}

#[cfg(feature = "wgpu")]
impl Tensor {
    /// Whether a GPU mirror has been created for this tensor.
    #[must_use]
    pub const fn has_mirror(&self) -> bool {
        self.mirror.is_some()
    }

    pub(crate) const fn mirror(&self) -> Option<&GpuMirror> {
        self.mirror.as_ref()
    }

    /// Uploads the host buffer into a new GPU mirror.
    ///
    /// Does nothing if a mirror already exists. The logical values of the
    /// tensor are unchanged; only its representation is upgraded.
    ///
    /// # Errors
    /// Returns [`PoolingError::Gpu`] if no GPU context is available.
    pub fn create_mirror(&mut self) -> Result<()> {
        if self.mirror.is_some() {
            return Ok(());
        }
        let ctx = gpu::gpu_context()?;
        self.mirror = Some(GpuMirror::upload(ctx, &self.data));
        self.residency = Residency::Synced;
        Ok(())
    }

    /// Allocates a zeroed GPU mirror without uploading anything.
    ///
    /// `wgpu` zero-initializes new buffers, so host and mirror agree.
    pub(crate) fn allocate_mirror(&mut self) -> Result<()> {
        if self.mirror.is_some() {
            return Ok(());
        }
        let ctx = gpu::gpu_context()?;
        self.mirror = Some(GpuMirror::zeroed(ctx, self.data.len()));
        self.residency = Residency::Synced;
        Ok(())
    }

    /// Records that a kernel has written the mirror.
    pub(crate) fn mark_device_written(&mut self) {
        if self.mirror.is_some() {
            self.residency = Residency::Device;
        }
    }

    /// Copies the GPU mirror back into the host buffer.
    ///
    /// Does nothing unless the tensor is [`Residency::Device`].
    ///
    /// # Errors
    /// Returns [`PoolingError::Gpu`] if mapping or decoding the result fails.
    pub fn transfer_from_mirror(&mut self) -> Result<()> {
        if self.residency != Residency::Device {
            return Ok(());
        }
        let Some(mirror) = &self.mirror else {
            return Ok(());
        };
        let ctx = gpu::gpu_context()?;
        mirror.read_into(ctx, &mut self.data)?;
        self.residency = Residency::Synced;
        Ok(())
    }
}

impl core::fmt::Debug for Tensor {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let mut s = f.debug_struct("Tensor");
        s.field("shape", &self.shape);
        match self.data() {
            Some(data) => s.field("data", &data),
            None => s.field("data", &"<gpu-resident>"),
        };
        s.field("residency", &self.residency);
        #[cfg(feature = "wgpu")]
        s.field("mirror", &self.mirror.is_some());
        s.finish()
    }
}

/// A strided, read-only view of one column of a rank 2 tensor.
#[derive(Debug, Clone)]
pub struct StridedView<'a> {
    inner: StepBy<Iter<'a, f32>>,
}

impl Iterator for StridedView<'_> {
    type Item = f32;

    fn next(&mut self) -> Option<f32> {
        self.inner.next().copied()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl ExactSizeIterator for StridedView<'_> {}

/// Defines a tensor from nested literal arrays.
///
/// Supports arbitrary dimensionality as long as sublists are uniform in shape.
///
/// # Example
/// ```
/// use briny_pool::tensor;
/// let t = tensor!([[1.0, 2.0], [3.0, -4.0]]);
/// assert_eq!(t.shape(), &[2, 2]);
/// assert_eq!(t.data(), Some(&[1.0, 2.0, 3.0, -4.0][..]));
/// ```
#[macro_export]
macro_rules! tensor {
    ([ $( [ $($inner:tt)* ] ),+ $(,)? ]) => {
        $crate::tensors::Tensor::stack(vec![ $( $crate::tensor!([ $($inner)* ]) ),+ ])
    };

    ([ $( $x:expr ),+ $(,)? ]) => {{
        let data: Vec<f32> = vec![ $( $x as f32 ),+ ];
        $crate::tensors::Tensor::new(vec![data.len()], data)
    }};
}
