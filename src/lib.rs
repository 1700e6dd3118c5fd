//! briny_pool: global 1D sequence pooling for inference graphs.
//!
//! Reduces a `[steps, features]` feature map to a `[features]` vector with
//! max or average pooling, on the CPU or on the GPU through `wgpu`.
//!
//! # Modules
//!
//! - [`layers`] — the [`GlobalPooling1D`] layer, its configuration and lifecycle.
//! - [`ops`] — the CPU and GPU reductions the layer dispatches to.
//! - [`tensors`] — tensors with optional GPU mirrors.
//! - [`backend`] — process-wide default backend selection.
//! - [`error`] — the crate's error types.
//! - [`approx`] — floating-point tolerance helpers.
//!
//! # Feature Flags
//!
//! - `wgpu` — enables the GPU backend. Without it every layer runs on the CPU.
//!
//! # Example
//!
//! ```rust
//! use briny_pool::{tensor, GlobalPooling1D, PoolingConfig};
//!
//! let mut layer = GlobalPooling1D::max(PoolingConfig::default()).unwrap();
//! let mut x = tensor!([[1.0, 2.0], [3.0, 0.0], [2.0, 4.0]]);
//! assert_eq!(layer.call(&mut x).unwrap().data(), Some(&[3.0, 4.0][..]));
//! ```

pub mod approx;
pub mod backend;
pub mod error;
pub mod layers;
pub mod ops;
pub mod tensors;

pub use error::{GpuFailure, PoolingError};
pub use layers::{DataFormat, GlobalPooling1D, PoolingConfig};
pub use ops::PoolingMode;
pub use tensors::Tensor;
