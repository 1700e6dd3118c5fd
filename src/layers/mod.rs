//! Layers built on top of the reduction backends.
//!
//! Layers own their configuration and any GPU resources they allocate, and
//! expose a single `call` entry point taking the input tensor.

pub mod global_pooling;

pub use self::global_pooling::{DataFormat, GlobalPooling1D, MaterializePolicy, PoolingConfig};
