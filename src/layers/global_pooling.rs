//! Global 1D pooling layer.
//!
//! [`GlobalPooling1D`] collapses the step axis of a `[steps, features]`
//! sequence into one value per feature, using max or average pooling. The
//! backend is chosen once at construction:
//!
//! - **CPU** — every call allocates a fresh `[features]` output.
//! - **GPU** — the kernel is compiled at construction. The first call
//!   allocates the output tensor and its mirror and fixes the feature count;
//!   later calls reuse both and must present the same feature count.
//!
//! After a GPU dispatch the output is copied back to the host only when the
//! materialization policy says so (by default, when the layer has no
//! downstream consumers). Otherwise it stays GPU-resident for the next layer.
//!
//! # Example
//!
//! ```rust
//! use briny_pool::backend::Backend;
//! use briny_pool::layers::{GlobalPooling1D, PoolingConfig};
//! use briny_pool::ops::PoolingMode;
//! use briny_pool::tensor;
//!
//! let config = PoolingConfig::from_json(r#"{"data_format": "channels_last"}"#).unwrap();
//! let mut layer = GlobalPooling1D::with_backend(PoolingMode::Average, config, Backend::Cpu).unwrap();
//!
//! let mut x = tensor!([[1.0, 2.0], [3.0, 0.0], [2.0, 4.0]]);
//! let out = layer.call(&mut x).unwrap();
//! assert_eq!(out.data(), Some(&[2.0, 2.0][..]));
//! ```

use crate::backend::{get_backend, Backend};
use crate::error::{PoolingError, Result};
use crate::ops::{cpu, PoolingMode};
use crate::tensors::Tensor;
use serde::Deserialize;

#[cfg(feature = "wgpu")]
use crate::{
    error::GpuFailure,
    ops::{pool_dims, wgpu as gpu},
};

/// Dimension ordering convention.
///
/// Carried for consistency with other layers; the 1D reduction always treats
/// the input as `[steps, features]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataFormat {
    /// `[steps, features]`.
    #[default]
    ChannelsLast,
    /// `[features, steps]`.
    ChannelsFirst,
}

/// Layer configuration, as found in exported model configs.
///
/// Unknown keys are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PoolingConfig {
    /// Layer name; defaults to the layer class name.
    pub name: Option<String>,
    /// Dimension ordering convention.
    pub data_format: DataFormat,
}

impl PoolingConfig {
    /// Parses a JSON layer config such as `{"data_format": "channels_first"}`.
    ///
    /// # Errors
    /// Returns [`PoolingError::Config`] for malformed JSON or an unknown
    /// `data_format` value.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Sets the layer name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Sets the data format.
    #[must_use]
    pub const fn with_data_format(mut self, data_format: DataFormat) -> Self {
        self.data_format = data_format;
        self
    }
}

/// Decides, after each GPU dispatch, whether the output is copied to the host.
pub type MaterializePolicy = Box<dyn Fn() -> bool + Send>;

/// The lazily created output of the GPU strategy.
///
/// `Uninitialized` until the first call; `Ready` afterwards, holding the
/// output and the feature count it was created for.
#[derive(Debug)]
#[cfg_attr(not(feature = "wgpu"), allow(dead_code))]
enum OutputSlot<T> {
    Uninitialized,
    Ready { value: T, features: usize },
}

impl<T> Default for OutputSlot<T> {
    fn default() -> Self {
        Self::Uninitialized
    }
}

#[cfg_attr(not(feature = "wgpu"), allow(dead_code))]
impl<T> OutputSlot<T> {
    /// Returns the slot's value, creating it on first use.
    ///
    /// Once `Ready`, a different feature count is a shape mismatch; there is
    /// no reallocation path.
    fn get_or_try_init(
        &mut self,
        shape: &[usize],
        features: usize,
        create: impl FnOnce() -> Result<T>,
    ) -> Result<&mut T> {
        if let Self::Ready { features: contract, .. } = self {
            if *contract != features {
                return Err(PoolingError::ShapeMismatch {
                    expected: format!("[steps, {contract}]"),
                    found: shape.to_vec(),
                });
            }
        }
        if matches!(self, Self::Uninitialized) {
            *self = Self::Ready {
                value: create()?,
                features,
            };
        }
        match self {
            Self::Ready { value, .. } => Ok(value),
            Self::Uninitialized => unreachable!("output slot initialized above"),
        }
    }

    fn get(&self) -> Option<&T> {
        match self {
            Self::Ready { value, .. } => Some(value),
            Self::Uninitialized => None,
        }
    }

    fn get_mut(&mut self) -> Option<&mut T> {
        match self {
            Self::Ready { value, .. } => Some(value),
            Self::Uninitialized => None,
        }
    }
}

#[cfg(feature = "wgpu")]
struct GpuState {
    program: gpu::PoolingProgram,
    slot: OutputSlot<Tensor>,
    allocations: usize,
}

#[cfg(feature = "wgpu")]
impl GpuState {
    fn new() -> Result<Self> {
        let program = gpu::PoolingProgram::compile(gpu::gpu_context()?)?;
        Ok(Self {
            program,
            slot: OutputSlot::default(),
            allocations: 0,
        })
    }

    fn call(
        &mut self,
        input: &mut Tensor,
        mode: PoolingMode,
        materialize: &MaterializePolicy,
    ) -> Result<&Tensor> {
        let (steps, features) = pool_dims(input.shape())?;
        let ctx = gpu::gpu_context()?;

        input.create_mirror()?;

        let allocations = &mut self.allocations;
        let output = self.slot.get_or_try_init(input.shape(), features, || {
            let mut out = Tensor::zeros(vec![features]);
            out.allocate_mirror()?;
            *allocations += 1;
            tracing::debug!(features, "allocated GPU pooling output");
            Ok(out)
        })?;

        let (Some(src), Some(dst)) = (input.mirror(), output.mirror()) else {
            return Err(GpuFailure::Dispatch("tensor mirror missing after upload".into()).into());
        };
        self.program.dispatch(ctx, src, dst, steps, features, mode)?;
        output.mark_device_written();

        if materialize() {
            output.transfer_from_mirror()?;
            tracing::debug!(features, "eagerly transferred pooling output");
        }
        Ok(&*output)
    }
}

enum Strategy {
    Cpu { output: Option<Tensor> },
    #[cfg(feature = "wgpu")]
    Gpu(GpuState),
}

impl Strategy {
    fn select(backend: Backend) -> Result<Self> {
        #[cfg(feature = "wgpu")]
        {
            if backend.gpu_capable() {
                return Ok(Self::Gpu(GpuState::new()?));
            }
        }
        if backend == Backend::Wgpu {
            tracing::warn!("built without the `wgpu` feature; global pooling runs on the CPU");
        }
        Ok(Self::Cpu { output: None })
    }

    const fn kind(&self) -> &'static str {
        match self {
            Self::Cpu { .. } => "cpu",
            #[cfg(feature = "wgpu")]
            Self::Gpu(_) => "gpu",
        }
    }
}

/// Global max/average pooling over the step axis of a 1D sequence.
///
/// Not meant for concurrent use: one instance per graph or thread. The
/// cached GPU output is mutated in place on every call.
pub struct GlobalPooling1D {
    name: String,
    layer_class: &'static str,
    mode: PoolingMode,
    data_format: DataFormat,
    strategy: Strategy,
    #[cfg_attr(not(feature = "wgpu"), allow(dead_code))]
    materialize: MaterializePolicy,
}

impl GlobalPooling1D {
    /// Creates a layer on the default backend (see [`crate::backend::get_backend`]).
    ///
    /// # Errors
    /// Returns [`PoolingError::Gpu`] if the GPU backend is selected and the
    /// kernel cannot be compiled.
    pub fn new(mode: PoolingMode, config: PoolingConfig) -> Result<Self> {
        Self::with_backend(mode, config, get_backend())
    }

    /// A `GlobalMaxPooling1D` layer on the default backend.
    ///
    /// # Errors
    /// See [`GlobalPooling1D::new`].
    pub fn max(config: PoolingConfig) -> Result<Self> {
        Self::new(PoolingMode::Max, config)
    }

    /// A `GlobalAveragePooling1D` layer on the default backend.
    ///
    /// # Errors
    /// See [`GlobalPooling1D::new`].
    pub fn average(config: PoolingConfig) -> Result<Self> {
        Self::new(PoolingMode::Average, config)
    }

    /// Creates a layer on an explicit backend.
    ///
    /// `Backend::Wgpu` falls back to the CPU, with a warning, when the crate
    /// was built without the `wgpu` feature.
    ///
    /// # Errors
    /// Returns [`PoolingError::Gpu`] if the GPU context or kernel cannot be
    /// created. This is not retried.
    pub fn with_backend(mode: PoolingMode, config: PoolingConfig, backend: Backend) -> Result<Self> {
        let layer_class = match mode {
            PoolingMode::Max => "GlobalMaxPooling1D",
            PoolingMode::Average => "GlobalAveragePooling1D",
        };
        let strategy = Strategy::select(backend)?;
        let name = config.name.unwrap_or_else(|| layer_class.to_owned());

        tracing::debug!(
            name = %name,
            ?mode,
            data_format = ?config.data_format,
            strategy = strategy.kind(),
            "constructed global pooling layer"
        );

        Ok(Self {
            name,
            layer_class,
            mode,
            data_format: config.data_format,
            strategy,
            materialize: Box::new(|| true),
        })
    }

    /// Pools `input` (`[steps, features]`) into a `[features]` tensor.
    ///
    /// On the GPU backend `input` may gain a GPU mirror; its logical values
    /// are never changed. The returned tensor is GPU-resident (host reads
    /// return `None`) when the materialization policy declined the transfer.
    ///
    /// # Errors
    /// - [`PoolingError::ShapeMismatch`] if `input` is not rank 2, has no
    ///   features, or (GPU) its feature count differs from the first call.
    /// - [`PoolingError::EmptySequence`] if `steps == 0`.
    /// - [`PoolingError::HostUnavailable`] if the CPU backend is handed a
    ///   GPU-resident tensor.
    /// - [`PoolingError::Gpu`] on any GPU resource or dispatch failure.
    pub fn call(&mut self, input: &mut Tensor) -> Result<&Tensor> {
        match &mut self.strategy {
            Strategy::Cpu { output } => {
                let pooled = cpu::global_pool(input, self.mode)?;
                Ok(&*output.insert(pooled))
            }
            #[cfg(feature = "wgpu")]
            Strategy::Gpu(state) => state.call(input, self.mode, &self.materialize),
        }
    }

    /// Copies a GPU-resident output back to the host.
    ///
    /// Returns `None` before the first call.
    ///
    /// # Errors
    /// Returns [`PoolingError::Gpu`] if the readback fails.
    pub fn materialize_output(&mut self) -> Result<Option<&Tensor>> {
        match &mut self.strategy {
            Strategy::Cpu { output } => Ok(output.as_ref()),
            #[cfg(feature = "wgpu")]
            Strategy::Gpu(state) => match state.slot.get_mut() {
                Some(output) => {
                    output.transfer_from_mirror()?;
                    Ok(Some(&*output))
                }
                None => Ok(None),
            },
        }
    }

    /// Sets the number of downstream consumers.
    ///
    /// With no consumers the GPU output is transferred to the host after
    /// every call; otherwise it is left GPU-resident.
    pub fn set_outbound(&mut self, count: usize) {
        self.materialize = Box::new(move || count == 0);
    }

    /// Installs a custom materialization policy.
    pub fn set_materialize_policy(&mut self, policy: impl Fn() -> bool + Send + 'static) {
        self.materialize = Box::new(policy);
    }

    /// The most recent output, if any.
    #[must_use]
    pub fn output(&self) -> Option<&Tensor> {
        match &self.strategy {
            Strategy::Cpu { output } => output.as_ref(),
            #[cfg(feature = "wgpu")]
            Strategy::Gpu(state) => state.slot.get(),
        }
    }

    /// How many output tensors (each with a mirror) the GPU backend has
    /// allocated. Always `0` on the CPU and at most `1` on the GPU.
    #[must_use]
    pub const fn output_allocations(&self) -> usize {
        match &self.strategy {
            Strategy::Cpu { .. } => 0,
            #[cfg(feature = "wgpu")]
            Strategy::Gpu(state) => state.allocations,
        }
    }

    /// Whether this layer runs on the GPU.
    #[must_use]
    pub const fn is_gpu(&self) -> bool {
        !matches!(self.strategy, Strategy::Cpu { .. })
    }

    /// Layer name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Layer class, `GlobalMaxPooling1D` or `GlobalAveragePooling1D`.
    #[must_use]
    pub const fn layer_class(&self) -> &'static str {
        self.layer_class
    }

    /// The configured pooling mode.
    #[must_use]
    pub const fn mode(&self) -> PoolingMode {
        self.mode
    }

    /// The configured data format.
    #[must_use]
    pub const fn data_format(&self) -> DataFormat {
        self.data_format
    }
}

impl core::fmt::Debug for GlobalPooling1D {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("GlobalPooling1D")
            .field("name", &self.name)
            .field("layer_class", &self.layer_class)
            .field("mode", &self.mode)
            .field("data_format", &self.data_format)
            .field("strategy", &self.strategy.kind())
            .finish_non_exhaustive()
    }
}
