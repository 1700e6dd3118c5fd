//! GPU global pooling using WGPU.
//!
//! This module is the GPU runtime behind the pooling operators. It handles:
//!
//! - GPU context initialization, shared process-wide via `lazy_static`
//! - validation and compilation of the WGSL reduction kernel into a
//!   [`PoolingProgram`]
//! - [`GpuMirror`] storage buffers that shadow tensor data on the device
//! - dispatch of the kernel and readback of its results
//!
//! The kernel contract is fixed: binding `0` is a uniform block holding
//! `channelDataSize` (rows to reduce per column), `isMaxPooling` (non-zero
//! selects max, zero selects average) and `features` (the surface width);
//! binding `1` is the input surface `x`; binding `2` is the output.
//!
//! Everything here is synchronous. Async `wgpu` calls are driven to
//! completion with `pollster::block_on` and `Device::poll`.

use crate::error::GpuFailure;
use crate::ops::PoolingMode;
use bytemuck::{Pod, Zeroable};
use std::sync::mpsc;
use wgpu::util::DeviceExt;

const GLOBAL_POOL: &str = include_str!("shaders/global_pool.wgsl");

const WORKGROUP_SIZE: u32 = 64;

/// Basic wrapper for GPU acquisition errors.
#[derive(Debug, thiserror::Error)]
pub enum GpuError {
    /// An error in requesting the adapter.
    #[error("adapter error: {0}")]
    Adapter(wgpu::RequestAdapterError),
    /// An error in requesting the device.
    #[error("device error: {0}")]
    Device(wgpu::RequestDeviceError),
}

/// Holds the WGPU device and queue used for executing compute pipelines.
///
/// Initialized once globally and reused for all operations via `lazy_static`.
pub struct GpuContext {
    /// The actual GPU device.
    pub device: wgpu::Device,
    /// A queue for information related to the device.
    pub queue: wgpu::Queue,
    /// The adapter the device was created on.
    pub adapter: wgpu::AdapterInfo,
}

impl GpuContext {
    /// Initializes a new GPU context, selecting the default adapter and creating a device + queue.
    ///
    /// # Errors
    ///
    /// Returns [`GpuError`] if adapter or device acquisition fails.
    ///
    /// # Internals
    ///
    /// - Uses `pollster::block_on` to synchronously wait for async WGPU calls
    /// - Selects the default adapter with default options
    /// - Enables default limits and features for broad compatibility
    pub fn new() -> Result<Self, GpuError> {
        let instance = wgpu::Instance::default();
        let adapter =
            pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions::default()))
                .map_err(GpuError::Adapter)?;
        let info = adapter.get_info();
        tracing::info!(adapter = %info.name, backend = ?info.backend, "acquired GPU adapter");

        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("briny_pool"),
            required_features: wgpu::Features::empty(),
            required_limits: wgpu::Limits::default(),
            memory_hints: wgpu::MemoryHints::Performance,
            trace: wgpu::Trace::default(),
        }))
        .map_err(GpuError::Device)?;

        Ok(Self {
            device,
            queue,
            adapter: info,
        })
    }
}

lazy_static::lazy_static! {
    static ref GPU_CONTEXT: Result<GpuContext, GpuError> = GpuContext::new();
}

/// The process-wide GPU context, created on first use.
///
/// # Errors
///
/// Returns [`GpuFailure::Unavailable`] if no adapter or device could be
/// acquired. The failure is cached; later calls fail the same way.
pub fn gpu_context() -> Result<&'static GpuContext, GpuFailure> {
    (*GPU_CONTEXT).as_ref().map_err(|e| {
        tracing::warn!(error = %e, "GPU context unavailable");
        GpuFailure::Unavailable(e.to_string())
    })
}

/// Rejects shader sources that cannot be the pooling kernel.
fn validate_wgsl(label: &'static str, src: &str) -> Result<(), GpuFailure> {
    let ok = src.len() <= 65536
        && src.contains("fn main")
        && !src.contains("#include")
        && ["channelDataSize", "isMaxPooling", "var<uniform>"]
            .iter()
            .all(|needle| src.contains(needle));
    if ok { Ok(()) } else { Err(GpuFailure::InvalidShader(label)) }
}

fn load_shader(device: &wgpu::Device, label: &str, source: &str) -> wgpu::ShaderModule {
    device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(label),
        source: wgpu::ShaderSource::Wgsl(source.into()),
    })
}

const fn storage_entry(binding: u32, read_only: bool) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

/// Uniform block matching `PoolParams` in the kernel.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct PoolParams {
    channel_data_size: u32,
    is_max_pooling: u32,
    features: u32,
    padding: u32,
}

/// A device-side storage buffer mirroring a tensor's `f32` data.
#[derive(Debug)]
pub struct GpuMirror {
    buffer: wgpu::Buffer,
    len: usize,
}

impl GpuMirror {
    const USAGE: wgpu::BufferUsages = wgpu::BufferUsages::STORAGE
        .union(wgpu::BufferUsages::COPY_SRC)
        .union(wgpu::BufferUsages::COPY_DST);

    /// Uploads `data` into a new storage buffer.
    pub(crate) fn upload(ctx: &GpuContext, data: &[f32]) -> Self {
        // bindings must not be zero-sized
        let padding = [0.0f32];
        let contents = if data.is_empty() { &padding[..] } else { data };
        let buffer = ctx.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("mirror"),
            contents: bytemuck::cast_slice(contents),
            usage: Self::USAGE,
        });
        tracing::trace!(elements = data.len(), "uploaded tensor mirror");
        Self { buffer, len: data.len() }
    }

    /// Creates a zero-filled storage buffer of `len` elements.
    pub(crate) fn zeroed(ctx: &GpuContext, len: usize) -> Self {
        let buffer = ctx.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("mirror"),
            size: Self::byte_size(len),
            usage: Self::USAGE,
            mapped_at_creation: false,
        });
        Self { buffer, len }
    }

    const fn byte_size(len: usize) -> u64 {
        let elems = if len == 0 { 1 } else { len };
        (elems * size_of::<f32>()) as u64
    }

    /// Number of `f32` elements mirrored.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Whether the mirror holds no elements.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Copies the buffer back into `out`, blocking until the GPU is done.
    pub(crate) fn read_into(&self, ctx: &GpuContext, out: &mut [f32]) -> Result<(), GpuFailure> {
        if out.len() != self.len {
            return Err(GpuFailure::Readback(format!(
                "host buffer holds {} elements, mirror holds {}",
                out.len(),
                self.len
            )));
        }
        let size = Self::byte_size(self.len);

        let staging = ctx.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("mirror_staging"),
            size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let mut encoder = ctx
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("mirror_readback_encoder"),
            });
        encoder.copy_buffer_to_buffer(&self.buffer, 0, &staging, 0, size);
        ctx.queue.submit(Some(encoder.finish()));

        let slice = staging.slice(..);
        let (tx, rx) = mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });

        ctx.device
            .poll(wgpu::PollType::Wait)
            .map_err(|e| GpuFailure::Readback(e.to_string()))?;
        rx.recv()
            .map_err(|e| GpuFailure::Readback(e.to_string()))?
            .map_err(|e| GpuFailure::Readback(e.to_string()))?;

        {
            let view = slice.get_mapped_range();
            let floats: &[f32] =
                bytemuck::try_cast_slice(&*view).map_err(|e| GpuFailure::Readback(e.to_string()))?;
            out.copy_from_slice(&floats[..self.len]);
        }
        staging.unmap();

        tracing::trace!(elements = self.len, "transferred mirror to host");
        Ok(())
    }
}

/// The compiled global pooling kernel.
///
/// Owned by one operator for its whole lifetime.
pub struct PoolingProgram {
    bind_group_layout: wgpu::BindGroupLayout,
    pipeline: wgpu::ComputePipeline,
}

impl PoolingProgram {
    /// Validates and compiles the reduction kernel.
    ///
    /// # Errors
    ///
    /// - [`GpuFailure::InvalidShader`] if the source is rejected up front.
    /// - [`GpuFailure::Compile`] if `wgpu` reports a validation error while
    ///   building the shader module or pipeline.
    pub fn compile(ctx: &GpuContext) -> Result<Self, GpuFailure> {
        validate_wgsl("global_pool", GLOBAL_POOL)?;

        let device = &ctx.device;
        device.push_error_scope(wgpu::ErrorFilter::Validation);

        let module = load_shader(device, "global_pool", GLOBAL_POOL);
        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("global_pool_bgl"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                storage_entry(1, true),
                storage_entry(2, false),
            ],
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("global_pool_pipeline_layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });
        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("global_pool_pipeline"),
            layout: Some(&pipeline_layout),
            module: &module,
            entry_point: Some("main"),
            cache: None,
            compilation_options: wgpu::PipelineCompilationOptions::default(),
        });

        if let Some(err) = pollster::block_on(device.pop_error_scope()) {
            return Err(GpuFailure::Compile(err.to_string()));
        }
        tracing::debug!("compiled global pooling program");

        Ok(Self {
            bind_group_layout,
            pipeline,
        })
    }

    /// Runs the kernel over a `[steps, features]` surface.
    ///
    /// The results stay in `output`; nothing is read back here.
    ///
    /// # Errors
    ///
    /// Returns [`GpuFailure::Dispatch`] if the mirrors are too small for the
    /// given dimensions, the dimensions exceed device limits, or `wgpu`
    /// reports a validation error during encoding.
    pub fn dispatch(
        &self,
        ctx: &GpuContext,
        input: &GpuMirror,
        output: &GpuMirror,
        steps: usize,
        features: usize,
        mode: PoolingMode,
    ) -> Result<(), GpuFailure> {
        let needed = steps
            .checked_mul(features)
            .ok_or_else(|| GpuFailure::Dispatch("input surface size overflows".into()))?;
        if input.len() < needed || output.len() < features {
            return Err(GpuFailure::Dispatch(format!(
                "mirror sizes ({} in, {} out) do not fit a [{steps}, {features}] surface",
                input.len(),
                output.len()
            )));
        }

        let to_u32 = |v: usize| {
            u32::try_from(v).map_err(|_| GpuFailure::Dispatch(format!("{v} exceeds u32 range")))
        };
        let params = PoolParams {
            channel_data_size: to_u32(steps)?,
            is_max_pooling: u32::from(mode.is_max()),
            features: to_u32(features)?,
            padding: 0,
        };

        let groups = params.features.div_ceil(WORKGROUP_SIZE);
        let limit = ctx.device.limits().max_compute_workgroups_per_dimension;
        if groups > limit {
            return Err(GpuFailure::Dispatch(format!(
                "{features} features need {groups} workgroups, device allows {limit}"
            )));
        }

        let device = &ctx.device;
        device.push_error_scope(wgpu::ErrorFilter::Validation);

        let params_buf = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("global_pool_params"),
            contents: bytemuck::bytes_of(&params),
            usage: wgpu::BufferUsages::UNIFORM,
        });

        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("global_pool_bind_group"),
            layout: &self.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: params_buf.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: input.buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: output.buffer.as_entire_binding(),
                },
            ],
        });

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("global_pool_encoder"),
        });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("global_pool_pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.dispatch_workgroups(groups, 1, 1);
        }
        ctx.queue.submit(Some(encoder.finish()));

        if let Some(err) = pollster::block_on(device.pop_error_scope()) {
            return Err(GpuFailure::Dispatch(err.to_string()));
        }
        tracing::trace!(steps, features, ?mode, "dispatched global pooling");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::approx::approx_eq;

    #[test]
    fn bundled_shader_passes_validation() {
        assert!(validate_wgsl("global_pool", GLOBAL_POOL).is_ok());
        assert_eq!(
            validate_wgsl("bogus", "@compute fn entry() {}"),
            Err(GpuFailure::InvalidShader("bogus"))
        );
    }

    #[test]
    fn params_block_is_sixteen_bytes() {
        assert_eq!(size_of::<PoolParams>(), 16);
    }

    #[test]
    fn dispatch_and_read_back() {
        let Ok(ctx) = gpu_context() else {
            return; // no adapter on this machine
        };
        let program = PoolingProgram::compile(ctx).expect("compile failed");

        let input = GpuMirror::upload(ctx, &[1.0, 2.0, 3.0, 0.0, 2.0, 4.0]);
        let output = GpuMirror::zeroed(ctx, 2);
        let mut host = [0.0f32; 2];

        program
            .dispatch(ctx, &input, &output, 3, 2, PoolingMode::Max)
            .expect("dispatch failed");
        output.read_into(ctx, &mut host).expect("readback failed");
        assert!(approx_eq(&host[..], &[3.0, 4.0][..]));

        program
            .dispatch(ctx, &input, &output, 3, 2, PoolingMode::Average)
            .expect("dispatch failed");
        output.read_into(ctx, &mut host).expect("readback failed");
        assert!(approx_eq(&host[..], &[2.0, 2.0][..]));
    }

    #[test]
    fn dispatch_rejects_undersized_mirrors() {
        let Ok(ctx) = gpu_context() else {
            return;
        };
        let program = PoolingProgram::compile(ctx).expect("compile failed");
        let input = GpuMirror::upload(ctx, &[1.0, 2.0]);
        let output = GpuMirror::zeroed(ctx, 2);
        let err = program
            .dispatch(ctx, &input, &output, 3, 2, PoolingMode::Max)
            .unwrap_err();
        assert!(matches!(err, GpuFailure::Dispatch(_)));
    }
}
