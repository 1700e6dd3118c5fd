//! Backend selection module.
//!
//! This module defines the available computation backends and provides
//! functions to set and get the process-wide default.
//!
//! # Supported Backends
//!
//! - `Cpu` — Pure Rust backend using `rayon` (default).
//! - `Wgpu` — GPU compute shaders through `wgpu` (requires the `wgpu` feature).
//!
//! The backend is stored globally using an `AtomicU8`. Operators read it once
//! when they are constructed; changing it afterwards does not affect operators
//! that already exist.

use core::convert::TryFrom;
use core::sync::atomic::{AtomicU8, Ordering};

/// Enumeration of supported computation backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum Backend {
    /// Pure CPU-based backend (default).
    #[default]
    Cpu = 0,
    /// GPU-accelerated backend using `wgpu`.
    Wgpu,
}

impl Backend {
    /// Whether this backend can actually run on the GPU in this build.
    ///
    /// `Wgpu` only counts as GPU-capable when the crate was compiled with the
    /// `wgpu` feature.
    #[must_use]
    pub const fn gpu_capable(self) -> bool {
        matches!(self, Self::Wgpu) && cfg!(feature = "wgpu")
    }
}

impl TryFrom<u8> for Backend {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Cpu),
            1 => Ok(Self::Wgpu),
            _ => Err(()),
        }
    }
}

/// Internal global state for the active backend.
///
/// The backend changes rarely and is only read at operator construction.
static GLOBAL_DEFAULT_BACKEND: AtomicU8 = AtomicU8::new(Backend::Cpu as u8);

/// Sets the default backend for operators constructed afterwards.
///
/// # Example
///
/// ```
/// use briny_pool::backend::{get_backend, set_backend, Backend};
/// set_backend(Backend::Wgpu);
/// assert_eq!(get_backend(), Backend::Wgpu);
/// ```
pub fn set_backend(b: Backend) {
    GLOBAL_DEFAULT_BACKEND.store(b as u8, Ordering::Release);
}

/// Returns the currently selected default backend.
///
/// If the stored value is invalid, defaults to [`Backend::Cpu`].
pub fn get_backend() -> Backend {
    Backend::try_from(GLOBAL_DEFAULT_BACKEND.load(Ordering::Acquire)).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_u8() {
        assert_eq!(Backend::try_from(Backend::Wgpu as u8), Ok(Backend::Wgpu));
        assert_eq!(Backend::try_from(7), Err(()));
    }

    #[test]
    fn cpu_is_never_gpu_capable() {
        assert!(!Backend::Cpu.gpu_capable());
        assert_eq!(Backend::Wgpu.gpu_capable(), cfg!(feature = "wgpu"));
    }
}
