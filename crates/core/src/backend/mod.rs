//! Ensemble execution backends
//!
//! The core abstraction is the [`EnsembleBackend`] trait, implemented by a Rayon
//! host backend and a wgpu compute backend.
//!
//! # Feature Flags
//!
//! - `gpu` (default): Enables the wgpu backend. Disable with `--no-default-features`
//!   for environments without GPU access; [`BackendChoice::Auto`] then means host.
//!
//! # Backend Selection
//!
//! [`create_backend`] resolves a [`BackendChoice`]:
//! 1. `Host` always uses the Rayon pool
//! 2. `Gpu` requires a device and a field function with a WGSL kernel
//! 3. `Auto` uses the GPU whenever the function can run there, the host otherwise
//!
//! A missing or unusable device is reported, never silently replaced by the host.

mod host;
#[allow(clippy::module_name_repetitions)]
mod r#trait;

#[cfg(feature = "gpu")]
mod gpu;

pub use host::HostBackend;
pub use r#trait::EnsembleBackend;

#[cfg(feature = "gpu")]
pub use gpu::GpuBackend;

use crate::config::{BackendChoice, ErrorCheckMode};
use crate::error::SimError;
use crate::kernel::FieldFunction;
use std::sync::Arc;
use tracing::info;

/// Create an ensemble backend for `function`
///
/// # Errors
/// - [`SimError::InvalidConfig`] if the GPU is requested for a function without a
///   WGSL kernel, or the crate was built without the `gpu` feature
/// - [`SimError::NoDevice`] / [`SimError::DeviceExecution`] if no usable device exists
#[cfg_attr(not(feature = "gpu"), allow(unused_variables))]
pub fn create_backend(
    choice: BackendChoice,
    function: Arc<dyn FieldFunction>,
    check_mode: ErrorCheckMode,
) -> Result<Box<dyn EnsembleBackend>, SimError> {
    let use_gpu = match choice {
        BackendChoice::Host => false,
        BackendChoice::Gpu => {
            if function.wgsl().is_none() {
                return Err(SimError::InvalidConfig(format!(
                    "field function '{}' has no device kernel",
                    function.name()
                )));
            }
            true
        }
        BackendChoice::Auto => cfg!(feature = "gpu") && function.wgsl().is_some(),
    };

    if use_gpu {
        #[cfg(feature = "gpu")]
        {
            let context = crate::device::GpuContext::select()?;
            info!(
                "Using GPU backend: {} for '{}' ({:?} error checking)",
                context.candidate().name,
                function.name(),
                check_mode
            );
            return Ok(Box::new(GpuBackend::new(
                context,
                function.as_ref(),
                check_mode,
            )?));
        }

        #[cfg(not(feature = "gpu"))]
        return Err(SimError::InvalidConfig(
            "GPU backend requested but the gpu feature is disabled".into(),
        ));
    }

    let backend = HostBackend::new(function);
    info!("Using host backend: {}", backend.device().name);
    Ok(Box::new(backend))
}
