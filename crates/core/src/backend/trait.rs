//! Backend trait definition
//!
//! An `EnsembleBackend` owns the device-side copy of the ensemble and the device
//! parameter set, and runs the field kernel over it. Both the host (rayon) and GPU
//! (wgpu) implementations provide it, so the loop never needs to know which one runs.

use crate::device::DeviceCandidate;
use crate::ensemble::SamplePoint;
use crate::error::SimError;
use crate::kernel::FieldParams;

/// Backend-agnostic device operations used by the simulation loop
///
/// Every call blocks until the device has accepted (or, in per-operation checking,
/// finished) the work.
pub trait EnsembleBackend: Send {
    /// Push the read-only device parameter set
    ///
    /// # Errors
    /// Device errors raised while writing the parameters
    fn upload_params(&mut self, params: &FieldParams) -> Result<(), SimError>;

    /// Allocate device storage (on first use) and copy the host ensemble into it
    ///
    /// # Errors
    /// [`SimError::Allocation`] if storage cannot be allocated, otherwise device errors
    fn upload_points(&mut self, points: &[SamplePoint]) -> Result<(), SimError>;

    /// Run the field kernel once over every point with elapsed time `time`
    ///
    /// `time` is the same for every point of the pass.
    ///
    /// # Errors
    /// Device errors from the dispatch, including watchdog aborts
    fn dispatch(&mut self, time: f32) -> Result<(), SimError>;

    /// Copy the device ensemble into `out`, which must have the uploaded length
    ///
    /// # Errors
    /// Device errors from the copy or mapping
    fn download_points(&mut self, out: &mut [SamplePoint]) -> Result<(), SimError>;

    /// Surface any device error recorded since the last check
    ///
    /// # Errors
    /// The first pending device error, attributed to `operation`
    fn check(&mut self, operation: &str) -> Result<(), SimError>;

    /// Free device storage. Safe to call more than once.
    fn release(&mut self);

    /// Whether device storage is currently held
    fn is_allocated(&self) -> bool;

    /// Name of the field function this backend evaluates
    fn kernel_name(&self) -> &'static str;

    /// The device this backend runs on
    fn device(&self) -> &DeviceCandidate;

    /// Whether this is the GPU backend
    fn is_accelerated(&self) -> bool;
}
