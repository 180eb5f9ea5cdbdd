//! Host mirror of the device-resident ensemble
//!
//! The host and device copies are two distinct storage locations. They only agree
//! right after [`EnsembleMirror::push_to_device`] or [`EnsembleMirror::pull_from_device`];
//! every kernel pass bumps the device generation and leaves the host copy stale until
//! the next pull.

use super::{ensemble_bytes, place_points, SamplePoint};
use crate::backend::EnsembleBackend;
use crate::config::Placement;
use crate::error::SimError;

/// Host copy of the ensemble plus generation bookkeeping
#[derive(Debug)]
pub struct EnsembleMirror {
    host: Vec<SamplePoint>,
    len: usize,
    host_generation: u64,
    device_generation: u64,
    on_device: bool,
}

impl EnsembleMirror {
    /// Allocate host storage for `len` points
    ///
    /// # Errors
    /// Returns [`SimError::Allocation`] if the host allocator refuses the request
    pub fn allocate(len: usize) -> Result<Self, SimError> {
        let mut host = Vec::new();
        host.try_reserve_exact(len)
            .map_err(|e| SimError::Allocation {
                operation: "allocate host ensemble",
                bytes: ensemble_bytes(len),
                message: e.to_string(),
            })?;
        host.resize(len, SamplePoint::default());
        Ok(Self {
            host,
            len,
            host_generation: 0,
            device_generation: 0,
            on_device: false,
        })
    }

    /// Assign positions on the host
    ///
    /// # Errors
    /// Returns [`SimError::InvalidConfig`] once the ensemble has been pushed to the device;
    /// positions are write-once.
    pub fn place(&mut self, limit: f32, placement: Placement) -> Result<(), SimError> {
        if self.on_device {
            return Err(SimError::InvalidConfig(
                "positions are fixed once the ensemble is on the device".into(),
            ));
        }
        place_points(&mut self.host, limit, placement);
        Ok(())
    }

    /// Copy the host ensemble to the device (initial upload)
    ///
    /// # Errors
    /// Propagates allocation and device errors from the backend
    pub fn push_to_device(&mut self, backend: &mut dyn EnsembleBackend) -> Result<(), SimError> {
        backend.upload_points(&self.host)?;
        self.on_device = true;
        self.device_generation = self.host_generation;
        Ok(())
    }

    /// Note that a kernel pass has mutated the device copy
    pub fn record_device_pass(&mut self) {
        self.device_generation += 1;
    }

    /// Copy the device ensemble back into host memory and return the fresh copy
    ///
    /// # Errors
    /// Propagates device errors from the backend
    pub fn pull_from_device(
        &mut self,
        backend: &mut dyn EnsembleBackend,
    ) -> Result<&[SamplePoint], SimError> {
        backend.download_points(&mut self.host)?;
        self.host_generation = self.device_generation;
        Ok(&self.host)
    }

    /// Host copy, but only if nothing has touched the device since the last pull
    #[must_use]
    pub fn fresh_host(&self) -> Option<&[SamplePoint]> {
        self.is_host_fresh().then_some(self.host.as_slice())
    }

    /// Host copy regardless of freshness (positions are always valid)
    #[must_use]
    pub fn host_unchecked(&self) -> &[SamplePoint] {
        &self.host
    }

    /// Whether the host copy matches the device copy
    #[must_use]
    pub fn is_host_fresh(&self) -> bool {
        self.host_generation == self.device_generation
    }

    /// Generation of the last host synchronization
    #[must_use]
    pub fn host_generation(&self) -> u64 {
        self.host_generation
    }

    /// Number of kernel passes applied to the device copy
    #[must_use]
    pub fn device_generation(&self) -> u64 {
        self.device_generation
    }

    /// Ensemble size N (unchanged by [`release`](Self::release))
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the ensemble holds no points
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Free host storage
    pub fn release(&mut self) {
        self.host = Vec::new();
        self.on_device = false;
    }

    /// Whether host storage is still held
    #[must_use]
    pub fn is_allocated(&self) -> bool {
        self.host.len() == self.len
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::HostBackend;
    use crate::kernel::{ElapsedTime, FieldParams};
    use std::sync::Arc;

    fn backend() -> HostBackend {
        let mut backend = HostBackend::new(Arc::new(ElapsedTime));
        backend.upload_params(&FieldParams::default()).unwrap();
        backend
    }

    #[test]
    fn test_allocate_exact_len() {
        let mirror = EnsembleMirror::allocate(37).unwrap();
        assert_eq!(mirror.len(), 37);
        assert_eq!(mirror.host_unchecked().len(), 37);
        assert!(mirror.is_host_fresh());
    }

    #[test]
    fn test_staleness_tracking() {
        let mut backend = backend();
        let mut mirror = EnsembleMirror::allocate(4).unwrap();
        mirror.place(1.0, Placement::Polar).unwrap();
        mirror.push_to_device(&mut backend).unwrap();
        assert!(mirror.fresh_host().is_some());

        backend.dispatch(0.5).unwrap();
        mirror.record_device_pass();
        assert!(!mirror.is_host_fresh());
        assert!(mirror.fresh_host().is_none());
        // host copy has not seen the pass yet
        assert!(mirror.host_unchecked().iter().all(|p| p.field == 0.0));

        let fresh = mirror.pull_from_device(&mut backend).unwrap();
        assert!(fresh.iter().all(|p| p.field == 0.5));
        assert_eq!(mirror.host_generation(), 1);
        assert_eq!(mirror.device_generation(), 1);
        assert!(mirror.fresh_host().is_some());
    }

    #[test]
    fn test_positions_are_write_once() {
        let mut backend = backend();
        let mut mirror = EnsembleMirror::allocate(8).unwrap();
        mirror.place(2.0, Placement::Polar).unwrap();
        mirror.push_to_device(&mut backend).unwrap();
        assert!(mirror.place(3.0, Placement::Polar).is_err());
    }

    #[test]
    fn test_release_frees_host() {
        let mut mirror = EnsembleMirror::allocate(8).unwrap();
        mirror.release();
        assert!(!mirror.is_allocated());
        assert_eq!(mirror.len(), 8);
    }
}
