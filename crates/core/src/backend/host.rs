//! Host backend
//!
//! Keeps its "device" copy of the ensemble in a separate `Vec` and evaluates the
//! field function over it with Rayon. Always available, and the reference the GPU
//! backend is validated against.

use super::EnsembleBackend;
use crate::device::DeviceCandidate;
use crate::ensemble::{ensemble_bytes, SamplePoint};
use crate::error::SimError;
use crate::kernel::{FieldFunction, FieldParams};
use rayon::prelude::*;
use std::sync::Arc;
use tracing::debug;

/// Rayon-parallel backend
pub struct HostBackend {
    function: Arc<dyn FieldFunction>,
    params: Option<FieldParams>,
    points: Option<Vec<SamplePoint>>,
    device: DeviceCandidate,
}

impl HostBackend {
    /// Create a host backend for `function`
    #[must_use]
    pub fn new(function: Arc<dyn FieldFunction>) -> Self {
        Self {
            function,
            params: None,
            points: None,
            device: DeviceCandidate::host(rayon::current_num_threads()),
        }
    }
}

impl EnsembleBackend for HostBackend {
    fn upload_params(&mut self, params: &FieldParams) -> Result<(), SimError> {
        self.params = Some(*params);
        Ok(())
    }

    fn upload_points(&mut self, points: &[SamplePoint]) -> Result<(), SimError> {
        let storage = match &mut self.points {
            Some(storage) if storage.len() == points.len() => storage,
            slot => {
                let mut storage = Vec::new();
                storage
                    .try_reserve_exact(points.len())
                    .map_err(|e| SimError::Allocation {
                        operation: "allocate device ensemble",
                        bytes: ensemble_bytes(points.len()),
                        message: e.to_string(),
                    })?;
                storage.resize(points.len(), SamplePoint::default());
                debug!("Allocated host-side device ensemble of {} points", points.len());
                slot.insert(storage)
            }
        };
        storage.copy_from_slice(points);
        Ok(())
    }

    fn dispatch(&mut self, time: f32) -> Result<(), SimError> {
        let params = self
            .params
            .ok_or_else(|| SimError::device("dispatch field kernel", "parameters not uploaded"))?;
        let points = self
            .points
            .as_mut()
            .ok_or_else(|| SimError::device("dispatch field kernel", "ensemble not uploaded"))?;
        let function = self.function.as_ref();

        points.par_iter_mut().for_each(|point| {
            point.field = function.evaluate(point.position(), time, &params);
        });
        Ok(())
    }

    fn download_points(&mut self, out: &mut [SamplePoint]) -> Result<(), SimError> {
        let points = self.points.as_ref().ok_or_else(|| {
            SimError::device("copy ensemble device to host", "ensemble not uploaded")
        })?;
        if points.len() != out.len() {
            return Err(SimError::device(
                "copy ensemble device to host",
                format!("length mismatch: device {} vs host {}", points.len(), out.len()),
            ));
        }
        out.copy_from_slice(points);
        Ok(())
    }

    fn check(&mut self, _operation: &str) -> Result<(), SimError> {
        Ok(())
    }

    fn release(&mut self) {
        self.points = None;
    }

    fn is_allocated(&self) -> bool {
        self.points.is_some()
    }

    fn kernel_name(&self) -> &'static str {
        self.function.name()
    }

    fn device(&self) -> &DeviceCandidate {
        &self.device
    }

    fn is_accelerated(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::{ElapsedTime, WavePacket, WavePacketInputs};

    fn points() -> Vec<SamplePoint> {
        vec![
            SamplePoint::at(0.0, 0.0),
            SamplePoint::at(1.0, 0.0),
            SamplePoint::at(0.0, 2.0),
            SamplePoint::at(-3.0, 4.0),
        ]
    }

    #[test]
    fn test_dispatch_requires_upload() {
        let mut backend = HostBackend::new(Arc::new(ElapsedTime));
        assert!(backend.dispatch(0.1).is_err());
        backend.upload_params(&FieldParams::default()).unwrap();
        assert!(backend.dispatch(0.1).is_err());
        backend.upload_points(&points()).unwrap();
        assert!(backend.dispatch(0.1).is_ok());
    }

    #[test]
    fn test_every_point_sees_same_time() {
        let mut backend = HostBackend::new(Arc::new(ElapsedTime));
        backend.upload_params(&FieldParams::default()).unwrap();
        backend.upload_points(&points()).unwrap();
        backend.dispatch(0.25).unwrap();

        let mut out = points();
        backend.download_points(&mut out).unwrap();
        assert!(out.iter().all(|p| p.field == 0.25));
        // positions untouched
        assert_eq!(out[3].x, -3.0);
        assert_eq!(out[3].y, 4.0);
    }

    #[test]
    fn test_matches_direct_evaluation() {
        let params = WavePacketInputs::default().derive();
        let mut backend = HostBackend::new(Arc::new(WavePacket));
        backend.upload_params(&params).unwrap();
        backend.upload_points(&points()).unwrap();
        backend.dispatch(1.5).unwrap();

        let mut out = points();
        backend.download_points(&mut out).unwrap();
        for p in &out {
            assert_eq!(p.field, WavePacket.evaluate(p.position(), 1.5, &params));
        }
    }

    #[test]
    fn test_download_length_mismatch() {
        let mut backend = HostBackend::new(Arc::new(ElapsedTime));
        backend.upload_points(&points()).unwrap();
        let mut short = vec![SamplePoint::default(); 2];
        assert!(backend.download_points(&mut short).is_err());
    }

    #[test]
    fn test_release() {
        let mut backend = HostBackend::new(Arc::new(ElapsedTime));
        backend.upload_points(&points()).unwrap();
        assert!(backend.is_allocated());
        backend.release();
        backend.release();
        assert!(!backend.is_allocated());
        assert!(!backend.is_accelerated());
    }
}
