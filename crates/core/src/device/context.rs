//! wgpu device binding
//!
//! Enumerates adapters, ranks them with [`select_best`](super::select_best), and
//! opens a device and queue on the winner. Every later allocation and dispatch goes
//! through this context.

use super::{choose, ApiKind, DeviceCandidate, DeviceKind, ADAPTER_OVERRIDE_ENV};
use crate::error::SimError;
use tracing::{debug, info, warn};

/// GPU context managing the selected device and its queue
#[derive(Debug)]
pub struct GpuContext {
    device: wgpu::Device,
    queue: wgpu::Queue,
    candidate: DeviceCandidate,
}

fn device_kind(kind: wgpu::DeviceType) -> DeviceKind {
    match kind {
        wgpu::DeviceType::DiscreteGpu => DeviceKind::Discrete,
        wgpu::DeviceType::IntegratedGpu => DeviceKind::Integrated,
        wgpu::DeviceType::VirtualGpu => DeviceKind::Virtual,
        wgpu::DeviceType::Cpu => DeviceKind::Cpu,
        wgpu::DeviceType::Other => DeviceKind::Other,
    }
}

fn api_kind(backend: wgpu::Backend) -> ApiKind {
    match backend {
        wgpu::Backend::Vulkan => ApiKind::Vulkan,
        wgpu::Backend::Metal => ApiKind::Metal,
        wgpu::Backend::Dx12 => ApiKind::Dx12,
        wgpu::Backend::Gl => ApiKind::Gl,
        wgpu::Backend::BrowserWebGpu => ApiKind::WebGpu,
        wgpu::Backend::Empty => ApiKind::Empty,
        #[allow(unreachable_patterns)]
        _ => ApiKind::Empty,
    }
}

fn candidate_for(index: usize, info: &wgpu::AdapterInfo) -> DeviceCandidate {
    DeviceCandidate::new(
        index,
        info.name.clone(),
        device_kind(info.device_type),
        api_kind(info.backend),
    )
}

fn create_instance() -> wgpu::Instance {
    wgpu::Instance::new(wgpu::InstanceDescriptor {
        backends: wgpu::Backends::all(),
        ..Default::default()
    })
}

impl GpuContext {
    /// List every adapter wgpu can see, in enumeration order
    #[must_use]
    pub fn enumerate() -> Vec<DeviceCandidate> {
        create_instance()
            .enumerate_adapters(wgpu::Backends::all())
            .iter()
            .enumerate()
            .map(|(i, adapter)| candidate_for(i, &adapter.get_info()))
            .collect()
    }

    /// Select the best adapter and bind a device to it
    ///
    /// Honors the `WAVEPACKET_ADAPTER` override when set.
    ///
    /// # Errors
    /// - [`SimError::NoDevice`] if no adapter exists (or none matches the override)
    /// - [`SimError::DeviceExecution`] if the device cannot be opened
    pub fn select() -> Result<Self, SimError> {
        let selector = std::env::var(ADAPTER_OVERRIDE_ENV).ok();
        Self::select_with(selector.as_deref())
    }

    /// Like [`select`](Self::select) with an explicit override instead of the environment
    ///
    /// # Errors
    /// Same as [`select`](Self::select)
    pub fn select_with(selector: Option<&str>) -> Result<Self, SimError> {
        info!("Enumerating GPU adapters");

        let instance = create_instance();
        let mut adapters = instance.enumerate_adapters(wgpu::Backends::all());
        let candidates: Vec<DeviceCandidate> = adapters
            .iter()
            .enumerate()
            .map(|(i, adapter)| candidate_for(i, &adapter.get_info()))
            .collect();

        for candidate in &candidates {
            debug!("Found adapter {}", candidate);
        }

        let chosen = choose(&candidates, selector)?.clone();
        let adapter = adapters.swap_remove(chosen.index);

        info!(
            "Selected device {} '{}' (capability score {})",
            chosen.index, chosen.name, chosen.score
        );
        if chosen.watchdog {
            warn!(
                "Device '{}' enforces an execution watchdog; long kernel passes may be aborted",
                chosen.name
            );
        }

        // Ask for the adapter's own limits so large ensembles fit in one storage binding
        let (device, queue) = pollster::block_on(adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: Some("Wavepacket GPU"),
                required_features: wgpu::Features::empty(),
                required_limits: adapter.limits(),
                memory_hints: wgpu::MemoryHints::Performance,
            },
            None,
        ))
        .map_err(|e| SimError::device("open device", e))?;

        Ok(Self {
            device,
            queue,
            candidate: chosen,
        })
    }

    /// Description of the bound device
    #[must_use]
    pub fn candidate(&self) -> &DeviceCandidate {
        &self.candidate
    }

    /// Get reference to wgpu device
    #[must_use]
    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    /// Get reference to wgpu queue
    #[must_use]
    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    /// Largest ensemble (in bytes) a single storage binding can hold
    #[must_use]
    pub fn max_ensemble_bytes(&self) -> u64 {
        let limits = self.device.limits();
        u64::from(limits.max_storage_buffer_binding_size).min(limits.max_buffer_size)
    }
}
