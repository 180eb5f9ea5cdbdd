//! Accelerator discovery and selection
//!
//! Candidates are ranked by a capability score (device class as the "major"
//! generation, graphics API as the "minor"). The strictly greatest score wins and
//! ties keep the first candidate enumerated. Selection is a pure function over
//! [`DeviceCandidate`]s so it can be tested without hardware. The wgpu-backed
//! [`GpuContext`] feeds it real adapters when the `gpu` feature is enabled.
//!
//! Set `WAVEPACKET_ADAPTER=<index>` or `WAVEPACKET_ADAPTER=<name substring>` to bypass
//! the ranking.

#[cfg(feature = "gpu")]
mod context;

#[cfg(feature = "gpu")]
pub use context::GpuContext;

use crate::error::SimError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Environment variable that forces a specific adapter
pub const ADAPTER_OVERRIDE_ENV: &str = "WAVEPACKET_ADAPTER";

/// Class of accelerator, ordered from least to most capable
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum DeviceKind {
    /// Unknown device class
    Other,
    /// Software rasterizer or host thread pool
    Cpu,
    /// Virtualized GPU
    Virtual,
    /// GPU sharing memory with the host
    Integrated,
    /// Dedicated GPU
    Discrete,
}

/// Graphics/compute API the device is driven through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ApiKind {
    /// Vulkan
    Vulkan,
    /// Metal
    Metal,
    /// Direct3D 12
    Dx12,
    /// OpenGL / GLES
    Gl,
    /// Browser WebGPU
    WebGpu,
    /// Host threads, no graphics API
    Host,
    /// No backend
    Empty,
}

impl ApiKind {
    const fn rank(self) -> u32 {
        match self {
            Self::Vulkan | Self::Metal | Self::Dx12 => 3,
            Self::WebGpu => 2,
            Self::Gl => 1,
            Self::Host | Self::Empty => 0,
        }
    }
}

/// Sortable capability score: `device class * 10 + api rank`
#[must_use]
pub const fn capability_score(kind: DeviceKind, api: ApiKind) -> u32 {
    let class = match kind {
        DeviceKind::Other => 0,
        DeviceKind::Cpu => 1,
        DeviceKind::Virtual => 2,
        DeviceKind::Integrated => 3,
        DeviceKind::Discrete => 4,
    };
    class * 10 + api.rank()
}

/// Whether a device is expected to enforce an execution watchdog
///
/// Windows (WDDM timeout detection) resets any GPU whose batch runs too long, and
/// macOS aborts long Metal command buffers. Host and software devices never do.
#[must_use]
pub fn enforces_watchdog(kind: DeviceKind, api: ApiKind) -> bool {
    if matches!(kind, DeviceKind::Cpu | DeviceKind::Other) {
        return false;
    }
    cfg!(target_os = "windows") || api == ApiKind::Metal
}

/// One enumerated accelerator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceCandidate {
    /// Enumeration index, stable within one process
    pub index: usize,
    /// Name reported by the driver
    pub name: String,
    /// Device class
    pub kind: DeviceKind,
    /// API used to drive it
    pub api: ApiKind,
    /// Capability score used for ranking
    pub score: u32,
    /// Whether an execution watchdog is expected
    pub watchdog: bool,
}

impl DeviceCandidate {
    /// Build a candidate and compute its score and watchdog flag
    #[must_use]
    pub fn new(index: usize, name: impl Into<String>, kind: DeviceKind, api: ApiKind) -> Self {
        Self {
            index,
            name: name.into(),
            kind,
            api,
            score: capability_score(kind, api),
            watchdog: enforces_watchdog(kind, api),
        }
    }

    /// Description of the host thread pool used by the host backend
    #[must_use]
    pub fn host(threads: usize) -> Self {
        Self::new(
            0,
            format!("host ({threads} threads)"),
            DeviceKind::Cpu,
            ApiKind::Host,
        )
    }
}

impl fmt::Display for DeviceCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} ({:?}, {:?}, score {})",
            self.index, self.name, self.kind, self.api, self.score
        )
    }
}

/// Pick the candidate with the strictly greatest score, keeping the first on ties
///
/// # Errors
/// Returns [`SimError::NoDevice`] when `candidates` is empty
pub fn select_best(candidates: &[DeviceCandidate]) -> Result<&DeviceCandidate, SimError> {
    let mut best: Option<&DeviceCandidate> = None;
    for candidate in candidates {
        match best {
            Some(current) if candidate.score <= current.score => {}
            _ => best = Some(candidate),
        }
    }
    best.ok_or(SimError::NoDevice)
}

/// Resolve an explicit override (index, or case-insensitive name substring)
///
/// # Errors
/// Returns [`SimError::NoDevice`] if the selector matches nothing
pub fn select_override<'a>(
    candidates: &'a [DeviceCandidate],
    selector: &str,
) -> Result<&'a DeviceCandidate, SimError> {
    let selector = selector.trim().to_lowercase();
    if let Ok(index) = selector.parse::<usize>() {
        if let Some(candidate) = candidates.iter().find(|c| c.index == index) {
            return Ok(candidate);
        }
    }
    candidates
        .iter()
        .find(|c| c.name.to_lowercase().contains(&selector))
        .ok_or(SimError::NoDevice)
}

/// Apply the override if one is given, otherwise rank
///
/// # Errors
/// Returns [`SimError::NoDevice`] if nothing qualifies
pub fn choose<'a>(
    candidates: &'a [DeviceCandidate],
    selector: Option<&str>,
) -> Result<&'a DeviceCandidate, SimError> {
    match selector.map(str::trim) {
        Some(s) if !s.is_empty() && s != "auto" => select_override(candidates, s),
        _ => select_best(candidates),
    }
}
