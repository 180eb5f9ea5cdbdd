//! Typed errors for device selection, ensemble storage, kernel dispatch and snapshot I/O.
//!
//! Every fatal condition carries the identity of the operation that raised it so the
//! binary can print a diagnostic naming the source before exiting.

use std::fmt;
use std::path::PathBuf;

/// Errors arising from the simulation engine
#[derive(Debug)]
pub enum SimError {
    /// No compatible accelerator was found
    NoDevice,

    /// Host or device memory for the ensemble could not be allocated
    Allocation {
        /// Operation that attempted the allocation (e.g. `"allocate device ensemble"`)
        operation: &'static str,
        /// Number of bytes requested
        bytes: u64,
        /// Backend-specific detail
        message: String,
    },

    /// The accelerator runtime reported a failure after a dispatch or copy
    DeviceExecution {
        /// Operation that surfaced the failure (e.g. `"dispatch field kernel"`)
        operation: String,
        /// Message reported by the runtime
        message: String,
    },

    /// A snapshot, manifest or progress record could not be written
    Io {
        /// Path involved, if any (stdout has none)
        path: Option<PathBuf>,
        /// Underlying error
        source: std::io::Error,
    },

    /// A snapshot file could not be parsed back
    Parse {
        /// File being parsed
        path: PathBuf,
        /// 1-based line number
        line: usize,
        /// What went wrong
        message: String,
    },

    /// Configuration rejected before the run started
    InvalidConfig(String),
}

impl SimError {
    /// Build a device execution error for `operation`
    pub fn device(operation: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::DeviceExecution {
            operation: operation.into(),
            message: message.to_string(),
        }
    }

    /// Build an I/O error tied to a path
    pub fn io_at(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: Some(path.into()),
            source,
        }
    }

    /// Whether this error came from the accelerator runtime
    pub fn is_device_failure(&self) -> bool {
        matches!(
            self,
            Self::NoDevice | Self::Allocation { .. } | Self::DeviceExecution { .. }
        )
    }
}

impl fmt::Display for SimError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoDevice => write!(f, "No compatible accelerator found"),
            Self::Allocation {
                operation,
                bytes,
                message,
            } => write!(f, "{operation}: failed to allocate {bytes} bytes: {message}"),
            Self::DeviceExecution { operation, message } => {
                write!(f, "{operation}: device error: {message}")
            }
            Self::Io {
                path: Some(path),
                source,
            } => write!(f, "I/O error on {}: {source}", path.display()),
            Self::Io { path: None, source } => write!(f, "I/O error: {source}"),
            Self::Parse {
                path,
                line,
                message,
            } => write!(f, "{}:{line}: {message}", path.display()),
            Self::InvalidConfig(msg) => write!(f, "Invalid configuration: {msg}"),
        }
    }
}

impl std::error::Error for SimError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<std::io::Error> for SimError {
    fn from(source: std::io::Error) -> Self {
        Self::Io { path: None, source }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_no_device() {
        assert_eq!(SimError::NoDevice.to_string(), "No compatible accelerator found");
    }

    #[test]
    fn display_names_the_operation() {
        let err = SimError::device("dispatch field kernel", "watchdog timeout");
        assert_eq!(
            err.to_string(),
            "dispatch field kernel: device error: watchdog timeout"
        );
        assert!(err.is_device_failure());
    }

    #[test]
    fn io_error_keeps_source_and_path() {
        let err = SimError::io_at(
            "/tmp/out/0.000500.dat",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        let msg = err.to_string();
        assert!(msg.contains("0.000500.dat"));
        assert!(msg.contains("denied"));
        assert!(std::error::Error::source(&err).is_some());
        assert!(!err.is_device_failure());
    }

    #[test]
    fn allocation_reports_size() {
        let err = SimError::Allocation {
            operation: "allocate host ensemble",
            bytes: 48,
            message: "capacity overflow".into(),
        };
        assert!(err.to_string().contains("48 bytes"));
    }
}
