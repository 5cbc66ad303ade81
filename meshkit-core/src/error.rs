use std::io;
use std::time::Duration;
use thiserror::Error;

/// Failures that the command line maps to distinct exit codes
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("device not found at {path}")]
    DeviceNotFound { path: String },

    #[error(
        "permission denied opening {path}; add your user to the dialout (or uucp) group or grant access to the device node"
    )]
    PermissionDenied { path: String },

    #[error("timed out after {0:?} waiting for the device")]
    Timeout(Duration),

    #[error("connection failed: {0}")]
    Connection(String),

    #[error("not connected")]
    NotConnected,

    #[error("invalid setting {name}: {reason}")]
    Settings { name: String, reason: String },

    #[error("provisioning failed: {0}")]
    Provision(String),

    #[error("channel error: {0}")]
    Channel(String),

    #[error("interrupted")]
    Interrupted,
}

impl SessionError {
    /// Process exit code for this failure
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::DeviceNotFound { .. }
            | Self::PermissionDenied { .. }
            | Self::Timeout(_)
            | Self::Connection(_)
            | Self::NotConnected => 2,
            Self::Provision(_) => 3,
            Self::Settings { .. } | Self::Channel(_) => 1,
            Self::Interrupted => 130,
        }
    }

    /// The packet stream from the device ended mid-session
    pub fn stream_closed() -> Self {
        Self::Connection("device stream closed".to_string())
    }

    pub fn settings(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Settings {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Classify a failure raised while opening `path`.
    ///
    /// The meshtastic stream builders wrap the underlying serial error, so the
    /// io error kind is looked up in the chain first and the rendered message
    /// is used as a fallback.
    pub fn classify_open_error(path: &str, err: &anyhow::Error) -> Self {
        let kind = err
            .chain()
            .find_map(|cause| cause.downcast_ref::<io::Error>())
            .map(io::Error::kind);

        match kind {
            Some(io::ErrorKind::NotFound) => {
                return Self::DeviceNotFound {
                    path: path.to_string(),
                };
            }
            Some(io::ErrorKind::PermissionDenied) => {
                return Self::PermissionDenied {
                    path: path.to_string(),
                };
            }
            _ => {}
        }

        let rendered = format!("{err:#}").to_lowercase();
        if rendered.contains("permission denied") || rendered.contains("access is denied") {
            Self::PermissionDenied {
                path: path.to_string(),
            }
        } else if rendered.contains("no such file") || rendered.contains("not found") {
            Self::DeviceNotFound {
                path: path.to_string(),
            }
        } else {
            Self::Connection(format!("{err:#}"))
        }
    }
}
