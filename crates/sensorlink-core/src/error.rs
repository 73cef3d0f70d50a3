// ── Core error types ──
//
// Injected connect functions report failures as `TransportError`; the
// retry engine decides from `is_transient()` whether a failure is
// absorbed into the retry budget or propagated. Everything the core
// reports to its callers is a `CoreError`.

use thiserror::Error;

use crate::model::DeviceId;

/// Failure reported by a device connect function.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Permission denied: {message}")]
    PermissionDenied { message: String },

    #[error("Connection attempt timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Unexpected transport failure: {message}")]
    Unexpected { message: String },
}

impl TransportError {
    /// Shorthand for an I/O failure carrying only a message.
    pub fn io(message: impl Into<String>) -> Self {
        Self::Io(std::io::Error::other(message.into()))
    }

    pub fn permission_denied(message: impl Into<String>) -> Self {
        Self::PermissionDenied {
            message: message.into(),
        }
    }

    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected {
            message: message.into(),
        }
    }

    /// Transient failures count as a failed attempt and are retried.
    /// Anything else aborts the retry sequence.
    pub fn is_transient(&self) -> bool {
        !matches!(self, Self::Unexpected { .. })
    }
}

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Lifecycle ────────────────────────────────────────────────────
    #[error("Operation cancelled")]
    Cancelled,

    // ── Transport ────────────────────────────────────────────────────
    #[error("Transport failure for device {device_id}: {source}")]
    Transport {
        device_id: DeviceId,
        #[source]
        source: TransportError,
    },

    // ── Configuration ────────────────────────────────────────────────
    #[error("Invalid configuration for {field}: {reason}")]
    InvalidConfig { field: String, reason: String },
}

impl CoreError {
    pub(crate) fn invalid_config(field: &str, reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field: field.to_owned(),
            reason: reason.into(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_unexpected_failures_are_fatal() {
        assert!(TransportError::io("socket closed").is_transient());
        assert!(TransportError::permission_denied("bluetooth off").is_transient());
        assert!(TransportError::Timeout { timeout_ms: 30_000 }.is_transient());
        assert!(!TransportError::unexpected("driver bug").is_transient());
    }

    #[test]
    fn transport_error_names_the_device() {
        let err = CoreError::Transport {
            device_id: DeviceId::from("shimmer-1"),
            source: TransportError::unexpected("driver bug"),
        };
        let rendered = err.to_string();
        assert!(rendered.contains("shimmer-1"));
        assert!(rendered.contains("driver bug"));
    }
}
