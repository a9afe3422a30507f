//! Error types for the remote source and the ingestion coordinator.
//!
//! Storage and normalization errors live in `compras-core` next to the
//! traits that produce them.

use compras_core::{NormalizeError, StoreError};
use thiserror::Error;

/// User-facing text for [`SourceError::Connectivity`]. The transport detail
/// is logged, never shown.
pub const CONNECTIVITY_MESSAGE: &str =
    "Error de conexión: No se puede conectar con el servidor de la DGCP. Verificar conexión a internet.";

/// Failure talking to the upstream release API.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SourceError {
    /// The upstream host could not be reached (DNS, refused, timeout).
    #[error("{}", CONNECTIVITY_MESSAGE)]
    Connectivity,

    #[error("Upstream error: {status} {status_text}")]
    Upstream { status: u16, status_text: String },

    /// None of the known release-array locations matched, or the body was not JSON.
    #[error("Malformed upstream response: {0}")]
    MalformedResponse(String),
}

/// Errors surfaced to the caller of an ingestion start.
///
/// Per-window and per-release failures never appear here; they are recorded
/// in the run's stats instead.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IngestError {
    #[error("an ingestion run is already in progress")]
    AlreadyRunning,

    #[error("invalid ingestion options: {0}")]
    InvalidOptions(String),
}

/// Why one release could not be stored. Recorded per release; never fatal
/// to a run.
#[derive(Debug, Error)]
pub enum ReleaseError {
    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Normalize(#[from] NormalizeError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connectivity_message_is_user_safe() {
        let msg = SourceError::Connectivity.to_string();
        assert!(msg.starts_with("Error de conexión"));
        assert!(msg.contains("DGCP"));
    }

    #[test]
    fn upstream_error_carries_status() {
        let err = SourceError::Upstream {
            status: 503,
            status_text: "Service Unavailable".into(),
        };
        assert_eq!(err.to_string(), "Upstream error: 503 Service Unavailable");
    }
}
