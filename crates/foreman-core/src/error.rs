// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use thiserror::Error;

use foreman_store::StoreError;

/// Domain error taxonomy.
///
/// The split that matters operationally is `Transient` vs `Fatal`: a
/// transient step failure re-enqueues the task, a fatal one (misconfigured
/// agent or model binding) leaves the task parked and publishes an error
/// event instead of retrying forever.
#[derive(Debug, Error)]
pub enum Error {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("transient: {0}")]
    Transient(String),

    #[error("fatal: {0}")]
    Fatal(String),

    #[error("conversion: {0}")]
    Convert(#[from] crate::convert::ConvertError),
}

impl Error {
    /// A failed step is retried via re-enqueue unless it is fatal.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    /// Strip store-layer prefixes before the message crosses the API
    /// boundary.
    pub fn sanitized_message(&self) -> String {
        self.to_string().replace("store: ", "")
    }
}

impl From<StoreError> for Error {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound { entity, id } => Self::NotFound { entity, id },
            StoreError::Invalid { field, reason } => {
                Self::InvalidArgument(format!("{field}: {reason}"))
            }
            // Infrastructure failures are retried by re-enqueueing.
            other => Self::Transient(other.to_string()),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_is_retryable_fatal_is_not() {
        assert!(Error::Transient("net down".into()).is_retryable());
        assert!(!Error::Fatal("agent has no model".into()).is_retryable());
        assert!(!Error::NotFound { entity: "task", id: "x".into() }.is_retryable());
    }

    #[test]
    fn store_not_found_maps_to_not_found() {
        let e: Error = StoreError::not_found("agent", "a1").into();
        assert!(matches!(e, Error::NotFound { entity: "agent", .. }));
    }

    #[test]
    fn sqlite_failures_map_to_transient() {
        let e: Error = StoreError::Crypto("bad key".into()).into();
        assert!(e.is_retryable());
    }

    #[test]
    fn sanitized_message_strips_store_prefix() {
        let e: Error = StoreError::Crypto("bad key".into()).into();
        assert!(e.to_string().contains("store: "));
        assert!(!e.sanitized_message().contains("store: "));
    }
}
