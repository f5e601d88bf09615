// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Pool error kinds.

use thiserror::Error;

/// Errors surfaced by the client pool.
///
/// One enum for every terminal pool failure so callers can apply uniform
/// backoff and alerting; each variant carries the underlying cause.
#[derive(Debug, Error)]
pub enum PoolError {
    /// No client became available within the borrow timeout.
    #[error("connection pool exhausted after waiting {waited_ms} ms")]
    Exhausted {
        /// How long the borrower waited.
        waited_ms: u64,
    },

    /// Every validation attempt produced an unhealthy client.
    #[error("client validation failed after {attempts} attempts: {details}")]
    ValidationExhausted {
        /// Number of borrow attempts made.
        attempts: u32,
        /// Details of the last failure.
        details: String,
    },

    /// The factory failed to open a channel or wrap a client.
    #[error("failed to create client: {details}")]
    CreateFailed {
        /// Underlying error details.
        details: String,
    },

    /// Closing a client's channel failed.
    #[error("failed to close client: {details}")]
    CloseFailed {
        /// Underlying error details.
        details: String,
    },

    /// The pool was closed; no further borrows are served.
    #[error("pool is closed")]
    Closed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        assert_eq!(
            PoolError::Exhausted { waited_ms: 30000 }.to_string(),
            "connection pool exhausted after waiting 30000 ms"
        );
        assert_eq!(
            PoolError::ValidationExhausted {
                attempts: 10,
                details: "version probe timed out".to_string(),
            }
            .to_string(),
            "client validation failed after 10 attempts: version probe timed out"
        );
        assert_eq!(PoolError::Closed.to_string(), "pool is closed");
    }
}
