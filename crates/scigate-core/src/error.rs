// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for scigate-core.
//!
//! Provides a unified error type for registry and record-store operations
//! with stable error-code mapping for callers that branch on failure kind.

use std::fmt;

use crate::store::EntityKind;

/// Result type using RegistryError
pub type Result<T> = std::result::Result<T, RegistryError>;

/// Errors raised by the experiment registry and its record store.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum RegistryError {
    /// A requested entity does not exist.
    NotFound {
        /// Kind of the missing entity.
        kind: EntityKind,
        /// The identifier that was not found.
        id: String,
    },

    /// The experiment already reached a terminal status and refuses
    /// further status mutation.
    AlreadyTerminal {
        /// The experiment whose status is terminal.
        experiment_id: String,
        /// The terminal state the experiment is in.
        state: String,
    },

    /// The persistence collaborator failed; carries the underlying cause.
    StoreFailure {
        /// The store operation that failed (create, get, save, remove, query).
        operation: String,
        /// Underlying error details.
        details: String,
    },

    /// An entity payload could not be (de)serialized.
    Serialization {
        /// Underlying error details.
        details: String,
    },

    /// Input validation failed before any write was attempted.
    Validation {
        /// The field that failed validation.
        field: String,
        /// The validation error message.
        message: String,
    },
}

impl RegistryError {
    /// Get the stable error code string for this error kind.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "NOT_FOUND",
            Self::AlreadyTerminal { .. } => "ALREADY_TERMINAL",
            Self::StoreFailure { .. } => "STORE_FAILURE",
            Self::Serialization { .. } => "SERIALIZATION_FAILURE",
            Self::Validation { .. } => "VALIDATION_ERROR",
        }
    }
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound { kind, id } => {
                write!(f, "{} '{}' not found", kind.as_str(), id)
            }
            Self::AlreadyTerminal {
                experiment_id,
                state,
            } => {
                write!(
                    f,
                    "Experiment '{}' is already in terminal state '{}'",
                    experiment_id, state
                )
            }
            Self::StoreFailure { operation, details } => {
                write!(f, "Store failure during '{}': {}", operation, details)
            }
            Self::Serialization { details } => {
                write!(f, "Payload serialization failure: {}", details)
            }
            Self::Validation { field, message } => {
                write!(f, "Validation error for '{}': {}", field, message)
            }
        }
    }
}

impl std::error::Error for RegistryError {}

impl From<sqlx::Error> for RegistryError {
    fn from(err: sqlx::Error) -> Self {
        RegistryError::StoreFailure {
            operation: "query".to_string(),
            details: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for RegistryError {
    fn from(err: serde_json::Error) -> Self {
        RegistryError::Serialization {
            details: err.to_string(),
        }
    }
}
