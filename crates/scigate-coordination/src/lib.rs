// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Scigate Coordination - Cross-Process Experiment Signalling
//!
//! A stateless orchestrator and its backend handlers correlate in-flight
//! broker messages with experiment state through a hierarchical
//! coordination tree. This crate owns the path scheme, the tag encoding,
//! and the cooperative-cancellation protocol built on them.
//!
//! # Path Layout
//!
//! ```text
//! /experiments/<server_name>/<experiment_id>/state
//! /experiments/<server_name>/<experiment_id>/<handler_name>
//! <handler_path>/<experiment_id>-deliveryTag         (8-byte big-endian)
//! <handler_path>/<experiment_id>-cancel-deliveryTag  (8-byte big-endian)
//! ```
//!
//! # Cancellation Protocol
//!
//! | Step | Actor | Operation |
//! |------|-------|-----------|
//! | 1 | Handler | records its delivery tag on dequeue |
//! | 2 | Orchestrator | writes the cancel tag (refused if one is pending) |
//! | 3 | Handler | checks [`is_cancel_requested`] at its checkpoints |
//! | 4 | Handler | marks the job CANCELLED, acks both tags |
//! | 5 | Orchestrator | clears coordination state |
//!
//! Cancellation is cooperative and advisory: the cancel tag never mutates
//! the original message or stops a running remote job, and multiple
//! handler stages race their checks independently — the tree's per-path
//! read-after-write consistency is the only ordering primitive.
//!
//! [`is_cancel_requested`]: adapter::CoordinationAdapter::is_cancel_requested

#![deny(missing_docs)]

/// Delivery-tag and cancellation operations.
pub mod adapter;

/// Deterministic coordination-tree path scheme.
pub mod paths;

/// Coordination-tree collaborator interface and in-memory backend.
pub mod tree;

pub use adapter::{CoordinationAdapter, NO_TAG};
pub use paths::CoordinationPaths;
pub use tree::{CoordinationError, CoordinationTree, MemoryCoordinationTree};
