// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Delivery-tag correlation and cooperative cancellation over the
//! coordination tree.
//!
//! A handler that dequeues a broker message for an experiment records the
//! message's delivery tag under its handler path. A cancel request writes
//! a second, distinctly-suffixed tag for the same experiment/handler pair
//! without touching the original; any consumer checks for the cancel key
//! at its checkpoints and, if present, stops forward progress and
//! acknowledges the recorded tag. Absence of a key is signalled by the
//! [`NO_TAG`] sentinel, never by a zero value — zero is a valid tag.
//!
//! Cancellation is advisory: writing a cancel tag does not stop a running
//! remote job. The only ordering primitive relied on is the tree's
//! read-after-write consistency per path.

use std::sync::Arc;

use tracing::{debug, instrument, warn};

use scigate_core::model::JobState;

use crate::paths::CoordinationPaths;
use crate::tree::{CoordinationError, CoordinationTree, Result};

/// Sentinel returned when no tag is recorded. Distinct from a tag value
/// of 0, which is a legitimate broker delivery tag.
pub const NO_TAG: i64 = -1;

/// Encode a delivery tag as the 8-byte big-endian wire form.
pub fn tag_to_bytes(tag: i64) -> [u8; 8] {
    tag.to_be_bytes()
}

/// Decode an 8-byte big-endian delivery tag.
pub fn tag_from_bytes(path: &str, bytes: &[u8]) -> Result<i64> {
    let raw: [u8; 8] = bytes
        .try_into()
        .map_err(|_| CoordinationError::Corrupt {
            path: path.to_string(),
            details: format!("expected 8-byte tag, got {} bytes", bytes.len()),
        })?;
    Ok(i64::from_be_bytes(raw))
}

/// Coordination protocol adapter scoped to one server identity.
#[derive(Clone)]
pub struct CoordinationAdapter {
    paths: CoordinationPaths,
    tree: Arc<dyn CoordinationTree>,
}

impl CoordinationAdapter {
    /// Create an adapter for the given server identity over a tree client.
    pub fn new(server_name: impl Into<String>, tree: Arc<dyn CoordinationTree>) -> Self {
        Self {
            paths: CoordinationPaths::new(server_name),
            tree,
        }
    }

    /// The path scheme in use.
    pub fn paths(&self) -> &CoordinationPaths {
        &self.paths
    }

    // ========================================================================
    // Experiment pipeline state
    // ========================================================================

    /// Record the experiment's pipeline state, stored as the decimal
    /// string of the shared [`JobState`] wire value.
    #[instrument(skip(self))]
    pub async fn write_experiment_state(
        &self,
        experiment_id: &str,
        state: JobState,
    ) -> Result<()> {
        let path = self.paths.experiment_state_path(experiment_id);
        self.tree
            .set(&path, state.value().to_string().as_bytes())
            .await?;
        debug!(state = %state.as_str(), "experiment state recorded");
        Ok(())
    }

    /// Read the experiment's pipeline state, `None` when no state node
    /// exists (experiment unknown to this server or already cleaned up).
    pub async fn read_experiment_state(&self, experiment_id: &str) -> Result<Option<JobState>> {
        let path = self.paths.experiment_state_path(experiment_id);
        let Some(data) = self.tree.get(&path).await? else {
            return Ok(None);
        };
        let text = std::str::from_utf8(&data).map_err(|_| CoordinationError::Corrupt {
            path: path.clone(),
            details: "state is not valid UTF-8".to_string(),
        })?;
        let value: i32 = text.parse().map_err(|_| CoordinationError::Corrupt {
            path: path.clone(),
            details: format!("state '{}' is not an integer", text),
        })?;
        let state = JobState::from_value(value).ok_or_else(|| CoordinationError::Corrupt {
            path,
            details: format!("unknown state value {}", value),
        })?;
        Ok(Some(state))
    }

    // ========================================================================
    // Delivery tags
    // ========================================================================

    /// Record the broker delivery tag a handler received for an
    /// experiment. Replaces any previous tag at the same key (message
    /// re-delivery after a requeue); never touches the cancel key.
    #[instrument(skip(self))]
    pub async fn record_delivery_tag(
        &self,
        experiment_id: &str,
        handler_name: &str,
        tag: i64,
    ) -> Result<()> {
        let path = self.paths.delivery_tag_path(experiment_id, handler_name);
        self.tree.set(&path, &tag_to_bytes(tag)).await
    }

    /// The delivery tag recorded for (experiment, handler), or [`NO_TAG`]
    /// when none has been recorded yet.
    pub async fn delivery_tag(&self, experiment_id: &str, handler_name: &str) -> Result<i64> {
        let path = self.paths.delivery_tag_path(experiment_id, handler_name);
        match self.tree.get(&path).await? {
            Some(bytes) => tag_from_bytes(&path, &bytes),
            None => Ok(NO_TAG),
        }
    }

    // ========================================================================
    // Cooperative cancellation
    // ========================================================================

    /// Request cancellation for (experiment, handler), recording the
    /// cancel request's own delivery tag so the honoring handler can
    /// acknowledge it.
    ///
    /// Returns `false` without writing when the experiment has no
    /// coordination entry on this server (already finished and cleaned
    /// up) or when a cancel is already pending — only one cancel may be
    /// in flight per pair.
    #[instrument(skip(self))]
    pub async fn request_cancel(
        &self,
        experiment_id: &str,
        handler_name: &str,
        tag: i64,
    ) -> Result<bool> {
        let experiment_path = self.paths.experiment_path(experiment_id);
        if !self.tree.exists(&experiment_path).await? {
            warn!(
                %experiment_id,
                "cancel requested for experiment with no coordination entry"
            );
            return Ok(false);
        }

        let cancel_path = self.paths.cancel_tag_path(experiment_id, handler_name);
        if self.tree.exists(&cancel_path).await? {
            // A cancel is already being processed for this pair.
            return Ok(false);
        }

        self.tree.create(&cancel_path, &tag_to_bytes(tag)).await?;
        debug!(%experiment_id, %handler_name, "cancel tag recorded");
        Ok(true)
    }

    /// The pending cancel tag for (experiment, handler), or [`NO_TAG`]
    /// when no cancel has been requested.
    pub async fn cancel_delivery_tag(
        &self,
        experiment_id: &str,
        handler_name: &str,
    ) -> Result<i64> {
        let path = self.paths.cancel_tag_path(experiment_id, handler_name);
        match self.tree.get(&path).await? {
            Some(bytes) => tag_from_bytes(&path, &bytes),
            None => Ok(NO_TAG),
        }
    }

    /// Whether a cancel is pending for (experiment, handler). Checked by
    /// consumers at their cancellation checkpoints.
    pub async fn is_cancel_requested(
        &self,
        experiment_id: &str,
        handler_name: &str,
    ) -> Result<bool> {
        let path = self.paths.cancel_tag_path(experiment_id, handler_name);
        self.tree.exists(&path).await
    }

    /// Remove a stale cancel tag, leaving the delivery tag untouched.
    /// Called when an experiment is re-dispatched after a failed run.
    pub async fn clear_cancel(&self, experiment_id: &str, handler_name: &str) -> Result<()> {
        let path = self.paths.cancel_tag_path(experiment_id, handler_name);
        if self.tree.exists(&path).await? {
            self.tree.delete(&path).await?;
        }
        Ok(())
    }

    // ========================================================================
    // Handler scratch state
    // ========================================================================

    /// Save a handler's scratch data for an experiment (restart context,
    /// partial progress markers).
    pub async fn save_handler_data(
        &self,
        experiment_id: &str,
        handler_name: &str,
        data: &[u8],
    ) -> Result<()> {
        let path = self.paths.handler_data_path(experiment_id, handler_name);
        self.tree.set(&path, data).await
    }

    /// Read a handler's scratch data, `None` if never saved.
    pub async fn handler_data(
        &self,
        experiment_id: &str,
        handler_name: &str,
    ) -> Result<Option<Vec<u8>>> {
        let path = self.paths.handler_data_path(experiment_id, handler_name);
        self.tree.get(&path).await
    }

    // ========================================================================
    // Cleanup
    // ========================================================================

    /// Remove every coordination node for an experiment on this server.
    /// Called after the experiment reaches a terminal status and all tags
    /// were acknowledged.
    #[instrument(skip(self))]
    pub async fn remove_experiment(&self, experiment_id: &str) -> Result<()> {
        let path = self.paths.experiment_path(experiment_id);
        self.tree.delete(&path).await
    }
}
