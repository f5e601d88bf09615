// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Deterministic path scheme on the coordination tree.
//!
//! Layout, scoped by server identity:
//!
//! ```text
//! /experiments/<server_name>/<experiment_id>/state
//! /experiments/<server_name>/<experiment_id>/<handler_name>
//! <handler_path>/<experiment_id>-deliveryTag
//! <handler_path>/<experiment_id>-cancel-deliveryTag
//! ```

/// Root node for all experiment coordination state.
pub const EXPERIMENTS_ROOT: &str = "/experiments";

/// Child node holding an experiment's pipeline state.
pub const STATE_NODE: &str = "state";

/// Suffix of the delivery-tag key under a handler path.
pub const DELIVERY_TAG_SUFFIX: &str = "-deliveryTag";

/// Suffix of the cancel-tag key under a handler path. Distinct from the
/// delivery-tag key so the two are written and removed independently.
pub const CANCEL_DELIVERY_TAG_SUFFIX: &str = "-cancel-deliveryTag";

/// Path builder scoped to one server identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinationPaths {
    server_name: String,
}

impl CoordinationPaths {
    /// Create a path builder for the given server identity.
    pub fn new(server_name: impl Into<String>) -> Self {
        Self {
            server_name: server_name.into(),
        }
    }

    /// The server identity scoping these paths.
    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    /// Root path owned by one experiment on this server.
    pub fn experiment_path(&self, experiment_id: &str) -> String {
        format!("{}/{}/{}", EXPERIMENTS_ROOT, self.server_name, experiment_id)
    }

    /// Path of the experiment's pipeline-state node.
    pub fn experiment_state_path(&self, experiment_id: &str) -> String {
        format!("{}/{}", self.experiment_path(experiment_id), STATE_NODE)
    }

    /// Path owned by one handler stage for one experiment.
    pub fn handler_path(&self, experiment_id: &str, handler_name: &str) -> String {
        format!("{}/{}", self.experiment_path(experiment_id), handler_name)
    }

    /// Key holding the broker delivery tag recorded by a handler.
    pub fn delivery_tag_path(&self, experiment_id: &str, handler_name: &str) -> String {
        format!(
            "{}/{}{}",
            self.handler_path(experiment_id, handler_name),
            experiment_id,
            DELIVERY_TAG_SUFFIX
        )
    }

    /// Key holding a pending cancel request's delivery tag.
    pub fn cancel_tag_path(&self, experiment_id: &str, handler_name: &str) -> String {
        format!(
            "{}/{}{}",
            self.handler_path(experiment_id, handler_name),
            experiment_id,
            CANCEL_DELIVERY_TAG_SUFFIX
        )
    }

    /// Key holding a handler's scratch state for one experiment.
    pub fn handler_data_path(&self, experiment_id: &str, handler_name: &str) -> String {
        format!(
            "{}/{}",
            self.handler_path(experiment_id, handler_name),
            STATE_NODE
        )
    }
}
