// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! The generic record store consumed by the experiment registry.
//!
//! Every persisted entity is a [`StoredRecord`] addressed by
//! ([`EntityKind`], id) with an optional parent id, an ancestry chain, and
//! a JSON payload. One abstraction, implemented once per backend, replaces
//! a resource class per table.
//!
//! `save` is an atomic upsert: replaying a write is safe and concurrent
//! writers are last-writer-wins. `create` is insert-only and is used for
//! freshly generated ids that cannot collide.

pub mod memory;
pub mod sqlite;

pub use self::memory::MemoryRecordStore;
pub use self::sqlite::SqliteRecordStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::RegistryError;

/// Entity-kind tag addressing a record class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EntityKind {
    /// Top-level experiment records.
    Experiment,
    /// Workflow-node records (children of an experiment).
    WorkflowNode,
    /// Task records (children of a node).
    Task,
    /// Job records (children of a task, keyed by `taskId:jobId`).
    Job,
    /// Data-transfer records (children of a task).
    DataTransfer,
    /// Status records (keyed by `ownerKey:STATUS_TYPE`).
    Status,
    /// Error-detail records (children of a task or job).
    ErrorDetail,
}

impl EntityKind {
    /// Stable string form used as the storage discriminator.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Experiment => "EXPERIMENT",
            Self::WorkflowNode => "WORKFLOW_NODE",
            Self::Task => "TASK",
            Self::Job => "JOB",
            Self::DataTransfer => "DATA_TRANSFER",
            Self::Status => "STATUS",
            Self::ErrorDetail => "ERROR_DETAIL",
        }
    }

    /// Parse the storage discriminator back into a kind.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "EXPERIMENT" => Some(Self::Experiment),
            "WORKFLOW_NODE" => Some(Self::WorkflowNode),
            "TASK" => Some(Self::Task),
            "JOB" => Some(Self::Job),
            "DATA_TRANSFER" => Some(Self::DataTransfer),
            "STATUS" => Some(Self::Status),
            "ERROR_DETAIL" => Some(Self::ErrorDetail),
            _ => None,
        }
    }
}

/// One persisted record.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRecord {
    /// Record class.
    pub kind: EntityKind,
    /// Identifier, unique within the kind.
    pub id: String,
    /// Identifier of the owning record, if any.
    pub parent_id: Option<String>,
    /// Slash-joined ids of the owning chain, most senior first.
    /// Empty for root records.
    pub ancestry: String,
    /// Entity payload.
    pub payload: serde_json::Value,
    /// When the record was first written.
    pub created_at: DateTime<Utc>,
    /// When the record was last written.
    pub updated_at: DateTime<Utc>,
}

impl StoredRecord {
    /// Build a record stamped with the current time.
    pub fn new(
        kind: EntityKind,
        id: impl Into<String>,
        parent_id: Option<String>,
        ancestry: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        let now = Utc::now();
        Self {
            kind,
            id: id.into(),
            parent_id,
            ancestry: ancestry.into(),
            payload,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Filter options for record queries.
#[derive(Debug, Clone, Default)]
pub struct RecordFilter {
    /// Match records whose direct parent has this id.
    pub parent_id: Option<String>,
    /// Match records whose ancestry chain contains this id.
    pub ancestor_id: Option<String>,
}

impl RecordFilter {
    /// Filter by direct parent.
    pub fn by_parent(parent_id: impl Into<String>) -> Self {
        Self {
            parent_id: Some(parent_id.into()),
            ancestor_id: None,
        }
    }

    /// Filter by any ancestor on the owning chain.
    pub fn by_ancestor(ancestor_id: impl Into<String>) -> Self {
        Self {
            parent_id: None,
            ancestor_id: Some(ancestor_id.into()),
        }
    }
}

/// Persistence interface used by the registry.
///
/// Implementations must make `save` an atomic upsert; `create` fails on a
/// duplicate id instead of silently overwriting.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Whether a record of this kind and id exists.
    async fn exists(&self, kind: EntityKind, id: &str) -> Result<bool, RegistryError>;

    /// Insert a new record; fails if (kind, id) is already present.
    async fn create(&self, record: StoredRecord) -> Result<(), RegistryError>;

    /// Fetch a record, `None` if absent.
    async fn get(&self, kind: EntityKind, id: &str) -> Result<Option<StoredRecord>, RegistryError>;

    /// Insert or replace a record (atomic upsert, last-writer-wins).
    /// The stored `created_at` of an existing record is preserved.
    async fn save(&self, record: StoredRecord) -> Result<(), RegistryError>;

    /// Remove a record. Removing an absent record is not an error.
    async fn remove(&self, kind: EntityKind, id: &str) -> Result<(), RegistryError>;

    /// List records of a kind matching the filter, ordered by creation
    /// time then id.
    async fn query(
        &self,
        kind: EntityKind,
        filter: &RecordFilter,
    ) -> Result<Vec<StoredRecord>, RegistryError>;
}
