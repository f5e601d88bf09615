// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-memory record store for tests and embedded use.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use crate::error::RegistryError;

use super::{EntityKind, RecordFilter, RecordStore, StoredRecord};

/// Record store backed by a process-local map.
///
/// Satisfies the same contract as the SQLite backend; used as the default
/// fixture in tests and for single-process embedded deployments.
#[derive(Default)]
pub struct MemoryRecordStore {
    records: RwLock<BTreeMap<(EntityKind, String), StoredRecord>>,
}

impl MemoryRecordStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records currently held, across all kinds.
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    /// Whether the store holds no records.
    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn exists(&self, kind: EntityKind, id: &str) -> Result<bool, RegistryError> {
        Ok(self
            .records
            .read()
            .await
            .contains_key(&(kind, id.to_string())))
    }

    async fn create(&self, record: StoredRecord) -> Result<(), RegistryError> {
        let mut records = self.records.write().await;
        let key = (record.kind, record.id.clone());
        if records.contains_key(&key) {
            return Err(RegistryError::StoreFailure {
                operation: "create".to_string(),
                details: format!("{} '{}' already exists", record.kind.as_str(), record.id),
            });
        }
        records.insert(key, record);
        Ok(())
    }

    async fn get(&self, kind: EntityKind, id: &str) -> Result<Option<StoredRecord>, RegistryError> {
        Ok(self
            .records
            .read()
            .await
            .get(&(kind, id.to_string()))
            .cloned())
    }

    async fn save(&self, mut record: StoredRecord) -> Result<(), RegistryError> {
        let mut records = self.records.write().await;
        let key = (record.kind, record.id.clone());
        record.updated_at = Utc::now();
        if let Some(existing) = records.get(&key) {
            record.created_at = existing.created_at;
        }
        records.insert(key, record);
        Ok(())
    }

    async fn remove(&self, kind: EntityKind, id: &str) -> Result<(), RegistryError> {
        self.records.write().await.remove(&(kind, id.to_string()));
        Ok(())
    }

    async fn query(
        &self,
        kind: EntityKind,
        filter: &RecordFilter,
    ) -> Result<Vec<StoredRecord>, RegistryError> {
        let records = self.records.read().await;
        let mut matched: Vec<StoredRecord> = records
            .values()
            .filter(|record| record.kind == kind)
            .filter(|record| match &filter.parent_id {
                Some(parent) => record.parent_id.as_deref() == Some(parent.as_str()),
                None => true,
            })
            .filter(|record| match &filter.ancestor_id {
                Some(ancestor) => record
                    .ancestry
                    .split('/')
                    .any(|segment| segment == ancestor),
                None => true,
            })
            .cloned()
            .collect();
        matched.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(matched)
    }
}
