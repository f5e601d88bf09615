// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! SQLite-backed record store.

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use sqlx::sqlite::SqlitePoolOptions;

use crate::error::RegistryError;

use super::{EntityKind, RecordFilter, RecordStore, StoredRecord};

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations/sqlite");

/// SQLite-backed record store.
#[derive(Clone)]
pub struct SqliteRecordStore {
    pool: SqlitePool,
}

/// Raw row shape; converted into [`StoredRecord`] after fetch.
#[derive(sqlx::FromRow)]
struct RecordRow {
    kind: String,
    id: String,
    parent_id: Option<String>,
    ancestry: String,
    payload: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl RecordRow {
    fn into_record(self) -> Result<StoredRecord, RegistryError> {
        let kind = EntityKind::parse(&self.kind).ok_or_else(|| RegistryError::StoreFailure {
            operation: "get".to_string(),
            details: format!("unknown record kind '{}'", self.kind),
        })?;
        Ok(StoredRecord {
            kind,
            id: self.id,
            parent_id: self.parent_id,
            ancestry: self.ancestry,
            payload: serde_json::from_str(&self.payload)?,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

impl SqliteRecordStore {
    /// Create a store from an existing pool. Migrations must have run.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create and initialize a store from a database file path.
    ///
    /// Creates parent directories and the database file if needed,
    /// connects with sensible defaults, and runs all migrations.
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self, RegistryError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| RegistryError::StoreFailure {
                operation: "create_dir".to_string(),
                details: format!("Failed to create directory {:?}: {}", parent, e),
            })?;
        }

        let url = format!("sqlite:{}?mode=rwc", path.to_string_lossy());
        Self::from_url(&url).await
    }

    /// Create and initialize a store from a SQLite connection URL
    /// (e.g. `sqlite::memory:`), running all migrations.
    pub async fn from_url(url: &str) -> Result<Self, RegistryError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(url)
            .await
            .map_err(|e| RegistryError::StoreFailure {
                operation: "connect".to_string(),
                details: format!("Failed to connect to SQLite at {}: {}", url, e),
            })?;

        MIGRATOR
            .run(&pool)
            .await
            .map_err(|e| RegistryError::StoreFailure {
                operation: "migrate".to_string(),
                details: format!("Failed to run migrations: {}", e),
            })?;

        Ok(Self { pool })
    }

    /// The underlying connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    async fn exists(&self, kind: EntityKind, id: &str) -> Result<bool, RegistryError> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM records WHERE kind = ? AND id = ?
            "#,
        )
        .bind(kind.as_str())
        .bind(id)
        .fetch_one(&self.pool)
        .await?;

        Ok(count > 0)
    }

    async fn create(&self, record: StoredRecord) -> Result<(), RegistryError> {
        sqlx::query(
            r#"
            INSERT INTO records (kind, id, parent_id, ancestry, payload, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(record.kind.as_str())
        .bind(&record.id)
        .bind(&record.parent_id)
        .bind(&record.ancestry)
        .bind(record.payload.to_string())
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| RegistryError::StoreFailure {
            operation: "create".to_string(),
            details: e.to_string(),
        })?;

        Ok(())
    }

    async fn get(&self, kind: EntityKind, id: &str) -> Result<Option<StoredRecord>, RegistryError> {
        let row = sqlx::query_as::<_, RecordRow>(
            r#"
            SELECT kind, id, parent_id, ancestry, payload, created_at, updated_at
            FROM records
            WHERE kind = ? AND id = ?
            "#,
        )
        .bind(kind.as_str())
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(RecordRow::into_record).transpose()
    }

    async fn save(&self, record: StoredRecord) -> Result<(), RegistryError> {
        // Atomic upsert: replaying an add is safe, concurrent updates are
        // last-writer-wins, and created_at of an existing row survives.
        sqlx::query(
            r#"
            INSERT INTO records (kind, id, parent_id, ancestry, payload, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(kind, id) DO UPDATE SET
                parent_id = excluded.parent_id,
                ancestry = excluded.ancestry,
                payload = excluded.payload,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(record.kind.as_str())
        .bind(&record.id)
        .bind(&record.parent_id)
        .bind(&record.ancestry)
        .bind(record.payload.to_string())
        .bind(record.created_at)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(|e| RegistryError::StoreFailure {
            operation: "save".to_string(),
            details: e.to_string(),
        })?;

        Ok(())
    }

    async fn remove(&self, kind: EntityKind, id: &str) -> Result<(), RegistryError> {
        sqlx::query(
            r#"
            DELETE FROM records WHERE kind = ? AND id = ?
            "#,
        )
        .bind(kind.as_str())
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| RegistryError::StoreFailure {
            operation: "remove".to_string(),
            details: e.to_string(),
        })?;

        Ok(())
    }

    async fn query(
        &self,
        kind: EntityKind,
        filter: &RecordFilter,
    ) -> Result<Vec<StoredRecord>, RegistryError> {
        let mut sql = String::from(
            "SELECT kind, id, parent_id, ancestry, payload, created_at, updated_at \
             FROM records WHERE kind = ?",
        );
        if filter.parent_id.is_some() {
            sql.push_str(" AND parent_id = ?");
        }
        if filter.ancestor_id.is_some() {
            // Exact segment match within the slash-joined chain.
            sql.push_str(" AND instr('/' || ancestry || '/', '/' || ? || '/') > 0");
        }
        sql.push_str(" ORDER BY created_at, id");

        let mut query = sqlx::query_as::<_, RecordRow>(&sql).bind(kind.as_str());
        if let Some(parent) = &filter.parent_id {
            query = query.bind(parent);
        }
        if let Some(ancestor) = &filter.ancestor_id {
            query = query.bind(ancestor);
        }

        let rows = query.fetch_all(&self.pool).await?;
        rows.into_iter().map(RecordRow::into_record).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn memory_store() -> SqliteRecordStore {
        SqliteRecordStore::from_url("sqlite::memory:")
            .await
            .expect("in-memory sqlite")
    }

    fn record(kind: EntityKind, id: &str, parent: Option<&str>, ancestry: &str) -> StoredRecord {
        StoredRecord::new(
            kind,
            id,
            parent.map(str::to_string),
            ancestry,
            json!({ "id": id }),
        )
    }

    #[tokio::test]
    async fn test_create_get_round_trip() {
        let store = memory_store().await;
        let original = record(EntityKind::Experiment, "exp-1", None, "");
        store.create(original.clone()).await.unwrap();

        let fetched = store
            .get(EntityKind::Experiment, "exp-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(fetched.id, original.id);
        assert_eq!(fetched.payload, original.payload);
        assert!(fetched.parent_id.is_none());
    }

    #[tokio::test]
    async fn test_get_absent_returns_none() {
        let store = memory_store().await;
        assert!(store.get(EntityKind::Task, "nope").await.unwrap().is_none());
        assert!(!store.exists(EntityKind::Task, "nope").await.unwrap());
    }

    #[tokio::test]
    async fn test_create_duplicate_fails() {
        let store = memory_store().await;
        store
            .create(record(EntityKind::Task, "task-1", None, ""))
            .await
            .unwrap();
        let err = store
            .create(record(EntityKind::Task, "task-1", None, ""))
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "STORE_FAILURE");
    }

    #[tokio::test]
    async fn test_save_upsert_last_writer_wins() {
        let store = memory_store().await;
        let mut rec = record(EntityKind::Status, "task-1:TASK", Some("task-1"), "exp-1/node-1/task-1");
        store.save(rec.clone()).await.unwrap();

        rec.payload = json!({ "state": "EXECUTING" });
        store.save(rec).await.unwrap();

        let fetched = store
            .get(EntityKind::Status, "task-1:TASK")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(fetched.payload["state"], "EXECUTING");
    }

    #[tokio::test]
    async fn test_remove_then_absent() {
        let store = memory_store().await;
        store
            .create(record(EntityKind::Job, "t1:j1", Some("t1"), "exp-1/n1/t1"))
            .await
            .unwrap();
        store.remove(EntityKind::Job, "t1:j1").await.unwrap();
        assert!(!store.exists(EntityKind::Job, "t1:j1").await.unwrap());
        // Removing again is a no-op.
        store.remove(EntityKind::Job, "t1:j1").await.unwrap();
    }

    #[tokio::test]
    async fn test_query_filters() {
        let store = memory_store().await;
        store
            .create(record(EntityKind::Task, "t1", Some("node-1"), "exp-1/node-1"))
            .await
            .unwrap();
        store
            .create(record(EntityKind::Task, "t2", Some("node-1"), "exp-1/node-1"))
            .await
            .unwrap();
        store
            .create(record(EntityKind::Task, "t3", Some("node-2"), "exp-2/node-2"))
            .await
            .unwrap();

        let by_parent = store
            .query(EntityKind::Task, &RecordFilter::by_parent("node-1"))
            .await
            .unwrap();
        assert_eq!(by_parent.len(), 2);

        let by_ancestor = store
            .query(EntityKind::Task, &RecordFilter::by_ancestor("exp-1"))
            .await
            .unwrap();
        assert_eq!(by_ancestor.len(), 2);

        let all = store
            .query(EntityKind::Task, &RecordFilter::default())
            .await
            .unwrap();
        assert_eq!(all.len(), 3);
    }

    #[tokio::test]
    async fn test_query_ancestor_exact_segment() {
        let store = memory_store().await;
        store
            .create(record(
                EntityKind::ErrorDetail,
                "e1",
                Some("task-10"),
                "exp-1/node-1/task-10",
            ))
            .await
            .unwrap();

        let matched = store
            .query(EntityKind::ErrorDetail, &RecordFilter::by_ancestor("task-1"))
            .await
            .unwrap();
        assert!(matched.is_empty(), "prefix of a segment must not match");

        let matched = store
            .query(
                EntityKind::ErrorDetail,
                &RecordFilter::by_ancestor("task-10"),
            )
            .await
            .unwrap();
        assert_eq!(matched.len(), 1);
    }

    #[tokio::test]
    async fn test_from_path_creates_file() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("nested").join("catalog.db");
        let store = SqliteRecordStore::from_path(&db_path).await.unwrap();
        store
            .create(record(EntityKind::Experiment, "exp-1", None, ""))
            .await
            .unwrap();
        assert!(db_path.exists());
    }
}
