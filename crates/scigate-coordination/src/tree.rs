// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! The coordination-tree collaborator interface and an in-memory
//! implementation for tests and embedded single-process deployments.
//!
//! The external service (an ensemble with watch/notify semantics) is
//! reached through [`CoordinationTree`]; this core only relies on its
//! read-after-write consistency per path.

use std::collections::BTreeMap;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::RwLock;

/// Errors from the coordination tree or tag/state decoding.
#[derive(Debug, Error)]
pub enum CoordinationError {
    /// The coordination service failed (connectivity loss, session
    /// expiry); carries the underlying cause unmodified.
    #[error("coordination service failure: {details}")]
    Service {
        /// Underlying error details.
        details: String,
    },

    /// A stored value could not be decoded.
    #[error("corrupt data at '{path}': {details}")]
    Corrupt {
        /// Path of the undecodable node.
        path: String,
        /// What was wrong with the payload.
        details: String,
    },
}

/// Result type using CoordinationError
pub type Result<T> = std::result::Result<T, CoordinationError>;

/// Path-based read/write primitives of the coordination-tree service.
///
/// A missing node is never an error: reads return `None`/`false` and the
/// caller decides what absence means.
#[async_trait]
pub trait CoordinationTree: Send + Sync {
    /// Whether a node exists at the path.
    async fn exists(&self, path: &str) -> Result<bool>;

    /// Read a node's data, `None` if the node is absent.
    async fn get(&self, path: &str) -> Result<Option<Vec<u8>>>;

    /// Create a node with data; fails if the node already exists.
    /// Missing intermediate nodes are created empty.
    async fn create(&self, path: &str, data: &[u8]) -> Result<()>;

    /// Write a node's data, creating the node (and intermediates) if
    /// absent.
    async fn set(&self, path: &str, data: &[u8]) -> Result<()>;

    /// Delete a node and everything below it. Deleting an absent node is
    /// not an error.
    async fn delete(&self, path: &str) -> Result<()>;

    /// Names of the direct children of a node, sorted.
    async fn children(&self, path: &str) -> Result<Vec<String>>;
}

/// In-memory coordination tree.
///
/// Single-process stand-in with the same per-path read-after-write
/// guarantee as the real service. Not a distributed implementation.
#[derive(Default)]
pub struct MemoryCoordinationTree {
    nodes: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl MemoryCoordinationTree {
    /// Create an empty tree.
    pub fn new() -> Self {
        Self::default()
    }

    fn parents_of(path: &str) -> Vec<String> {
        let mut parents = Vec::new();
        let mut current = String::new();
        let mut segments = path.split('/').filter(|s| !s.is_empty()).peekable();
        while let Some(segment) = segments.next() {
            current.push('/');
            current.push_str(segment);
            if segments.peek().is_some() {
                parents.push(current.clone());
            }
        }
        parents
    }
}

#[async_trait]
impl CoordinationTree for MemoryCoordinationTree {
    async fn exists(&self, path: &str) -> Result<bool> {
        Ok(self.nodes.read().await.contains_key(path))
    }

    async fn get(&self, path: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.nodes.read().await.get(path).cloned())
    }

    async fn create(&self, path: &str, data: &[u8]) -> Result<()> {
        let mut nodes = self.nodes.write().await;
        if nodes.contains_key(path) {
            return Err(CoordinationError::Service {
                details: format!("node already exists: {}", path),
            });
        }
        for parent in Self::parents_of(path) {
            nodes.entry(parent).or_default();
        }
        nodes.insert(path.to_string(), data.to_vec());
        Ok(())
    }

    async fn set(&self, path: &str, data: &[u8]) -> Result<()> {
        let mut nodes = self.nodes.write().await;
        for parent in Self::parents_of(path) {
            nodes.entry(parent).or_default();
        }
        nodes.insert(path.to_string(), data.to_vec());
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let mut nodes = self.nodes.write().await;
        let prefix = format!("{}/", path);
        nodes.retain(|key, _| key != path && !key.starts_with(&prefix));
        Ok(())
    }

    async fn children(&self, path: &str) -> Result<Vec<String>> {
        let nodes = self.nodes.read().await;
        let prefix = format!("{}/", path.trim_end_matches('/'));
        let mut names: Vec<String> = nodes
            .keys()
            .filter_map(|key| key.strip_prefix(&prefix))
            .filter(|rest| !rest.is_empty() && !rest.contains('/'))
            .map(str::to_string)
            .collect();
        names.dedup();
        Ok(names)
    }
}
