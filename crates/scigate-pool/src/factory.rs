// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Caller-supplied factory seams decoupling the pool from any specific
//! backend service.

use async_trait::async_trait;

use crate::error::PoolError;

/// Opens the socket-backed channel to a backend service.
#[async_trait]
pub trait ProtocolFactory: Send + Sync + 'static {
    /// The transport channel type.
    type Channel: Send + 'static;

    /// Open a channel to `host:port`.
    async fn make_protocol(&self, host: &str, port: u16) -> Result<Self::Channel, PoolError>;
}

/// Wraps a transport channel as a typed service client.
pub trait ClientFactory<C>: Send + Sync + 'static {
    /// The typed client produced.
    type Client: PooledClient;

    /// Wrap the channel.
    fn make_client(&self, channel: C) -> Self::Client;
}

/// Per-client capabilities the pool relies on.
#[async_trait]
pub trait PooledClient: Send + 'static {
    /// Cheap health probe, e.g. a version-query round trip. Called on
    /// every borrow before the client is handed out.
    async fn is_healthy(&mut self) -> bool;

    /// Close both directions of the client's channel.
    ///
    /// Must attempt each direction independently: one side being already
    /// closed is not a reason to skip the other.
    async fn close(&mut self) -> Result<(), PoolError>;
}
