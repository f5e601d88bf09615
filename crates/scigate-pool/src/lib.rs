// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Scigate Pool - Health-Checked RPC Client Pooling
//!
//! Generic pooling for outbound RPC clients to backend execution
//! services. The pool is decoupled from any specific service by a
//! caller-supplied factory pair: a [`ProtocolFactory`] opening the
//! socket-backed channel and a [`ClientFactory`] wrapping it as a typed
//! client implementing [`PooledClient`].
//!
//! # Borrow Semantics
//!
//! | Operation | Behavior |
//! |-----------|----------|
//! | [`get_resource`] | wait for capacity, validate, invalidate-and-retry up to 10 times |
//! | [`return_resource`] | recycle a healthy client |
//! | [`return_broken_resource`] | close and discard, never recycle |
//! | [`close`] | stop the reaper and close every idle client |
//!
//! A borrowed client is exclusively owned between borrow and return.
//! Leases held past the configured abandoned threshold can be reclaimed
//! by a background reaper (logging and/or removal, per configuration),
//! so slow leaks in calling code do not exhaust the pool. All terminal
//! failures surface as one [`PoolError`] kind carrying the cause.
//!
//! [`get_resource`]: pool::ClientPool::get_resource
//! [`return_resource`]: pool::ClientPool::return_resource
//! [`return_broken_resource`]: pool::ClientPool::return_broken_resource
//! [`close`]: pool::ClientPool::close

#![deny(missing_docs)]

/// Pool error kinds.
pub mod error;

/// Factory seams supplied by the caller.
pub mod factory;

/// The pooled-client manager.
pub mod pool;

pub use error::PoolError;
pub use factory::{ClientFactory, PooledClient, ProtocolFactory};
pub use pool::{ClientPool, PoolConfig, PooledResource, VALIDATION_ATTEMPTS};
