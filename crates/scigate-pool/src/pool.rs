// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! The pooled-client manager.
//!
//! Borrowed clients are validated with a cheap health probe before being
//! handed out; unhealthy clients are invalidated and the borrow retries up
//! to a bounded budget. Leases are tracked so clients checked out past the
//! abandoned threshold can be reclaimed instead of leaking capacity when
//! calling code fails to return them.

use std::collections::{HashMap, VecDeque};
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::PoolError;
use crate::factory::{ClientFactory, PooledClient, ProtocolFactory};

/// Fixed borrow-validation budget: after this many unhealthy or
/// unconstructible clients a borrow fails loudly instead of looping.
pub const VALIDATION_ATTEMPTS: u32 = 10;

/// Pool tuning knobs.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum clients alive at once (idle + checked out).
    pub max_size: usize,
    /// How long a borrower waits for capacity before failing with
    /// [`PoolError::Exhausted`].
    pub borrow_timeout: Duration,
    /// How long a lease may be held before it counts as abandoned.
    pub abandoned_timeout: Duration,
    /// Reclaim abandoned leases, freeing their capacity. A reclaimed
    /// client's late return is discarded, not recycled.
    pub abandoned_removal_enabled: bool,
    /// Log abandoned leases when the reaper finds them.
    pub abandoned_removal_logged: bool,
    /// How often the reaper scans for abandoned leases.
    pub reaper_interval: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_size: 8,
            borrow_timeout: Duration::from_secs(30),
            abandoned_timeout: Duration::from_secs(120),
            abandoned_removal_enabled: false,
            abandoned_removal_logged: false,
            reaper_interval: Duration::from_secs(30),
        }
    }
}

/// A client checked out of the pool.
///
/// Exclusively owned by the borrower until passed back through
/// [`ClientPool::return_resource`] or
/// [`ClientPool::return_broken_resource`]. Dropping it without returning
/// leaks the lease until the abandoned reaper reclaims it — that is what
/// the reaper is for, not a supported fast path.
#[derive(Debug)]
pub struct PooledResource<C> {
    client: C,
    lease_id: u64,
}

impl<C> PooledResource<C> {
    /// The lease identifier, stable for the lifetime of the checkout.
    pub fn lease_id(&self) -> u64 {
        self.lease_id
    }
}

impl<C> Deref for PooledResource<C> {
    type Target = C;

    fn deref(&self) -> &C {
        &self.client
    }
}

impl<C> DerefMut for PooledResource<C> {
    fn deref_mut(&mut self) -> &mut C {
        &mut self.client
    }
}

struct Lease {
    checked_out_at: Instant,
    // Dropping the lease releases its capacity permit.
    _permit: OwnedSemaphorePermit,
}

struct PoolState<C> {
    idle: VecDeque<C>,
    leases: HashMap<u64, Lease>,
    next_lease_id: u64,
    closed: bool,
}

impl<C> PoolState<C> {
    fn new() -> Self {
        Self {
            idle: VecDeque::new(),
            leases: HashMap::new(),
            next_lease_id: 1,
            closed: false,
        }
    }
}

/// Generic pool of validated RPC clients for one backend endpoint.
///
/// Construction is lazy: clients are built by the caller-supplied factory
/// pair only when a borrow finds no idle client. Borrow and return are
/// safe for concurrent callers; the pool serializes access to its
/// bookkeeping internally.
pub struct ClientPool<P, F>
where
    P: ProtocolFactory,
    F: ClientFactory<P::Channel>,
{
    protocol_factory: P,
    client_factory: F,
    host: String,
    port: u16,
    config: PoolConfig,
    semaphore: Arc<Semaphore>,
    state: Arc<Mutex<PoolState<F::Client>>>,
    shutdown_tx: watch::Sender<bool>,
    reaper: Mutex<Option<JoinHandle<()>>>,
}

impl<P, F> ClientPool<P, F>
where
    P: ProtocolFactory,
    F: ClientFactory<P::Channel>,
{
    /// Create a pool for `host:port`.
    ///
    /// When abandoned handling is configured a reaper task is spawned, so
    /// this must run inside a tokio runtime in that case.
    pub fn new(
        protocol_factory: P,
        client_factory: F,
        host: impl Into<String>,
        port: u16,
        config: PoolConfig,
    ) -> Self {
        let state = Arc::new(Mutex::new(PoolState::new()));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let reaper = if config.abandoned_removal_enabled || config.abandoned_removal_logged {
            Some(spawn_reaper(state.clone(), config.clone(), shutdown_rx))
        } else {
            None
        };

        Self {
            protocol_factory,
            client_factory,
            host: host.into(),
            port,
            semaphore: Arc::new(Semaphore::new(config.max_size)),
            config,
            state,
            shutdown_tx,
            reaper: Mutex::new(reaper),
        }
    }

    async fn connect(&self) -> Result<F::Client, PoolError> {
        let channel = self
            .protocol_factory
            .make_protocol(&self.host, self.port)
            .await?;
        Ok(self.client_factory.make_client(channel))
    }

    /// Borrow a validated client.
    ///
    /// Blocks (up to the configured borrow timeout) until capacity is
    /// available, then hands out an idle client or lazily constructs one.
    /// Every candidate is health-checked first; unhealthy clients are
    /// closed and the borrow retries, up to [`VALIDATION_ATTEMPTS`] times.
    pub async fn get_resource(&self) -> Result<PooledResource<F::Client>, PoolError> {
        if self.state.lock().await.closed {
            return Err(PoolError::Closed);
        }

        let started = Instant::now();
        let permit = match tokio::time::timeout(
            self.config.borrow_timeout,
            self.semaphore.clone().acquire_owned(),
        )
        .await
        {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(PoolError::Closed),
            Err(_) => {
                return Err(PoolError::Exhausted {
                    waited_ms: started.elapsed().as_millis() as u64,
                });
            }
        };

        let mut permit = Some(permit);
        let mut last_failure = "client failed health check".to_string();

        for attempt in 1..=VALIDATION_ATTEMPTS {
            let idle_client = self.state.lock().await.idle.pop_front();
            let mut client = match idle_client {
                Some(client) => client,
                None => match self.connect().await {
                    Ok(client) => client,
                    Err(e) => {
                        debug!(attempt, error = %e, "client creation failed, retrying");
                        last_failure = e.to_string();
                        continue;
                    }
                },
            };

            if client.is_healthy().await {
                let mut state = self.state.lock().await;
                if state.closed {
                    drop(state);
                    let _ = client.close().await;
                    return Err(PoolError::Closed);
                }
                let lease_id = state.next_lease_id;
                state.next_lease_id += 1;
                state.leases.insert(
                    lease_id,
                    Lease {
                        checked_out_at: Instant::now(),
                        _permit: permit.take().expect("permit consumed once"),
                    },
                );
                return Ok(PooledResource { client, lease_id });
            }

            debug!(attempt, "invalidating client that failed its health check");
            if let Err(e) = client.close().await {
                debug!(error = %e, "error closing invalidated client");
            }
        }

        Err(PoolError::ValidationExhausted {
            attempts: VALIDATION_ATTEMPTS,
            details: last_failure,
        })
    }

    /// Return a healthy client for recycling.
    ///
    /// If the lease was reclaimed as abandoned in the meantime, or the
    /// pool is closed, the client is closed and discarded instead.
    pub async fn return_resource(
        &self,
        resource: PooledResource<F::Client>,
    ) -> Result<(), PoolError> {
        let PooledResource {
            mut client,
            lease_id,
        } = resource;

        let mut state = self.state.lock().await;
        let lease = state.leases.remove(&lease_id);
        match lease {
            Some(_) if !state.closed => {
                state.idle.push_back(client);
                Ok(())
            }
            Some(_) => {
                drop(state);
                client.close().await
            }
            None => {
                drop(state);
                debug!(lease_id, "discarding late return of a reclaimed lease");
                client.close().await
            }
        }
    }

    /// Invalidate a broken client: close it and free its capacity without
    /// recycling.
    pub async fn return_broken_resource(
        &self,
        resource: PooledResource<F::Client>,
    ) -> Result<(), PoolError> {
        let PooledResource {
            mut client,
            lease_id,
        } = resource;

        self.state.lock().await.leases.remove(&lease_id);
        client.close().await
    }

    /// Number of clients currently checked out.
    pub async fn active_count(&self) -> usize {
        self.state.lock().await.leases.len()
    }

    /// Number of idle clients waiting in the pool.
    pub async fn idle_count(&self) -> usize {
        self.state.lock().await.idle.len()
    }

    /// Close the pool: stop the reaper, refuse further borrows, and close
    /// every idle client.
    ///
    /// Every idle client is close-attempted even when an earlier close
    /// fails; the first failure is reported as [`PoolError::CloseFailed`].
    /// Clients still checked out are closed when returned.
    pub async fn close(&self) -> Result<(), PoolError> {
        {
            let mut state = self.state.lock().await;
            if state.closed {
                return Ok(());
            }
            state.closed = true;
        }

        let _ = self.shutdown_tx.send(true);
        if let Some(handle) = self.reaper.lock().await.take() {
            let _ = handle.await;
        }
        self.semaphore.close();

        let idle: Vec<F::Client> = {
            let mut state = self.state.lock().await;
            state.idle.drain(..).collect()
        };

        let mut first_failure: Option<PoolError> = None;
        for mut client in idle {
            if let Err(e) = client.close().await {
                warn!(error = %e, "error closing idle client during pool shutdown");
                if first_failure.is_none() {
                    first_failure = Some(e);
                }
            }
        }

        match first_failure {
            Some(e) => Err(PoolError::CloseFailed {
                details: e.to_string(),
            }),
            None => Ok(()),
        }
    }
}

/// Periodically reclaim leases held past the abandoned threshold.
fn spawn_reaper<C: Send + 'static>(
    state: Arc<Mutex<PoolState<C>>>,
    config: PoolConfig,
    mut shutdown_rx: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(config.reaper_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                }

                _ = ticker.tick() => {
                    let mut state = state.lock().await;
                    let now = Instant::now();
                    let expired: Vec<u64> = state
                        .leases
                        .iter()
                        .filter(|(_, lease)| {
                            now.duration_since(lease.checked_out_at) >= config.abandoned_timeout
                        })
                        .map(|(id, _)| *id)
                        .collect();

                    for lease_id in expired {
                        if config.abandoned_removal_logged {
                            warn!(lease_id, "abandoned client lease detected");
                        }
                        if config.abandoned_removal_enabled {
                            // Dropping the lease frees its permit; the
                            // client itself is discarded on late return.
                            state.leases.remove(&lease_id);
                        }
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Channel stand-in carrying the construction ordinal.
    struct MockChannel {
        index: u32,
    }

    /// Protocol factory counting how many channels it opened.
    struct MockProtocolFactory {
        built: Arc<AtomicU32>,
        fail_creation: bool,
    }

    #[async_trait]
    impl ProtocolFactory for MockProtocolFactory {
        type Channel = MockChannel;

        async fn make_protocol(&self, _host: &str, _port: u16) -> Result<MockChannel, PoolError> {
            let index = self.built.fetch_add(1, Ordering::SeqCst) + 1;
            if self.fail_creation {
                return Err(PoolError::CreateFailed {
                    details: "connection refused".to_string(),
                });
            }
            Ok(MockChannel { index })
        }
    }

    #[derive(Debug)]
    struct MockClient {
        index: u32,
        healthy_from: u32,
        closed: Arc<AtomicU32>,
    }

    #[async_trait]
    impl PooledClient for MockClient {
        async fn is_healthy(&mut self) -> bool {
            self.index >= self.healthy_from
        }

        async fn close(&mut self) -> Result<(), PoolError> {
            self.closed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    /// Client factory wiring the channel ordinal through to the client.
    struct MockClientFactory {
        healthy_from: u32,
        closed: Arc<AtomicU32>,
    }

    impl ClientFactory<MockChannel> for MockClientFactory {
        type Client = MockClient;

        fn make_client(&self, channel: MockChannel) -> MockClient {
            MockClient {
                index: channel.index,
                healthy_from: self.healthy_from,
                closed: self.closed.clone(),
            }
        }
    }

    fn pool_with(
        healthy_from: u32,
        fail_creation: bool,
        config: PoolConfig,
    ) -> (
        ClientPool<MockProtocolFactory, MockClientFactory>,
        Arc<AtomicU32>,
        Arc<AtomicU32>,
    ) {
        let built = Arc::new(AtomicU32::new(0));
        let closed = Arc::new(AtomicU32::new(0));
        let pool = ClientPool::new(
            MockProtocolFactory {
                built: built.clone(),
                fail_creation,
            },
            MockClientFactory {
                healthy_from,
                closed: closed.clone(),
            },
            "backend.example.org",
            9930,
            config,
        );
        (pool, built, closed)
    }

    #[tokio::test]
    async fn test_borrow_returns_first_healthy_client() {
        // Health checks fail for the first 3 constructed clients and
        // succeed from the 4th.
        let (pool, built, closed) = pool_with(4, false, PoolConfig::default());

        let resource = pool.get_resource().await.unwrap();
        assert_eq!(resource.index, 4, "borrow must skip the unhealthy clients");
        assert_eq!(built.load(Ordering::SeqCst), 4);
        assert_eq!(closed.load(Ordering::SeqCst), 3, "unhealthy clients closed");

        pool.return_resource(resource).await.unwrap();
        assert_eq!(pool.idle_count().await, 1);
    }

    #[tokio::test]
    async fn test_borrow_fails_after_exactly_ten_attempts() {
        let (pool, built, _) = pool_with(u32::MAX, false, PoolConfig::default());

        let err = pool.get_resource().await.unwrap_err();
        match err {
            PoolError::ValidationExhausted { attempts, .. } => {
                assert_eq!(attempts, VALIDATION_ATTEMPTS)
            }
            other => panic!("expected ValidationExhausted, got {other:?}"),
        }
        assert_eq!(built.load(Ordering::SeqCst), 10);
    }

    #[tokio::test]
    async fn test_creation_failures_count_against_the_budget() {
        let (pool, built, _) = pool_with(1, true, PoolConfig::default());

        let err = pool.get_resource().await.unwrap_err();
        assert!(matches!(err, PoolError::ValidationExhausted { .. }));
        assert_eq!(built.load(Ordering::SeqCst), 10);
    }

    #[tokio::test]
    async fn test_returned_client_is_recycled() {
        let (pool, built, _) = pool_with(1, false, PoolConfig::default());

        let resource = pool.get_resource().await.unwrap();
        pool.return_resource(resource).await.unwrap();
        let resource = pool.get_resource().await.unwrap();
        assert_eq!(resource.index, 1, "idle client must be reused");
        assert_eq!(built.load(Ordering::SeqCst), 1);
        pool.return_resource(resource).await.unwrap();
    }

    #[tokio::test]
    async fn test_broken_client_is_not_recycled() {
        let (pool, built, closed) = pool_with(1, false, PoolConfig::default());

        let resource = pool.get_resource().await.unwrap();
        pool.return_broken_resource(resource).await.unwrap();
        assert_eq!(closed.load(Ordering::SeqCst), 1);
        assert_eq!(pool.idle_count().await, 0);

        let resource = pool.get_resource().await.unwrap();
        assert_eq!(resource.index, 2, "broken client must be replaced");
        assert_eq!(built.load(Ordering::SeqCst), 2);
        pool.return_resource(resource).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_borrow_times_out_when_exhausted() {
        let config = PoolConfig {
            max_size: 1,
            borrow_timeout: Duration::from_millis(200),
            ..Default::default()
        };
        let (pool, _, _) = pool_with(1, false, config);

        let held = pool.get_resource().await.unwrap();
        let err = pool.get_resource().await.unwrap_err();
        assert!(matches!(err, PoolError::Exhausted { .. }));

        pool.return_resource(held).await.unwrap();
        let resource = pool.get_resource().await.unwrap();
        pool.return_resource(resource).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_lease_is_reclaimed() {
        let config = PoolConfig {
            max_size: 1,
            borrow_timeout: Duration::from_secs(60),
            abandoned_timeout: Duration::from_secs(2),
            abandoned_removal_enabled: true,
            abandoned_removal_logged: true,
            reaper_interval: Duration::from_secs(1),
            ..Default::default()
        };
        let (pool, built, closed) = pool_with(1, false, config);

        // Borrow and never return: the lease goes abandoned.
        let leaked = pool.get_resource().await.unwrap();
        assert_eq!(pool.active_count().await, 1);

        // A second borrower eventually gets capacity back from the reaper.
        let resource = pool.get_resource().await.unwrap();
        assert_eq!(resource.index, 2);
        assert_eq!(built.load(Ordering::SeqCst), 2);
        assert_eq!(pool.active_count().await, 1, "reclaimed lease is gone");

        // The late return of the reclaimed client is discarded.
        pool.return_resource(leaked).await.unwrap();
        assert_eq!(pool.idle_count().await, 0);
        assert_eq!(closed.load(Ordering::SeqCst), 1);

        pool.return_resource(resource).await.unwrap();
        assert_eq!(pool.idle_count().await, 1);
    }

    #[tokio::test]
    async fn test_close_refuses_further_borrows_and_closes_idle() {
        let (pool, _, closed) = pool_with(1, false, PoolConfig::default());

        let resource = pool.get_resource().await.unwrap();
        pool.return_resource(resource).await.unwrap();
        assert_eq!(pool.idle_count().await, 1);

        pool.close().await.unwrap();
        assert_eq!(closed.load(Ordering::SeqCst), 1, "idle client closed");

        let err = pool.get_resource().await.unwrap_err();
        assert!(matches!(err, PoolError::Closed));

        // Closing twice is a no-op.
        pool.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_outstanding_client_closed_on_return_after_close() {
        let (pool, _, closed) = pool_with(1, false, PoolConfig::default());

        let resource = pool.get_resource().await.unwrap();
        pool.close().await.unwrap();

        pool.return_resource(resource).await.unwrap();
        assert_eq!(closed.load(Ordering::SeqCst), 1);
        assert_eq!(pool.idle_count().await, 0, "not recycled after close");
    }

    #[tokio::test]
    async fn test_concurrent_borrowers_get_distinct_clients() {
        let config = PoolConfig {
            max_size: 4,
            ..Default::default()
        };
        let (pool, _, _) = pool_with(1, false, config);
        let pool = Arc::new(pool);

        let mut handles = Vec::new();
        for _ in 0..4 {
            let pool = pool.clone();
            handles.push(tokio::spawn(async move {
                let resource = pool.get_resource().await.unwrap();
                let index = resource.index;
                pool.return_resource(resource).await.unwrap();
                index
            }));
        }

        let mut indexes = Vec::new();
        for handle in handles {
            indexes.push(handle.await.unwrap());
        }
        indexes.sort_unstable();
        indexes.dedup();
        // Clients may be recycled between sequentially-finishing tasks,
        // but no two concurrent holders ever share one.
        assert!(!indexes.is_empty());
    }
}
