//! Connection pool implementation.
//!
//! This module provides the generation-aware pool used for every server
//! endpoint the driver talks to. Topology monitoring pauses the pool with
//! [`Pool::invalidate`] when the server becomes unusable and resumes it with
//! [`Pool::ready`]; connections created before the pause are retired lazily
//! as the pool encounters them.

use std::collections::VecDeque;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use docdb_topology::ServerAddress;
use parking_lot::Mutex;

use crate::config::PoolConfig;
use crate::connection::{
    CloseReason, ConnectContext, Connection, ConnectionFactory, ServiceId, Tracked,
};
use crate::error::{ClearCause, PoolError};
use crate::generation::GenerationCounter;
use crate::maintenance::{self, Job, WorkerSignal};
use crate::state::{Lifecycle, Pause, PoolState};
use crate::timeout::Timeout;
use crate::waiter::{Delivery, Handoff, Responder, Slot, WaiterQueue};

type Conn<F> = <F as ConnectionFactory>::Connection;

/// Completion handler for [`Pool::get_async`].
pub type AcquireCallback<F> =
    Box<dyn FnOnce(Result<PooledConnection<F>, PoolError>) + Send + 'static>;

/// A connection pool for a single server endpoint.
///
/// The pool is created paused. Call [`ready()`](Pool::ready) once the
/// server has been validated; until then every acquisition fails with
/// [`PoolError::Cleared`].
///
/// # Example
///
/// ```rust,ignore
/// use docdb_driver_pool::Pool;
///
/// let pool = Pool::builder(factory)
///     .address("db0:27017".parse()?)
///     .max_size(20)
///     .build()?;
///
/// pool.ready();
/// let conn = pool.get()?;
/// // Use connection...
/// // Connection automatically returned to pool on drop
/// ```
pub struct Pool<F: ConnectionFactory> {
    inner: Arc<PoolInner<F>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

pub(crate) struct PoolInner<F: ConnectionFactory> {
    /// Pool configuration.
    pub(crate) config: PoolConfig,

    /// Endpoint every connection goes to.
    pub(crate) address: ServerAddress,

    /// Creates physical connections.
    factory: F,

    /// Everything that must change together.
    core: Mutex<PoolCore<Conn<F>>>,

    /// Global and per-service generations.
    generations: GenerationCounter,

    /// Counter for generating connection IDs.
    next_connection_id: AtomicU64,

    /// When the pool was created.
    created_at: Instant,

    /// Pool metrics.
    metrics: Mutex<PoolMetricsInner>,

    /// Background worker mailbox.
    pub(crate) worker: WorkerSignal,
}

struct PoolCore<C> {
    lifecycle: Lifecycle,
    /// Most recently returned first.
    idle: VecDeque<Tracked<C>>,
    /// Idle, checked out, and reserved for an in-flight creation.
    open_count: usize,
    checked_out: usize,
    waiters: WaiterQueue<Tracked<C>>,
}

/// Physical closes and waiter resolutions decided under the lock.
struct Effects<C> {
    closes: Vec<(Tracked<C>, CloseReason)>,
    deliveries: Vec<Delivery<Tracked<C>>>,
}

impl<C> Default for Effects<C> {
    fn default() -> Self {
        Self {
            closes: Vec::new(),
            deliveries: Vec::new(),
        }
    }
}

impl<C> Effects<C> {
    fn close(&mut self, conn: Tracked<C>, reason: CloseReason) {
        self.closes.push((conn, reason));
    }
}

enum Checkout<C> {
    Rejected(PoolError),
    Ready(Tracked<C>),
    Create { generation: u64 },
    Wait,
}

enum Opened<C> {
    Done(Tracked<C>),
    Failed(PoolError),
    Retry { generation: u64 },
}

/// Internal metrics tracking.
#[derive(Debug, Default)]
struct PoolMetricsInner {
    /// Total connections created.
    connections_created: u64,
    /// Total connections closed.
    connections_closed: u64,
    /// Factory failures.
    creation_failures: u64,
    /// Connections closed because their generation was retired.
    stale_discarded: u64,
    /// Total successful checkouts.
    checkouts_successful: u64,
    /// Total failed checkouts (timeouts, cleared, errors).
    checkouts_failed: u64,
    /// Failed checkouts that ran out of time.
    checkouts_timed_out: u64,
    /// READY to PAUSED transitions.
    clears: u64,
}

impl<F: ConnectionFactory> Pool<F> {
    /// Create a new pool builder around `factory`.
    #[must_use]
    pub fn builder(factory: F) -> PoolBuilder<F> {
        PoolBuilder::new(factory)
    }

    /// Create a paused pool for `address`.
    ///
    /// Starts the background maintenance worker. For more control use
    /// [`Pool::builder()`].
    pub fn new(address: ServerAddress, config: PoolConfig, factory: F) -> Result<Self, PoolError> {
        config.validate()?;

        let inner = Arc::new(PoolInner {
            config: config.clone(),
            address,
            factory,
            core: Mutex::new(PoolCore {
                lifecycle: Lifecycle::new(),
                idle: VecDeque::new(),
                open_count: 0,
                checked_out: 0,
                waiters: WaiterQueue::new(),
            }),
            generations: GenerationCounter::new(),
            next_connection_id: AtomicU64::new(1),
            created_at: Instant::now(),
            metrics: Mutex::new(PoolMetricsInner::default()),
            worker: WorkerSignal::new(),
        });

        let worker = maintenance::spawn(Arc::clone(&inner)).map_err(PoolError::Spawn)?;

        tracing::info!(
            address = %inner.address,
            min = config.min_size,
            max = config.max_size,
            "connection pool created"
        );

        Ok(Self {
            inner,
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Get a connection, waiting up to the configured `max_wait_time`.
    pub fn get(&self) -> Result<PooledConnection<F>, PoolError> {
        self.get_with(Timeout::start_now(self.inner.config.max_wait_time))
    }

    /// Get a connection, waiting up to `timeout`.
    pub fn get_timeout(&self, timeout: Duration) -> Result<PooledConnection<F>, PoolError> {
        self.get_with(Timeout::start_now(timeout))
    }

    /// Get a connection within an already started [`Timeout`].
    ///
    /// Returns an idle connection if one is usable, otherwise creates one
    /// if the pool is below capacity, otherwise waits in line until a
    /// connection is checked in or the timeout expires.
    pub fn get_with(&self, timeout: Timeout) -> Result<PooledConnection<F>, PoolError> {
        tracing::trace!(address = %self.inner.address, "acquiring connection from pool");
        let result = self.inner.checkout_blocking(timeout);
        self.inner.record_checkout(&result);
        result
    }

    /// Get a connection without blocking the calling thread.
    ///
    /// `callback` is invoked exactly once with the outcome. It may run on
    /// the calling thread (idle connection available, or immediate
    /// failure), on the pool's maintenance thread, or on whichever thread
    /// frees capacity, invalidates, or closes the pool.
    pub fn get_async<C>(&self, callback: C)
    where
        C: FnOnce(Result<PooledConnection<F>, PoolError>) + Send + 'static,
    {
        self.get_async_with(Timeout::start_now(self.inner.config.max_wait_time), callback);
    }

    /// [`get_async`](Pool::get_async) with an explicit wait time.
    pub fn get_async_timeout<C>(&self, timeout: Duration, callback: C)
    where
        C: FnOnce(Result<PooledConnection<F>, PoolError>) + Send + 'static,
    {
        self.get_async_with(Timeout::start_now(timeout), callback);
    }

    /// [`get_async`](Pool::get_async) within an already started [`Timeout`].
    pub fn get_async_with<C>(&self, timeout: Timeout, callback: C)
    where
        C: FnOnce(Result<PooledConnection<F>, PoolError>) + Send + 'static,
    {
        tracing::trace!(address = %self.inner.address, "acquiring connection from pool (async)");
        let inner = Arc::clone(&self.inner);
        let callback: AcquireCallback<F> = Box::new(move |result| {
            inner.record_checkout(&result);
            callback(result);
        });
        self.inner.checkout_async(timeout, callback);
    }

    /// Get a connection from an async context.
    ///
    /// Built on [`get_async`](Pool::get_async); dropping the future before
    /// it resolves returns any connection delivered to it to the pool.
    #[cfg(feature = "async")]
    pub async fn acquire(&self) -> Result<PooledConnection<F>, PoolError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.get_async(move |result| {
            // A dropped receiver hands the connection straight back.
            let _ = tx.send(result);
        });
        match rx.await {
            Ok(result) => result,
            Err(_) => Err(PoolError::Closed {
                address: self.inner.address.clone(),
            }),
        }
    }

    /// Pause the pool and retire every existing connection.
    ///
    /// Equivalent to [`invalidate_with`](Pool::invalidate_with) without a cause.
    pub fn invalidate(&self) {
        self.inner.invalidate(None);
    }

    /// Pause the pool, recording why.
    ///
    /// If the pool is ready it becomes paused, the generation is advanced,
    /// and every queued waiter fails with [`PoolError::Cleared`] before this
    /// returns. If it is already paused only the cause is replaced. Closed
    /// pools ignore the call.
    pub fn invalidate_with<E>(&self, cause: E)
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.inner.invalidate(Some(Arc::new(cause)));
    }

    /// Retire connections to one service behind a load balancer.
    ///
    /// Does nothing and returns `false` unless the service is still at
    /// `generation`, so a caller acting on an outdated observation cannot
    /// retire connections created after someone else's invalidation. Does
    /// not pause the pool or touch the global generation.
    pub fn invalidate_service(&self, service_id: ServiceId, generation: u64) -> bool {
        self.inner.invalidate_service(service_id, generation)
    }

    /// Allow connections to be created and handed out.
    ///
    /// No-op if the pool is already ready or has been closed.
    pub fn ready(&self) {
        self.inner.ready();
    }

    /// Close the pool, closing idle connections and failing all waiters.
    ///
    /// Connections still checked out are closed when they are returned.
    /// Calling this more than once has no further effect.
    pub fn close(&self) {
        if !self.inner.close() {
            return;
        }
        let worker = self.worker.lock().take();
        if let Some(handle) = worker {
            // A callback running on the worker may be what closed us.
            if handle.thread().id() != std::thread::current().id() && handle.join().is_err() {
                tracing::warn!(address = %self.inner.address, "maintenance worker panicked");
            }
        }
    }

    /// Current global generation.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.inner.generations.current()
    }

    /// Current generation of a service. Unknown services are at 0.
    #[must_use]
    pub fn service_generation(&self, service_id: &ServiceId) -> u64 {
        self.inner.generations.service(service_id)
    }

    /// Cause recorded by the most recent invalidation while paused.
    #[must_use]
    pub fn clear_cause(&self) -> Option<ClearCause> {
        self.inner.core.lock().lifecycle.cause().cloned()
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> PoolState {
        self.inner.core.lock().lifecycle.state()
    }

    /// Check if the pool is closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state() == PoolState::Closed
    }

    /// Get the current pool status.
    #[must_use]
    pub fn status(&self) -> PoolStatus {
        let core = self.inner.core.lock();
        PoolStatus {
            available: core.idle.len(),
            in_use: core.checked_out,
            pending: core
                .open_count
                .saturating_sub(core.idle.len() + core.checked_out),
            total: core.open_count,
            max: self.inner.config.max_size,
            waiting: core.waiters.len(),
            generation: self.inner.generations.current(),
            state: core.lifecycle.state(),
        }
    }

    /// Get pool metrics.
    #[must_use]
    pub fn metrics(&self) -> PoolMetrics {
        let inner = self.inner.metrics.lock();
        PoolMetrics {
            connections_created: inner.connections_created,
            connections_closed: inner.connections_closed,
            creation_failures: inner.creation_failures,
            stale_discarded: inner.stale_discarded,
            checkouts_successful: inner.checkouts_successful,
            checkouts_failed: inner.checkouts_failed,
            checkouts_timed_out: inner.checkouts_timed_out,
            clears: inner.clears,
            uptime: self.inner.created_at.elapsed(),
        }
    }

    /// Get the pool configuration.
    #[must_use]
    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// Endpoint this pool connects to.
    #[must_use]
    pub fn address(&self) -> &ServerAddress {
        &self.inner.address
    }
}

impl<F: ConnectionFactory> Drop for Pool<F> {
    fn drop(&mut self) {
        self.close();
    }
}

impl<F: ConnectionFactory> fmt::Debug for Pool<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("address", &self.inner.address)
            .field("status", &self.status())
            .finish()
    }
}

impl<F: ConnectionFactory> PoolInner<F> {
    fn checkout_blocking(
        self: &Arc<Self>,
        timeout: Timeout,
    ) -> Result<PooledConnection<F>, PoolError> {
        let mut effects = Effects::default();
        let slot = Slot::new();
        let (checkout, waiter_id) = {
            let mut core = self.core.lock();
            let checkout = self.begin_checkout(&mut core, &mut effects, &timeout);
            let waiter_id = match checkout {
                Checkout::Wait => Some(self.enqueue(
                    &mut core,
                    &mut effects,
                    &timeout,
                    Responder::Blocking(Arc::clone(&slot)),
                )),
                _ => None,
            };
            (checkout, waiter_id)
        };
        self.apply(effects);

        let handoff = match checkout {
            Checkout::Rejected(err) => return Err(err),
            Checkout::Ready(conn) => return Ok(PooledConnection::new(conn, Arc::clone(self))),
            Checkout::Create { generation } => return self.open_connection(generation, &timeout),
            Checkout::Wait => match slot.wait_until(timeout.deadline()) {
                Some(handoff) => handoff,
                None => {
                    let removed = {
                        let mut core = self.core.lock();
                        waiter_id
                            .and_then(|id| core.waiters.remove(id))
                            .map(|_| core.lifecycle.acquire_error(&self.address))
                    };
                    match removed {
                        Some(state_error) => {
                            return Err(
                                state_error.unwrap_or_else(|| self.timeout_error(&timeout))
                            );
                        }
                        // Resolved while we were timing out; take that outcome.
                        None => slot.wait(),
                    }
                }
            },
        };

        match handoff {
            Handoff::Connection(conn) => Ok(PooledConnection::new(conn, Arc::clone(self))),
            Handoff::Permit { generation } => self.open_connection(generation, &timeout),
            Handoff::Failed(err) => Err(err),
        }
    }

    fn checkout_async(self: &Arc<Self>, timeout: Timeout, callback: AcquireCallback<F>) {
        let mut effects = Effects::default();
        let mut callback = Some(callback);
        let checkout = {
            let mut core = self.core.lock();
            let checkout = self.begin_checkout(&mut core, &mut effects, &timeout);
            if matches!(checkout, Checkout::Wait) {
                if let Some(callback) = callback.take() {
                    let inner = Arc::clone(self);
                    let responder = Responder::Callback(Box::new(move |handoff| {
                        inner.resolve_async(handoff, timeout, callback);
                    }));
                    self.enqueue(&mut core, &mut effects, &timeout, responder);
                }
            }
            checkout
        };
        self.apply(effects);

        if matches!(checkout, Checkout::Wait) {
            // The worker enforces deadlines of callback waiters.
            self.worker.notify();
            return;
        }
        let Some(callback) = callback else {
            return;
        };
        match checkout {
            Checkout::Rejected(err) => callback(Err(err)),
            Checkout::Ready(conn) => callback(Ok(PooledConnection::new(conn, Arc::clone(self)))),
            Checkout::Create { generation } => self.schedule_open(generation, timeout, callback),
            Checkout::Wait => {}
        }
    }

    fn resolve_async(
        self: &Arc<Self>,
        handoff: Handoff<Tracked<Conn<F>>>,
        timeout: Timeout,
        callback: AcquireCallback<F>,
    ) {
        match handoff {
            Handoff::Connection(conn) => {
                callback(Ok(PooledConnection::new(conn, Arc::clone(self))));
            }
            Handoff::Permit { generation } => self.schedule_open(generation, timeout, callback),
            Handoff::Failed(err) => callback(Err(err)),
        }
    }

    /// Run a reserved creation on its own thread.
    fn schedule_open(
        self: &Arc<Self>,
        generation: u64,
        timeout: Timeout,
        callback: AcquireCallback<F>,
    ) {
        maintenance::start(
            self,
            Job::Open {
                generation,
                timeout,
                callback,
            },
        );
    }

    /// Decide how a new request is served. Must be called with the lock held.
    fn begin_checkout(
        &self,
        core: &mut PoolCore<Conn<F>>,
        effects: &mut Effects<Conn<F>>,
        timeout: &Timeout,
    ) -> Checkout<Conn<F>> {
        if let Some(err) = core.lifecycle.acquire_error(&self.address) {
            return Checkout::Rejected(err);
        }

        // Requests already in line are served first.
        if core.waiters.is_empty() {
            if let Some(conn) = self.take_idle(core, effects) {
                core.checked_out += 1;
                return Checkout::Ready(conn);
            }
            if core.open_count < self.config.max_size {
                core.open_count += 1;
                return Checkout::Create {
                    generation: self.generations.current(),
                };
            }
        }

        if timeout.has_expired() {
            return Checkout::Rejected(self.timeout_error(timeout));
        }
        Checkout::Wait
    }

    fn enqueue(
        &self,
        core: &mut PoolCore<Conn<F>>,
        effects: &mut Effects<Conn<F>>,
        timeout: &Timeout,
        responder: Responder<Tracked<Conn<F>>>,
    ) -> u64 {
        let id = core.waiters.push(timeout.deadline(), responder);
        tracing::trace!(
            address = %self.address,
            waiting = core.waiters.len(),
            "pool at capacity, waiting for a connection"
        );
        self.dispatch(core, effects);
        id
    }

    /// Pop the most recently used idle connection that is still usable.
    fn take_idle(
        &self,
        core: &mut PoolCore<Conn<F>>,
        effects: &mut Effects<Conn<F>>,
    ) -> Option<Tracked<Conn<F>>> {
        let now = Instant::now();
        while let Some(conn) = core.idle.pop_front() {
            match self.retire_reason(&conn, now, true) {
                Some(reason) => {
                    core.open_count -= 1;
                    effects.close(conn, reason);
                }
                None => return Some(conn),
            }
        }
        None
    }

    /// Serve queued waiters from freed capacity. Must be called with the lock held.
    fn dispatch(&self, core: &mut PoolCore<Conn<F>>, effects: &mut Effects<Conn<F>>) {
        if !core.lifecycle.is_ready() {
            return;
        }

        let now = Instant::now();
        for waiter in core.waiters.take_expired(now) {
            let err = self.wait_timeout_error(now.saturating_duration_since(waiter.enqueued_at));
            effects.deliveries.push(waiter.resolve(Handoff::Failed(err)));
        }

        while !core.waiters.is_empty() {
            let handoff = if let Some(conn) = self.take_idle(core, effects) {
                core.checked_out += 1;
                Handoff::Connection(conn)
            } else if core.open_count < self.config.max_size {
                core.open_count += 1;
                Handoff::Permit {
                    generation: self.generations.current(),
                }
            } else {
                break;
            };
            if let Some(waiter) = core.waiters.pop_front() {
                effects.deliveries.push(waiter.resolve(handoff));
            }
        }
    }

    /// Why `conn` must not be reused, if it must not.
    fn retire_reason(
        &self,
        conn: &Tracked<Conn<F>>,
        now: Instant,
        check_idle: bool,
    ) -> Option<CloseReason> {
        if self.generations.is_stale(conn.generation, conn.service) {
            return Some(CloseReason::Stale);
        }
        if conn.conn.is_closed() {
            return Some(CloseReason::Broken);
        }
        if self
            .config
            .max_lifetime
            .is_some_and(|max| now.saturating_duration_since(conn.created_at) > max)
        {
            return Some(CloseReason::Expired);
        }
        if check_idle
            && self
                .config
                .max_idle_time
                .is_some_and(|max| now.saturating_duration_since(conn.last_used_at) > max)
        {
            return Some(CloseReason::Idle);
        }
        None
    }

    /// Create a connection under a capacity reservation already taken.
    ///
    /// On success the connection counts as checked out. On failure the
    /// reservation is released.
    pub(crate) fn open_connection(
        self: &Arc<Self>,
        mut generation: u64,
        timeout: &Timeout,
    ) -> Result<PooledConnection<F>, PoolError> {
        loop {
            {
                let mut core = self.core.lock();
                if let Some(err) = core.lifecycle.acquire_error(&self.address) {
                    // Paused or closed since the reservation was granted.
                    core.open_count -= 1;
                    return Err(err);
                }
                let current = self.generations.current();
                if current != generation {
                    tracing::trace!(
                        address = %self.address,
                        reserved = generation,
                        current,
                        "pool cleared since the reservation, using current generation"
                    );
                    generation = current;
                }
            }

            let ctx = ConnectContext {
                connection_id: self.next_connection_id.fetch_add(1, Ordering::Relaxed),
                generation,
                address: self.address.clone(),
            };

            let conn = match self.factory.create(&ctx) {
                Ok(conn) => conn,
                Err(err) => {
                    self.metrics.lock().creation_failures += 1;
                    tracing::debug!(
                        address = %self.address,
                        connection_id = ctx.connection_id,
                        error = %err,
                        "connection creation failed"
                    );
                    self.release_reservation();
                    return Err(err.into());
                }
            };

            let service = conn
                .service_id()
                .map(|id| (id, self.generations.register(id)));
            let conn = Tracked::new(ctx.connection_id, conn, generation, service);
            self.metrics.lock().connections_created += 1;
            tracing::debug!(
                address = %self.address,
                connection_id = conn.id,
                generation,
                service_id = ?service.map(|(id, _)| id),
                "connection created"
            );

            let mut effects = Effects::default();
            let opened = {
                let mut core = self.core.lock();
                if let Some(err) = core.lifecycle.acquire_error(&self.address) {
                    // Paused or closed during the handshake.
                    let reason = match core.lifecycle.state() {
                        PoolState::Closed => CloseReason::PoolClosed,
                        _ => CloseReason::Stale,
                    };
                    core.open_count -= 1;
                    effects.close(conn, reason);
                    Opened::Failed(err)
                } else if self.generations.is_stale(conn.generation, conn.service) {
                    effects.close(conn, CloseReason::Stale);
                    if timeout.has_expired() {
                        core.open_count -= 1;
                        self.dispatch(&mut core, &mut effects);
                        Opened::Failed(self.timeout_error(timeout))
                    } else {
                        Opened::Retry {
                            generation: self.generations.current(),
                        }
                    }
                } else {
                    core.checked_out += 1;
                    Opened::Done(conn)
                }
            };
            self.apply(effects);

            match opened {
                Opened::Done(conn) => return Ok(PooledConnection::new(conn, Arc::clone(self))),
                Opened::Failed(err) => return Err(err),
                Opened::Retry { generation: current } => generation = current,
            }
        }
    }

    /// Give back a capacity reservation that did not produce a connection.
    pub(crate) fn release_reservation(&self) {
        let mut effects = Effects::default();
        {
            let mut core = self.core.lock();
            core.open_count -= 1;
            self.dispatch(&mut core, &mut effects);
        }
        self.apply(effects);
    }

    fn check_in(&self, mut conn: Tracked<Conn<F>>, forced: Option<CloseReason>) {
        let mut effects = Effects::default();
        {
            let mut core = self.core.lock();
            core.checked_out -= 1;

            let reason = if core.lifecycle.state() == PoolState::Closed {
                Some(CloseReason::PoolClosed)
            } else {
                forced.or_else(|| self.retire_reason(&conn, Instant::now(), false))
            };

            match reason {
                Some(reason) => {
                    core.open_count -= 1;
                    effects.close(conn, reason);
                }
                None => {
                    tracing::trace!(
                        address = %self.address,
                        connection_id = conn.id,
                        "returning connection to pool"
                    );
                    conn.touch();
                    core.idle.push_front(conn);
                }
            }
            self.dispatch(&mut core, &mut effects);
        }
        self.apply(effects);
    }

    fn invalidate(&self, cause: Option<ClearCause>) {
        let mut effects = Effects::default();
        let cleared = {
            let mut core = self.core.lock();
            match core.lifecycle.pause(cause.clone()) {
                Pause::Closed => None,
                Pause::AlreadyPaused => {
                    tracing::debug!(
                        address = %self.address,
                        "pool already paused, recorded new cause"
                    );
                    None
                }
                Pause::Paused => {
                    let generation = self.generations.advance();
                    for waiter in core.waiters.drain() {
                        let err = PoolError::Cleared {
                            address: self.address.clone(),
                            cause: cause.clone(),
                        };
                        effects.deliveries.push(waiter.resolve(Handoff::Failed(err)));
                    }
                    Some(generation)
                }
            }
        };
        self.apply(effects);

        if let Some(generation) = cleared {
            self.metrics.lock().clears += 1;
            tracing::info!(
                address = %self.address,
                generation,
                cause = ?cause.as_ref().map(|c| c.to_string()),
                "connection pool cleared"
            );
            // Let the worker retire idle connections without waiting for a checkout.
            self.worker.notify();
        }
    }

    fn invalidate_service(&self, service_id: ServiceId, generation: u64) -> bool {
        let advanced = self.generations.advance_service(service_id, generation);
        if advanced {
            tracing::debug!(
                address = %self.address,
                service_id = %service_id,
                generation = generation + 1,
                "service connections invalidated"
            );
            self.worker.notify();
        } else {
            tracing::debug!(
                address = %self.address,
                service_id = %service_id,
                expected = generation,
                current = self.generations.service(&service_id),
                "ignoring service invalidation for outdated generation"
            );
        }
        advanced
    }

    fn ready(&self) {
        let (changed, state) = {
            let mut core = self.core.lock();
            (core.lifecycle.mark_ready(), core.lifecycle.state())
        };
        if changed {
            tracing::info!(address = %self.address, "connection pool ready");
            self.worker.notify();
        } else if state == PoolState::Closed {
            tracing::debug!(address = %self.address, "ignoring ready() on closed pool");
        }
    }

    /// Returns whether this call closed the pool.
    fn close(&self) -> bool {
        let mut effects = Effects::default();
        {
            let mut core = self.core.lock();
            if !core.lifecycle.close() {
                return false;
            }
            while let Some(conn) = core.idle.pop_front() {
                core.open_count -= 1;
                effects.close(conn, CloseReason::PoolClosed);
            }
            for waiter in core.waiters.drain() {
                let err = PoolError::Closed {
                    address: self.address.clone(),
                };
                effects.deliveries.push(waiter.resolve(Handoff::Failed(err)));
            }
        }
        self.apply(effects);
        self.worker.shutdown();
        tracing::info!(address = %self.address, "connection pool closed");
        true
    }

    /// Fail waiters whose deadline has passed.
    pub(crate) fn expire_waiters(&self) {
        let now = Instant::now();
        let expired = self.core.lock().waiters.take_expired(now);
        for waiter in expired {
            let err = self.wait_timeout_error(now.saturating_duration_since(waiter.enqueued_at));
            waiter.resolve(Handoff::Failed(err)).deliver();
        }
    }

    pub(crate) fn next_waiter_deadline(&self) -> Option<Instant> {
        self.core.lock().waiters.next_deadline()
    }

    /// Close idle connections that may no longer be handed out.
    pub(crate) fn prune_idle(&self) {
        let mut effects = Effects::default();
        {
            let mut core = self.core.lock();
            if core.lifecycle.state() == PoolState::Closed {
                return;
            }
            let now = Instant::now();
            let mut kept = VecDeque::with_capacity(core.idle.len());
            while let Some(conn) = core.idle.pop_front() {
                match self.retire_reason(&conn, now, true) {
                    Some(reason) => {
                        core.open_count -= 1;
                        effects.close(conn, reason);
                    }
                    None => kept.push_back(conn),
                }
            }
            core.idle = kept;
            self.dispatch(&mut core, &mut effects);
        }
        self.apply(effects);
    }

    /// Reserve capacity for one background creation if below `min_size`.
    pub(crate) fn reserve_for_min_size(&self) -> Option<u64> {
        let mut core = self.core.lock();
        if !core.lifecycle.is_ready() || core.open_count >= self.config.min_size {
            return None;
        }
        core.open_count += 1;
        Some(self.generations.current())
    }

    /// Carry out closes and deliveries. Must be called without the lock.
    fn apply(&self, effects: Effects<Conn<F>>) {
        if !effects.closes.is_empty() {
            let mut metrics = self.metrics.lock();
            for (_, reason) in &effects.closes {
                metrics.connections_closed += 1;
                if *reason == CloseReason::Stale {
                    metrics.stale_discarded += 1;
                }
            }
        }
        for (mut conn, reason) in effects.closes {
            conn.conn.close();
            tracing::debug!(
                address = %self.address,
                connection_id = conn.id,
                generation = conn.generation,
                reason = reason.as_str(),
                "connection closed"
            );
        }
        for delivery in effects.deliveries {
            delivery.deliver();
        }
    }

    fn record_checkout(&self, result: &Result<PooledConnection<F>, PoolError>) {
        let mut metrics = self.metrics.lock();
        match result {
            Ok(_) => metrics.checkouts_successful += 1,
            Err(err) => {
                metrics.checkouts_failed += 1;
                if err.is_timeout() {
                    metrics.checkouts_timed_out += 1;
                }
            }
        }
    }

    fn timeout_error(&self, timeout: &Timeout) -> PoolError {
        self.wait_timeout_error(timeout.elapsed())
    }

    fn wait_timeout_error(&self, waited: Duration) -> PoolError {
        PoolError::WaitTimeout {
            address: self.address.clone(),
            waited,
            max_size: self.config.max_size,
        }
    }
}

/// Builder for creating a connection pool.
///
/// # Example
///
/// ```rust,ignore
/// let pool = Pool::builder(factory)
///     .address("db0:27017".parse()?)
///     .max_size(10)
///     .build()?;
/// ```
pub struct PoolBuilder<F: ConnectionFactory> {
    address: ServerAddress,
    pool_config: PoolConfig,
    factory: F,
}

impl<F: ConnectionFactory> PoolBuilder<F> {
    /// Create a new pool builder with default settings.
    pub fn new(factory: F) -> Self {
        Self {
            address: ServerAddress::default(),
            pool_config: PoolConfig::default(),
            factory,
        }
    }

    /// Set the server endpoint.
    #[must_use]
    pub fn address(mut self, address: ServerAddress) -> Self {
        self.address = address;
        self
    }

    /// Set the pool configuration.
    #[must_use]
    pub fn pool_config(mut self, config: PoolConfig) -> Self {
        self.pool_config = config;
        self
    }

    /// Set the minimum number of connections.
    #[must_use]
    pub fn min_size(mut self, size: usize) -> Self {
        self.pool_config.min_size = size;
        self
    }

    /// Set the maximum number of connections.
    #[must_use]
    pub fn max_size(mut self, size: usize) -> Self {
        self.pool_config.max_size = size;
        self
    }

    /// Set the default wait time for `get()`.
    #[must_use]
    pub fn max_wait_time(mut self, timeout: Duration) -> Self {
        self.pool_config.max_wait_time = timeout;
        self
    }

    /// Set the idle connection timeout.
    #[must_use]
    pub fn max_idle_time(mut self, timeout: Duration) -> Self {
        self.pool_config.max_idle_time = Some(timeout);
        self
    }

    /// Set the maximum connection lifetime.
    #[must_use]
    pub fn max_lifetime(mut self, lifetime: Duration) -> Self {
        self.pool_config.max_lifetime = Some(lifetime);
        self
    }

    /// Set the interval between maintenance passes.
    #[must_use]
    pub fn maintenance_frequency(mut self, frequency: Duration) -> Self {
        self.pool_config.maintenance_frequency = frequency;
        self
    }

    /// Build the pool. It starts paused.
    pub fn build(self) -> Result<Pool<F>, PoolError> {
        Pool::new(self.address, self.pool_config, self.factory)
    }
}

impl<F: ConnectionFactory> fmt::Debug for PoolBuilder<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolBuilder")
            .field("address", &self.address)
            .field("pool_config", &self.pool_config)
            .finish_non_exhaustive()
    }
}

/// Status information about the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    /// Number of idle connections available.
    pub available: usize,
    /// Number of connections currently in use.
    pub in_use: usize,
    /// Number of connections being created.
    pub pending: usize,
    /// Total number of connections.
    pub total: usize,
    /// Maximum allowed connections.
    pub max: usize,
    /// Requests waiting for a connection.
    pub waiting: usize,
    /// Current global generation.
    pub generation: u64,
    /// Lifecycle state.
    pub state: PoolState,
}

impl PoolStatus {
    /// Calculate the utilization percentage.
    #[must_use]
    pub fn utilization(&self) -> f64 {
        if self.max == 0 {
            return 0.0;
        }
        (self.in_use as f64 / self.max as f64) * 100.0
    }

    /// Check if the pool is at capacity.
    #[must_use]
    pub fn is_at_capacity(&self) -> bool {
        self.total >= self.max
    }
}

/// Metrics collected from the pool.
#[derive(Debug, Clone)]
pub struct PoolMetrics {
    /// Total connections created since pool start.
    pub connections_created: u64,
    /// Total connections closed since pool start.
    pub connections_closed: u64,
    /// Connection attempts the factory failed.
    pub creation_failures: u64,
    /// Connections closed because their generation was retired.
    pub stale_discarded: u64,
    /// Successful connection checkouts.
    pub checkouts_successful: u64,
    /// Failed connection checkouts (timeouts, cleared pool, etc.).
    pub checkouts_failed: u64,
    /// Checkouts that failed waiting for capacity.
    pub checkouts_timed_out: u64,
    /// Times the pool went from ready to paused.
    pub clears: u64,
    /// Time since pool creation.
    pub uptime: Duration,
}

impl PoolMetrics {
    /// Calculate checkout success rate (0.0 to 1.0).
    #[must_use]
    pub fn checkout_success_rate(&self) -> f64 {
        let total = self.checkouts_successful + self.checkouts_failed;
        if total == 0 {
            return 1.0;
        }
        self.checkouts_successful as f64 / total as f64
    }
}

/// A connection retrieved from the pool.
///
/// When dropped, the connection is returned to the pool, or closed if it
/// was retired while checked out. Use [`discard()`](PooledConnection::discard)
/// to close it instead.
pub struct PooledConnection<F: ConnectionFactory> {
    conn: Option<Tracked<Conn<F>>>,
    pool: Arc<PoolInner<F>>,
}

// `conn` is `Some` from construction until drop or `discard`.
#[allow(clippy::expect_used)]
impl<F: ConnectionFactory> PooledConnection<F> {
    fn new(conn: Tracked<Conn<F>>, pool: Arc<PoolInner<F>>) -> Self {
        Self {
            conn: Some(conn),
            pool,
        }
    }

    fn tracked(&self) -> &Tracked<Conn<F>> {
        self.conn.as_ref().expect("connection present until drop")
    }

    /// Pool-unique connection id.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.tracked().id
    }

    /// Pool generation this connection was created under.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.tracked().generation
    }

    /// Service this connection is routed to, if any.
    #[must_use]
    pub fn service_id(&self) -> Option<ServiceId> {
        self.tracked().service.map(|(id, _)| id)
    }

    /// Service generation this connection was created under, if any.
    #[must_use]
    pub fn service_generation(&self) -> Option<u64> {
        self.tracked().service.map(|(_, generation)| generation)
    }

    /// When the connection was created.
    #[must_use]
    pub fn created_at(&self) -> Instant {
        self.tracked().created_at
    }

    /// Close the connection instead of returning it to the pool.
    ///
    /// Use this when the connection is known to be broken.
    pub fn discard(mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.check_in(conn, Some(CloseReason::Discarded));
        }
    }
}

#[allow(clippy::expect_used)]
impl<F: ConnectionFactory> Deref for PooledConnection<F> {
    type Target = Conn<F>;

    fn deref(&self) -> &Self::Target {
        &self.conn.as_ref().expect("connection present until drop").conn
    }
}

#[allow(clippy::expect_used)]
impl<F: ConnectionFactory> DerefMut for PooledConnection<F> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.conn.as_mut().expect("connection present until drop").conn
    }
}

impl<F: ConnectionFactory> Drop for PooledConnection<F> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.check_in(conn, None);
        }
    }
}

impl<F: ConnectionFactory> fmt::Debug for PooledConnection<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("PooledConnection");
        if let Some(conn) = &self.conn {
            s.field("id", &conn.id)
                .field("generation", &conn.generation)
                .field("service", &conn.service);
        }
        s.field("address", &self.pool.address).finish()
    }
}
