//! Shared fixtures for pool integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use docdb_driver_pool::{
    ConnectContext, Connection, ConnectionError, ConnectionFactory, Pool, PoolConfig, ServiceId,
};
use docdb_topology::ServerAddress;
use parking_lot::Mutex;

/// Counters shared between a factory and the test that owns it.
#[derive(Debug, Default)]
pub struct Counters {
    pub created: AtomicUsize,
    pub closed: AtomicUsize,
    pub attempts: AtomicUsize,
}

impl Counters {
    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

pub struct MockConnection {
    pub id: u64,
    pub generation: u64,
    service: Option<ServiceId>,
    broken: Arc<AtomicBool>,
    closed: bool,
    counters: Arc<Counters>,
}

impl MockConnection {
    /// Handle that marks the connection broken from outside.
    pub fn breaker(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.broken)
    }

    pub fn is_open(&self) -> bool {
        !self.closed
    }
}

impl Connection for MockConnection {
    fn service_id(&self) -> Option<ServiceId> {
        self.service
    }

    fn is_closed(&self) -> bool {
        self.closed || self.broken.load(Ordering::SeqCst)
    }

    fn close(&mut self) {
        assert!(!self.closed, "connection {} closed twice", self.id);
        self.closed = true;
        self.counters.closed.fetch_add(1, Ordering::SeqCst);
    }
}

/// Factory producing in-memory connections.
#[derive(Clone)]
pub struct MockFactory {
    pub counters: Arc<Counters>,
    fail: Arc<AtomicBool>,
    delay: Arc<Mutex<Duration>>,
    service: Arc<Mutex<Option<ServiceId>>>,
}

impl MockFactory {
    pub fn new() -> Self {
        Self {
            counters: Arc::new(Counters::default()),
            fail: Arc::new(AtomicBool::new(false)),
            delay: Arc::new(Mutex::new(Duration::ZERO)),
            service: Arc::new(Mutex::new(None)),
        }
    }

    /// Make subsequent `create` calls fail.
    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Make subsequent `create` calls take this long.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = delay;
    }

    /// Route subsequent connections to `service`.
    pub fn set_service(&self, service: Option<ServiceId>) {
        *self.service.lock() = service;
    }
}

impl ConnectionFactory for MockFactory {
    type Connection = MockConnection;

    fn create(&self, ctx: &ConnectContext) -> Result<MockConnection, ConnectionError> {
        self.counters.attempts.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock();
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(ConnectionError::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "connection refused",
            )));
        }
        self.counters.created.fetch_add(1, Ordering::SeqCst);
        Ok(MockConnection {
            id: ctx.connection_id,
            generation: ctx.generation,
            service: *self.service.lock(),
            broken: Arc::new(AtomicBool::new(false)),
            closed: false,
            counters: Arc::clone(&self.counters),
        })
    }
}

pub fn address() -> ServerAddress {
    ServerAddress::new("db0.example.com", 27017)
}

/// A pool with periodic maintenance effectively disabled.
pub fn pool_with(config: PoolConfig) -> (Pool<MockFactory>, MockFactory) {
    let factory = MockFactory::new();
    let config = PoolConfig {
        maintenance_initial_delay: Duration::from_secs(3600),
        maintenance_frequency: Duration::from_secs(3600),
        ..config
    };
    let pool = Pool::new(address(), config, factory.clone()).unwrap();
    (pool, factory)
}

/// A ready pool of the given capacity.
pub fn ready_pool(max_size: usize) -> (Pool<MockFactory>, MockFactory) {
    let (pool, factory) = pool_with(PoolConfig::new().max_size(max_size));
    pool.ready();
    (pool, factory)
}

/// Poll `condition` until it holds or a second has passed.
pub fn eventually(condition: impl Fn() -> bool) -> bool {
    let deadline = std::time::Instant::now() + Duration::from_secs(1);
    while std::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    condition()
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
