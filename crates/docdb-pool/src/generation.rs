//! Pool-wide and per-service generation counters.
//!
//! Every connection is stamped with the generation current when it was
//! created. Bumping a counter retires all connections stamped with an older
//! value without touching them; they are closed the next time the pool sees
//! them.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;

use crate::connection::ServiceId;

/// Global generation plus one generation per known service.
///
/// Service entries are never removed. An entry is created the first time a
/// connection to the service is opened or the service is invalidated, and
/// it must outlive every connection stamped from it, so the map grows with
/// the number of distinct services behind the endpoint. Load balancers
/// front a small, slowly changing set of services, which keeps it bounded
/// in practice; [`service_count`](Self::service_count) exposes its size.
#[derive(Debug, Default)]
pub struct GenerationCounter {
    global: AtomicU64,
    services: DashMap<ServiceId, u64>,
}

impl GenerationCounter {
    /// Start at generation 0 with no known services.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current pool-wide generation.
    #[must_use]
    pub fn current(&self) -> u64 {
        self.global.load(Ordering::Acquire)
    }

    /// Advance the pool-wide generation, returning the new value.
    ///
    /// The pool calls this only while holding its state lock, so the bump
    /// is atomic with the READY to PAUSED transition.
    pub(crate) fn advance(&self) -> u64 {
        self.global.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Current generation of `service`. Unknown services are at 0.
    #[must_use]
    pub fn service(&self, service: &ServiceId) -> u64 {
        self.services.get(service).map_or(0, |g| *g)
    }

    /// Generation to stamp on a new connection to `service`.
    pub(crate) fn register(&self, service: ServiceId) -> u64 {
        *self.services.entry(service).or_insert(0)
    }

    /// Advance `service` if it is still at `expected`.
    ///
    /// Returns `false` without changing anything when another caller got
    /// there first. An unknown service is recorded at 0 first, so
    /// `advance_service(id, 0)` on it leaves an entry at 1.
    pub fn advance_service(&self, service: ServiceId, expected: u64) -> bool {
        let mut entry = self.services.entry(service).or_insert(0);
        if *entry == expected {
            *entry += 1;
            true
        } else {
            false
        }
    }

    /// Whether a connection stamped with these generations must be retired.
    #[must_use]
    pub fn is_stale(&self, generation: u64, service: Option<(ServiceId, u64)>) -> bool {
        if generation != self.current() {
            return true;
        }
        match service {
            Some((id, service_generation)) => service_generation < self.service(&id),
            None => false,
        }
    }

    /// Number of services seen so far.
    #[must_use]
    pub fn service_count(&self) -> usize {
        self.services.len()
    }
}
