//! Physical connection and factory traits.
//!
//! The pool never performs I/O itself. It asks a [`ConnectionFactory`] for
//! new connections and calls [`Connection::close`] on connections it
//! retires; everything below that (sockets, handshake, authentication) is
//! the factory's business.

use std::fmt;
use std::time::Instant;

use docdb_topology::ServerAddress;
use uuid::Uuid;

use crate::error::ConnectionError;

/// Identity of a logical service behind a load balancer.
///
/// Learned from the handshake of a connection made through a load
/// balancer. Each service has its own generation in the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ServiceId(Uuid);

impl ServiceId {
    /// Generate a random service id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// The raw id.
    #[must_use]
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ServiceId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for ServiceId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl fmt::Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A physical connection to a server.
pub trait Connection: Send + 'static {
    /// Service this connection was routed to, if made through a load balancer.
    fn service_id(&self) -> Option<ServiceId> {
        None
    }

    /// Whether the connection is known to be unusable.
    fn is_closed(&self) -> bool {
        false
    }

    /// Close the underlying socket. Called at most once by the pool.
    fn close(&mut self);
}

/// Information handed to the factory for each new connection.
#[derive(Debug, Clone)]
pub struct ConnectContext {
    /// Pool-unique connection id.
    pub connection_id: u64,
    /// Pool generation the connection will belong to.
    pub generation: u64,
    /// Endpoint to connect to.
    pub address: ServerAddress,
}

/// Creates physical connections for a pool.
///
/// `create` may block for as long as the handshake takes. The pool never
/// calls it while holding its internal lock.
pub trait ConnectionFactory: Send + Sync + 'static {
    /// Connection type produced.
    type Connection: Connection;

    /// Open and handshake a new connection.
    fn create(&self, ctx: &ConnectContext) -> Result<Self::Connection, ConnectionError>;
}

/// A connection together with the bookkeeping the pool needs.
pub(crate) struct Tracked<C> {
    pub(crate) id: u64,
    pub(crate) conn: C,
    pub(crate) generation: u64,
    pub(crate) service: Option<(ServiceId, u64)>,
    pub(crate) created_at: Instant,
    pub(crate) last_used_at: Instant,
}

impl<C: Connection> Tracked<C> {
    pub(crate) fn new(id: u64, conn: C, generation: u64, service: Option<(ServiceId, u64)>) -> Self {
        let now = Instant::now();
        Self {
            id,
            conn,
            generation,
            service,
            created_at: now,
            last_used_at: now,
        }
    }

    pub(crate) fn touch(&mut self) {
        self.last_used_at = Instant::now();
    }
}

/// Why the pool closed a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CloseReason {
    Stale,
    Idle,
    Expired,
    Broken,
    PoolClosed,
    Discarded,
}

impl CloseReason {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::Stale => "stale",
            Self::Idle => "idle",
            Self::Expired => "lifetime expired",
            Self::Broken => "broken",
            Self::PoolClosed => "pool closed",
            Self::Discarded => "discarded",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_ids_are_unique() {
        assert_ne!(ServiceId::new(), ServiceId::new());
    }

    #[test]
    fn test_service_id_display_matches_uuid() {
        let uuid = Uuid::new_v4();
        assert_eq!(ServiceId::from(uuid).to_string(), uuid.to_string());
    }
}
