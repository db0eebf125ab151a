//! # docdb-driver-pool
//!
//! Per-server connection pool for the docdb driver.
//!
//! The pool follows the server's health as reported by topology monitoring:
//! it starts paused, is made ready once the server has been validated, and
//! is invalidated when an operation against the server fails. Invalidation
//! advances a generation counter; connections from an older generation are
//! never handed out again and are closed the next time the pool sees them.
//!
//! ## Features
//!
//! - READY / PAUSED / CLOSED lifecycle with a recorded clear cause
//! - Global and per-service (load balancer) generations
//! - FIFO waiting with per-request timeouts
//! - Blocking, callback, and `async` acquisition
//! - Background pruning and `min_size` maintenance
//! - Metrics for observability
//!
//! ## Example
//!
//! ```rust,ignore
//! use docdb_driver_pool::{Pool, PoolConfig};
//! use std::time::Duration;
//!
//! let pool = Pool::builder(factory)
//!     .address("db0:27017".parse()?)
//!     .min_size(2)
//!     .max_size(20)
//!     .max_wait_time(Duration::from_secs(5))
//!     .build()?;
//!
//! // Monitoring has validated the server.
//! pool.ready();
//!
//! let conn = pool.get()?;
//! // Use connection...
//! // Connection automatically returned to pool on drop
//!
//! // An operation failed; retire every connection made so far.
//! pool.invalidate_with(std::io::Error::other("connection reset"));
//! assert!(pool.get().unwrap_err().is_pool_cleared());
//!
//! let status = pool.status();
//! println!("Pool utilization: {:.1}%", status.utilization());
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod config;
pub mod connection;
pub mod error;
pub mod generation;
mod maintenance;
pub mod pool;
pub mod state;
pub mod timeout;
mod waiter;

// Configuration
pub use config::PoolConfig;

// Error types
pub use error::{ClearCause, ConnectionError, PoolError};

// Connection plumbing
pub use connection::{ConnectContext, Connection, ConnectionFactory, ServiceId};

// Pool types
pub use generation::GenerationCounter;
pub use pool::{AcquireCallback, Pool, PoolBuilder, PoolMetrics, PoolStatus, PooledConnection};
pub use state::PoolState;
pub use timeout::Timeout;
