//! Pool error types.

use std::sync::Arc;
use std::time::Duration;

use docdb_topology::ServerAddress;
use thiserror::Error;

/// Reason recorded when a pool is invalidated.
pub type ClearCause = Arc<dyn std::error::Error + Send + Sync + 'static>;

/// Errors raised by a [`ConnectionFactory`](crate::ConnectionFactory)
/// while establishing a connection.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConnectionError {
    /// Socket-level failure.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The server rejected or broke off the handshake.
    #[error("handshake failed: {0}")]
    Handshake(String),

    /// Credentials were rejected.
    #[error("authentication failed: {0}")]
    Authentication(String),
}

/// Errors returned by pool operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PoolError {
    /// The pool is paused, or was paused while the request was waiting.
    #[error("connection pool for {address} was cleared{}", describe_cause(.cause))]
    Cleared {
        /// Endpoint the pool connects to.
        address: ServerAddress,
        /// Cause passed to the invalidation, if any.
        #[source]
        cause: Option<ClearCause>,
    },

    /// The pool has been closed.
    #[error("connection pool for {address} is closed")]
    Closed {
        /// Endpoint the pool connects to.
        address: ServerAddress,
    },

    /// No connection became available before the deadline.
    #[error(
        "timed out after {waited:?} waiting for a connection to {address} (max_size {max_size})"
    )]
    WaitTimeout {
        /// Endpoint the pool connects to.
        address: ServerAddress,
        /// Time spent waiting.
        waited: Duration,
        /// Configured pool capacity.
        max_size: usize,
    },

    /// The connection factory failed.
    #[error("failed to open connection: {0}")]
    Connection(#[from] ConnectionError),

    /// Invalid pool configuration.
    #[error("invalid pool configuration: {0}")]
    Config(String),

    /// A maintenance or connection creation thread could not be started.
    #[error("failed to start pool thread: {0}")]
    Spawn(#[source] std::io::Error),
}

impl PoolError {
    /// Whether the pool refused the request because it is paused or closed.
    #[must_use]
    pub fn is_pool_cleared(&self) -> bool {
        matches!(self, Self::Cleared { .. } | Self::Closed { .. })
    }

    /// Whether the request gave up waiting for capacity.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::WaitTimeout { .. })
    }

    /// The invalidation cause carried by a [`PoolError::Cleared`].
    #[must_use]
    pub fn clear_cause(&self) -> Option<&ClearCause> {
        match self {
            Self::Cleared { cause, .. } => cause.as_ref(),
            _ => None,
        }
    }
}

fn describe_cause(cause: &Option<ClearCause>) -> String {
    match cause {
        Some(cause) => format!(" because an earlier operation failed: {cause}"),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cleared_message_includes_cause() {
        let err = PoolError::Cleared {
            address: ServerAddress::new("db0", 27017),
            cause: Some(Arc::new(std::io::Error::other("primary stepped down"))),
        };
        assert_eq!(
            err.to_string(),
            "connection pool for db0:27017 was cleared because an earlier operation failed: primary stepped down"
        );
        assert!(err.is_pool_cleared());
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_cleared_message_without_cause() {
        let err = PoolError::Cleared {
            address: ServerAddress::new("db0", 27017),
            cause: None,
        };
        assert_eq!(err.to_string(), "connection pool for db0:27017 was cleared");
        assert!(err.clear_cause().is_none());
    }

    #[test]
    fn test_classification() {
        let closed = PoolError::Closed {
            address: ServerAddress::default(),
        };
        assert!(closed.is_pool_cleared());
        assert!(!closed.is_timeout());

        let timeout = PoolError::WaitTimeout {
            address: ServerAddress::default(),
            waited: Duration::from_millis(10),
            max_size: 1,
        };
        assert!(timeout.is_timeout());
        assert!(!timeout.is_pool_cleared());

        let conn: PoolError = ConnectionError::Authentication("bad password".into()).into();
        assert!(!conn.is_pool_cleared());
        assert_eq!(
            conn.to_string(),
            "failed to open connection: authentication failed: bad password"
        );
    }
}
