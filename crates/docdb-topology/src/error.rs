//! Topology error types.

use thiserror::Error;

/// Errors raised while parsing topology values.
#[derive(Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum TopologyError {
    /// The address has no host part.
    #[error("invalid server address: {0:?}")]
    InvalidAddress(String),

    /// The port is not a valid TCP port.
    #[error("invalid port in server address {address:?}: {port}")]
    InvalidPort {
        /// Full address being parsed.
        address: String,
        /// Offending port text.
        port: String,
    },

    /// The read preference mode name is not recognized.
    #[error("unknown read preference mode: {0}")]
    UnknownReadPreference(String),
}
