//! Server endpoint addresses.

use std::fmt;
use std::str::FromStr;

use crate::error::TopologyError;

/// Default port a server listens on when the address omits one.
pub const DEFAULT_PORT: u16 = 27017;

/// Host and port of a single server endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ServerAddress {
    host: String,
    port: u16,
}

impl ServerAddress {
    /// Create an address from a host and port.
    ///
    /// Hosts are compared case-insensitively by the server, so they are
    /// stored lowercased.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into().to_lowercase(),
            port,
        }
    }

    /// Host name or IP literal.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// TCP port.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }
}

impl Default for ServerAddress {
    fn default() -> Self {
        Self::new("localhost", DEFAULT_PORT)
    }
}

impl fmt::Display for ServerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            // IPv6 literal
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl FromStr for ServerAddress {
    type Err = TopologyError;

    /// Parse `host`, `host:port`, `[v6]` or `[v6]:port`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let invalid_port = |port: &str| TopologyError::InvalidPort {
            address: s.to_string(),
            port: port.to_string(),
        };

        let (host, port) = if let Some(rest) = s.strip_prefix('[') {
            let (host, after) = rest
                .split_once(']')
                .ok_or_else(|| TopologyError::InvalidAddress(s.to_string()))?;
            match after.strip_prefix(':') {
                Some(port) => (host, Some(port)),
                None if after.is_empty() => (host, None),
                None => return Err(TopologyError::InvalidAddress(s.to_string())),
            }
        } else {
            match s.rsplit_once(':') {
                Some((host, port)) => (host, Some(port)),
                None => (s, None),
            }
        };

        if host.is_empty() {
            return Err(TopologyError::InvalidAddress(s.to_string()));
        }

        let port = match port {
            Some(port) => match port.parse::<u16>() {
                Ok(0) | Err(_) => return Err(invalid_port(port)),
                Ok(port) => port,
            },
            None => DEFAULT_PORT,
        };

        Ok(Self::new(host, port))
    }
}
