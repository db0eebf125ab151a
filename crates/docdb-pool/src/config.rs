//! Pool configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::PoolError;

/// Configuration for a connection pool.
///
/// # Example
///
/// ```rust
/// use docdb_driver_pool::PoolConfig;
/// use std::time::Duration;
///
/// let config = PoolConfig::new()
///     .min_size(2)
///     .max_size(20)
///     .max_wait_time(Duration::from_secs(5));
///
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Connections the background worker keeps open while the pool is ready.
    pub min_size: usize,

    /// Upper bound on connections created by the pool, idle or in use.
    pub max_size: usize,

    /// How long `get()` waits for a connection before giving up.
    pub max_wait_time: Duration,

    /// Idle connections unused for longer than this are closed.
    pub max_idle_time: Option<Duration>,

    /// Connections older than this are closed instead of reused.
    pub max_lifetime: Option<Duration>,

    /// Delay before the first background maintenance pass.
    pub maintenance_initial_delay: Duration,

    /// Interval between background maintenance passes.
    pub maintenance_frequency: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_size: 0,
            max_size: 100,
            max_wait_time: Duration::from_secs(120),
            max_idle_time: None,
            max_lifetime: None,
            maintenance_initial_delay: Duration::ZERO,
            maintenance_frequency: Duration::from_secs(60),
        }
    }
}

impl PoolConfig {
    /// Create a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the minimum number of connections.
    #[must_use]
    pub fn min_size(mut self, size: usize) -> Self {
        self.min_size = size;
        self
    }

    /// Set the maximum number of connections.
    #[must_use]
    pub fn max_size(mut self, size: usize) -> Self {
        self.max_size = size;
        self
    }

    /// Set the default wait time for `get()`.
    #[must_use]
    pub fn max_wait_time(mut self, timeout: Duration) -> Self {
        self.max_wait_time = timeout;
        self
    }

    /// Set the idle timeout.
    #[must_use]
    pub fn max_idle_time(mut self, timeout: Duration) -> Self {
        self.max_idle_time = Some(timeout);
        self
    }

    /// Set the maximum connection lifetime.
    #[must_use]
    pub fn max_lifetime(mut self, lifetime: Duration) -> Self {
        self.max_lifetime = Some(lifetime);
        self
    }

    /// Set the delay before the first maintenance pass.
    #[must_use]
    pub fn maintenance_initial_delay(mut self, delay: Duration) -> Self {
        self.maintenance_initial_delay = delay;
        self
    }

    /// Set the interval between maintenance passes.
    #[must_use]
    pub fn maintenance_frequency(mut self, frequency: Duration) -> Self {
        self.maintenance_frequency = frequency;
        self
    }

    /// Check the configuration for contradictions.
    pub fn validate(&self) -> Result<(), PoolError> {
        if self.max_size == 0 {
            return Err(PoolError::Config("max_size must be greater than 0".into()));
        }
        if self.min_size > self.max_size {
            return Err(PoolError::Config(format!(
                "min_size ({}) cannot exceed max_size ({})",
                self.min_size, self.max_size
            )));
        }
        if self.maintenance_frequency.is_zero() {
            return Err(PoolError::Config(
                "maintenance_frequency must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}
