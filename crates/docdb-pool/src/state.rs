//! Pool lifecycle: READY, PAUSED and CLOSED.
//!
//! A pool starts PAUSED and only hands out connections once it has been
//! marked ready. Invalidation pauses it again; closing is terminal.

use std::fmt;

use docdb_topology::ServerAddress;

use crate::error::{ClearCause, PoolError};

/// Lifecycle state of a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PoolState {
    /// Connections may be created and handed out.
    Ready,
    /// No connections are created or handed out.
    Paused,
    /// Terminal; all resources have been released.
    Closed,
}

impl fmt::Display for PoolState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Ready => "ready",
            Self::Paused => "paused",
            Self::Closed => "closed",
        })
    }
}

/// Result of asking the lifecycle to pause.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Pause {
    /// READY became PAUSED; the caller must advance the generation.
    Paused,
    /// Already PAUSED; only the cause was recorded.
    AlreadyPaused,
    /// CLOSED; nothing changed.
    Closed,
}

/// State plus the cause of the most recent invalidation.
#[derive(Debug)]
pub(crate) struct Lifecycle {
    state: PoolState,
    cause: Option<ClearCause>,
}

impl Lifecycle {
    pub(crate) fn new() -> Self {
        Self {
            state: PoolState::Paused,
            cause: None,
        }
    }

    pub(crate) fn state(&self) -> PoolState {
        self.state
    }

    pub(crate) fn is_ready(&self) -> bool {
        self.state == PoolState::Ready
    }

    pub(crate) fn cause(&self) -> Option<&ClearCause> {
        self.cause.as_ref()
    }

    pub(crate) fn pause(&mut self, cause: Option<ClearCause>) -> Pause {
        match self.state {
            PoolState::Closed => Pause::Closed,
            PoolState::Paused => {
                self.cause = cause;
                Pause::AlreadyPaused
            }
            PoolState::Ready => {
                self.state = PoolState::Paused;
                self.cause = cause;
                Pause::Paused
            }
        }
    }

    /// PAUSED to READY. Returns whether the state changed.
    pub(crate) fn mark_ready(&mut self) -> bool {
        if self.state != PoolState::Paused {
            return false;
        }
        self.state = PoolState::Ready;
        self.cause = None;
        true
    }

    /// Any state to CLOSED. Returns whether the state changed.
    pub(crate) fn close(&mut self) -> bool {
        if self.state == PoolState::Closed {
            return false;
        }
        self.state = PoolState::Closed;
        true
    }

    /// The error an acquisition gets in the current state, if any.
    pub(crate) fn acquire_error(&self, address: &ServerAddress) -> Option<PoolError> {
        match self.state {
            PoolState::Ready => None,
            PoolState::Paused => Some(PoolError::Cleared {
                address: address.clone(),
                cause: self.cause.clone(),
            }),
            PoolState::Closed => Some(PoolError::Closed {
                address: address.clone(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn cause(msg: &str) -> Option<ClearCause> {
        Some(Arc::new(std::io::Error::other(msg.to_string())))
    }

    #[test]
    fn test_starts_paused() {
        let lifecycle = Lifecycle::new();
        assert_eq!(lifecycle.state(), PoolState::Paused);
        let err = lifecycle.acquire_error(&ServerAddress::default()).unwrap();
        assert!(matches!(err, PoolError::Cleared { cause: None, .. }));
    }

    #[test]
    fn test_pause_records_latest_cause() {
        let mut lifecycle = Lifecycle::new();
        assert!(lifecycle.mark_ready());
        assert_eq!(lifecycle.pause(cause("first")), Pause::Paused);
        assert_eq!(lifecycle.pause(cause("second")), Pause::AlreadyPaused);
        assert_eq!(lifecycle.cause().unwrap().to_string(), "second");
    }

    #[test]
    fn test_ready_clears_cause() {
        let mut lifecycle = Lifecycle::new();
        lifecycle.pause(cause("boom"));
        assert!(lifecycle.mark_ready());
        assert!(lifecycle.cause().is_none());
        assert!(!lifecycle.mark_ready());
        assert!(lifecycle.acquire_error(&ServerAddress::default()).is_none());
    }

    #[test]
    fn test_closed_is_terminal() {
        let mut lifecycle = Lifecycle::new();
        assert!(lifecycle.close());
        assert!(!lifecycle.close());
        assert!(!lifecycle.mark_ready());
        assert_eq!(lifecycle.pause(None), Pause::Closed);
        assert_eq!(lifecycle.state(), PoolState::Closed);
        assert!(matches!(
            lifecycle.acquire_error(&ServerAddress::default()),
            Some(PoolError::Closed { .. })
        ));
    }
}
