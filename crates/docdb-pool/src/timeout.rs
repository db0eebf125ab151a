//! Started deadlines.
//!
//! A [`Timeout`] is created once, when the operation it bounds begins, and
//! then queried for the time left. It is never restarted.

use std::time::{Duration, Instant};

/// A deadline that started when it was created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeout {
    started: Instant,
    deadline: Option<Instant>,
}

impl Timeout {
    /// Start a timeout of `duration` now.
    ///
    /// A zero duration is already expired.
    #[must_use]
    pub fn start_now(duration: Duration) -> Self {
        let started = Instant::now();
        Self {
            started,
            // Overflow means "further away than we can represent".
            deadline: started.checked_add(duration),
        }
    }

    /// A timeout that never expires.
    #[must_use]
    pub fn infinite() -> Self {
        Self {
            started: Instant::now(),
            deadline: None,
        }
    }

    /// Whether this timeout never expires.
    #[must_use]
    pub fn is_infinite(&self) -> bool {
        self.deadline.is_none()
    }

    /// Time left, `None` if infinite, `Some(ZERO)` once expired.
    #[must_use]
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// Whether the deadline has passed.
    #[must_use]
    pub fn has_expired(&self) -> bool {
        self.deadline
            .is_some_and(|deadline| Instant::now() >= deadline)
    }

    /// The absolute deadline, if any.
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time since the timeout started.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}
