//! Read preference with a fallback for deployments that are too old.
//!
//! Some read modes are only honoured by servers speaking a recent enough
//! wire protocol. [`ReadPreferenceWithFallbackSelector`] applies the
//! preferred mode when the newest known server is recent enough and the
//! fallback mode otherwise.

use parking_lot::Mutex;

use crate::description::{ClusterDescription, ServerDescription};
use crate::read_preference::{ReadPreference, ReadPreferenceServerSelector, ServerSelector};

/// Highest wire version reported by any known server, or 0 when none are known.
#[must_use]
pub fn max_wire_version(cluster: &ClusterDescription) -> i32 {
    cluster
        .servers
        .iter()
        .map(|s| s.max_wire_version)
        .max()
        .unwrap_or(0)
}

/// Selects with `preferred` when the deployment supports it, else with `fallback`.
///
/// The choice is recomputed on every call. The last applied preference is
/// kept for diagnostics only.
#[derive(Debug)]
pub struct ReadPreferenceWithFallbackSelector {
    preferred: ReadPreference,
    min_wire_version: i32,
    fallback: ReadPreference,
    applied: Mutex<Option<ReadPreference>>,
}

impl ReadPreferenceWithFallbackSelector {
    /// Create a selector that requires `min_wire_version` for `preferred`.
    pub fn new(preferred: ReadPreference, min_wire_version: i32, fallback: ReadPreference) -> Self {
        Self {
            preferred,
            min_wire_version,
            fallback,
            applied: Mutex::new(None),
        }
    }

    /// The preference used by the most recent [`select`](ServerSelector::select).
    #[must_use]
    pub fn applied_read_preference(&self) -> Option<ReadPreference> {
        *self.applied.lock()
    }

    /// Preferred mode.
    #[must_use]
    pub fn preferred(&self) -> ReadPreference {
        self.preferred
    }

    /// Fallback mode.
    #[must_use]
    pub fn fallback(&self) -> ReadPreference {
        self.fallback
    }

    /// Minimum wire version required for the preferred mode.
    #[must_use]
    pub fn min_wire_version(&self) -> i32 {
        self.min_wire_version
    }

    fn choose(&self, cluster: &ClusterDescription) -> ReadPreference {
        let observed = max_wire_version(cluster);
        let chosen = if observed >= self.min_wire_version {
            self.preferred
        } else {
            self.fallback
        };
        tracing::trace!(
            observed_wire_version = observed,
            min_wire_version = self.min_wire_version,
            read_preference = %chosen,
            "applying read preference"
        );
        chosen
    }
}

impl ServerSelector for ReadPreferenceWithFallbackSelector {
    fn select(&self, cluster: &ClusterDescription) -> Vec<ServerDescription> {
        let chosen = self.choose(cluster);
        *self.applied.lock() = Some(chosen);
        ReadPreferenceServerSelector::new(chosen).select(cluster)
    }
}
