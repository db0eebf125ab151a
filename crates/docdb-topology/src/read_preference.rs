//! Read preferences and the selector that applies them.

use std::fmt;
use std::str::FromStr;

use crate::description::{ClusterDescription, ClusterType, ServerDescription, ServerType};
use crate::error::TopologyError;

/// Chooses the servers an operation may be sent to.
pub trait ServerSelector: Send + Sync {
    /// Return the eligible servers, possibly empty.
    fn select(&self, cluster: &ClusterDescription) -> Vec<ServerDescription>;
}

/// Which replica set members a read may be routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "camelCase")
)]
pub enum ReadPreference {
    /// Only the primary.
    #[default]
    Primary,
    /// The primary if available, otherwise secondaries.
    PrimaryPreferred,
    /// Only secondaries.
    Secondary,
    /// Secondaries if available, otherwise the primary.
    SecondaryPreferred,
    /// Any data-bearing member.
    Nearest,
}

impl ReadPreference {
    /// Mode name as used in connection strings and commands.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::PrimaryPreferred => "primaryPreferred",
            Self::Secondary => "secondary",
            Self::SecondaryPreferred => "secondaryPreferred",
            Self::Nearest => "nearest",
        }
    }

    /// Whether this preference only ever allows the primary.
    #[must_use]
    pub fn is_primary_only(self) -> bool {
        self == Self::Primary
    }
}

impl fmt::Display for ReadPreference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ReadPreference {
    type Err = TopologyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "primary" => Ok(Self::Primary),
            "primarypreferred" => Ok(Self::PrimaryPreferred),
            "secondary" => Ok(Self::Secondary),
            "secondarypreferred" => Ok(Self::SecondaryPreferred),
            "nearest" => Ok(Self::Nearest),
            _ => Err(TopologyError::UnknownReadPreference(s.to_string())),
        }
    }
}

/// Selects servers according to a single [`ReadPreference`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadPreferenceServerSelector {
    read_preference: ReadPreference,
}

impl ReadPreferenceServerSelector {
    /// Create a selector for the given preference.
    pub fn new(read_preference: ReadPreference) -> Self {
        Self { read_preference }
    }

    /// The preference applied by this selector.
    #[must_use]
    pub fn read_preference(&self) -> ReadPreference {
        self.read_preference
    }

    fn select_replica_set(&self, cluster: &ClusterDescription) -> Vec<ServerDescription> {
        let primaries = || collect(cluster, ServerType::RsPrimary);
        let secondaries = || collect(cluster, ServerType::RsSecondary);

        match self.read_preference {
            ReadPreference::Primary => primaries(),
            ReadPreference::Secondary => secondaries(),
            ReadPreference::PrimaryPreferred => {
                let selected = primaries();
                if selected.is_empty() { secondaries() } else { selected }
            }
            ReadPreference::SecondaryPreferred => {
                let selected = secondaries();
                if selected.is_empty() { primaries() } else { selected }
            }
            ReadPreference::Nearest => cluster
                .servers
                .iter()
                .filter(|s| s.is_primary() || s.is_secondary())
                .cloned()
                .collect(),
        }
    }
}

impl ServerSelector for ReadPreferenceServerSelector {
    fn select(&self, cluster: &ClusterDescription) -> Vec<ServerDescription> {
        match cluster.cluster_type {
            ClusterType::ReplicaSet => self.select_replica_set(cluster),
            // Outside replica sets the preference is forwarded to the server
            // and does not narrow the candidates.
            ClusterType::Standalone => collect(cluster, ServerType::Standalone),
            ClusterType::Sharded => collect(cluster, ServerType::ShardRouter),
            ClusterType::LoadBalanced => collect(cluster, ServerType::LoadBalancer),
            ClusterType::Unknown => Vec::new(),
        }
    }
}

fn collect(cluster: &ClusterDescription, server_type: ServerType) -> Vec<ServerDescription> {
    cluster.servers_of_type(server_type).cloned().collect()
}
