//! Server and cluster descriptions as reported by topology monitoring.

use std::time::Duration;

use crate::address::ServerAddress;

/// Role a server reported in its last successful handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[non_exhaustive]
pub enum ServerType {
    /// Standalone server.
    Standalone,
    /// Replica set primary.
    RsPrimary,
    /// Replica set secondary.
    RsSecondary,
    /// Replica set arbiter (holds no data).
    RsArbiter,
    /// Hidden, starting up, or otherwise non-electable member.
    RsOther,
    /// Member that has not yet joined a replica set.
    RsGhost,
    /// Query router in a sharded cluster.
    ShardRouter,
    /// Load balancer fronting one or more services.
    LoadBalancer,
    /// Not yet contacted, or unreachable.
    Unknown,
}

impl ServerType {
    /// Whether a read may be routed to this server at all.
    #[must_use]
    pub fn is_data_bearing(self) -> bool {
        matches!(
            self,
            Self::Standalone
                | Self::RsPrimary
                | Self::RsSecondary
                | Self::ShardRouter
                | Self::LoadBalancer
        )
    }
}

/// The state of a single server as last observed.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ServerDescription {
    /// Server endpoint.
    pub address: ServerAddress,
    /// Reported role.
    pub server_type: ServerType,
    /// Lowest wire protocol version the server speaks.
    pub min_wire_version: i32,
    /// Highest wire protocol version the server speaks.
    pub max_wire_version: i32,
    /// Smoothed round trip time of the monitoring connection.
    pub round_trip_time: Option<Duration>,
}

impl ServerDescription {
    /// Describe a server with wire versions not yet known.
    pub fn new(address: ServerAddress, server_type: ServerType) -> Self {
        Self {
            address,
            server_type,
            min_wire_version: 0,
            max_wire_version: 0,
            round_trip_time: None,
        }
    }

    /// Describe a server that has not been contacted.
    pub fn unknown(address: ServerAddress) -> Self {
        Self::new(address, ServerType::Unknown)
    }

    /// Set the highest wire version.
    #[must_use]
    pub fn with_max_wire_version(mut self, version: i32) -> Self {
        self.max_wire_version = version;
        self
    }

    /// Set the lowest wire version.
    #[must_use]
    pub fn with_min_wire_version(mut self, version: i32) -> Self {
        self.min_wire_version = version;
        self
    }

    /// Set the round trip time.
    #[must_use]
    pub fn with_round_trip_time(mut self, rtt: Duration) -> Self {
        self.round_trip_time = Some(rtt);
        self
    }

    /// Whether this server is a replica set primary.
    #[must_use]
    pub fn is_primary(&self) -> bool {
        self.server_type == ServerType::RsPrimary
    }

    /// Whether this server is a replica set secondary.
    #[must_use]
    pub fn is_secondary(&self) -> bool {
        self.server_type == ServerType::RsSecondary
    }
}

/// Kind of deployment the client is connected to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[non_exhaustive]
pub enum ClusterType {
    /// A single standalone server.
    Standalone,
    /// A replica set.
    ReplicaSet,
    /// A sharded cluster reached through routers.
    Sharded,
    /// A deployment behind a load balancer.
    LoadBalanced,
    /// Not yet determined.
    #[default]
    Unknown,
}

/// Snapshot of every known server in the deployment.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ClusterDescription {
    /// Deployment kind.
    pub cluster_type: ClusterType,
    /// Known servers, in no particular order.
    pub servers: Vec<ServerDescription>,
}

impl ClusterDescription {
    /// Create a cluster description.
    pub fn new(cluster_type: ClusterType, servers: Vec<ServerDescription>) -> Self {
        Self {
            cluster_type,
            servers,
        }
    }

    /// Known servers.
    #[must_use]
    pub fn servers(&self) -> &[ServerDescription] {
        &self.servers
    }

    /// Look up a server by address.
    #[must_use]
    pub fn server(&self, address: &ServerAddress) -> Option<&ServerDescription> {
        self.servers.iter().find(|s| &s.address == address)
    }

    /// Servers reporting the given type.
    pub fn servers_of_type(&self, server_type: ServerType) -> impl Iterator<Item = &ServerDescription> {
        self.servers
            .iter()
            .filter(move |s| s.server_type == server_type)
    }
}
