//! # docdb-topology
//!
//! Server and cluster descriptions plus read-preference based server
//! selection for the docdb driver.
//!
//! Topology monitoring lives elsewhere; this crate only models what the
//! monitor reports and decides which of the known servers an operation may
//! be routed to.
//!
//! ## Example
//!
//! ```rust
//! use docdb_topology::{
//!     ClusterDescription, ClusterType, ReadPreference, ReadPreferenceWithFallbackSelector,
//!     ServerAddress, ServerDescription, ServerSelector, ServerType,
//! };
//!
//! let cluster = ClusterDescription::new(
//!     ClusterType::ReplicaSet,
//!     vec![
//!         ServerDescription::new(ServerAddress::new("db0", 27017), ServerType::RsPrimary)
//!             .with_max_wire_version(7),
//!         ServerDescription::new(ServerAddress::new("db1", 27017), ServerType::RsSecondary)
//!             .with_max_wire_version(7),
//!     ],
//! );
//!
//! let selector = ReadPreferenceWithFallbackSelector::new(
//!     ReadPreference::Secondary,
//!     6,
//!     ReadPreference::Primary,
//! );
//! let selected = selector.select(&cluster);
//!
//! assert_eq!(selector.applied_read_preference(), Some(ReadPreference::Secondary));
//! assert_eq!(selected.len(), 1);
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod address;
pub mod description;
pub mod error;
pub mod fallback;
pub mod read_preference;

pub use address::ServerAddress;
pub use description::{ClusterDescription, ClusterType, ServerDescription, ServerType};
pub use error::TopologyError;
pub use fallback::{ReadPreferenceWithFallbackSelector, max_wire_version};
pub use read_preference::{ReadPreference, ReadPreferenceServerSelector, ServerSelector};
