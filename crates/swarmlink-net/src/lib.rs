// Onion-routed swarm client: paths, requests, dispatch and reconciliation.

pub mod client;
pub mod config;
pub mod discovery;
pub mod expiry;
pub mod nodes;
pub mod onion;
pub mod path;
pub mod poller;
pub mod request;
pub mod retrieve;
pub mod transport;

pub use client::{BatchResult, SwarmClient};
pub use config::ClientConfig;
pub use discovery::{load_seed_nodes, parse_service_node_list, parse_swarm_listing, service_nodes_from_value};
pub use expiry::{ApplyOutcome, ExpiryCoordinator, SwarmApplySummary};
pub use nodes::{NodeDirectory, NodeHandle, ServiceNode};
pub use path::{PathBuilder, SwarmPath};
pub use poller::{spawn_poller, PollerCommand, PollerContext, PollerNotification};
pub use request::{BatchRequest, ExpiryMode, Operation, RequestEncoder, SubRequest};
pub use retrieve::{merge_retrieve, RetrieveAccumulator};
pub use transport::{HttpTransport, Transport};
