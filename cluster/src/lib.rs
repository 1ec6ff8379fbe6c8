//! Hub side of cluster bring-up: agent connections, fan-out, and the
//! MakeCluster workflow that ties validation, provisioning and catalog
//! registration together.

pub mod agent;
pub mod catalog;
pub mod fanout;
pub mod finalize;
pub mod hub;
pub mod lifecycle;
pub mod pool;
pub mod provisioner;
pub mod registrar;
pub mod stream;
pub mod validator;

pub use agent::{AgentClient, AgentDialer, GrpcAgentClient, GrpcDialer, DIAL_TIMEOUT};
pub use catalog::{CatalogConnector, CatalogSession, CatalogTarget, PgConnector};
pub use fanout::{execute_rpc, join_all_errors};
pub use hub::HubService;
pub use lifecycle::{ClusterLifecycle, LifecycleState};
pub use pool::{Connection, ConnectionPool};
pub use registrar::{select_primaries, Registrar};
pub use stream::{ChannelSink, EventSink, ProgressTracker};
