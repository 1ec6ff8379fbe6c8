pub mod conf;
pub mod segment;
pub mod server;
pub mod system;
pub mod validate;

pub use segment::{SegmentRequest, SegmentManager};
pub use server::AgentService;
pub use system::{HostSystem, LocalSystem};
pub use validate::{non_empty_directories, validate_host_env};
