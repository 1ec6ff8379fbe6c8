pub const DEFAULT_HUB_PORT: u16 = 4242;
pub const DEFAULT_AGENT_PORT: u16 = 8000;
pub const DEFAULT_SERVICE_NAME: &str = "gp";
pub const DEFAULT_LOG_DIR: &str = "/tmp";
pub const CONFIG_FILE_NAME: &str = "gp.conf";

pub const DEFAULT_DATABASE: &str = "template1";
pub const DEFAULT_ENCODING: &str = "UTF-8";
pub const DEFAULT_COORDINATOR_MAX_CONNECTIONS: u32 = 150;
/// Segment max_connections default is the coordinator value times this factor
pub const SEGMENT_CONNECTION_FACTOR: u32 = 3;
pub const DEFAULT_SHARED_BUFFERS: &str = "128000kB";

pub const UTILITY_MODE_OPTIONS: &str = "-c gp_role=utility";
pub const SEGMENT_START_TIMEOUT_SECS: u32 = 600;
