//! Command-line side of gpctl: talks to the hub and renders what it streams back.

pub mod hub_client;
pub mod input;
pub mod stream;

pub use hub_client::{format_statuses, HubClient};
pub use input::{check_open_file_limit, InputFile, InputSegment};
pub use stream::StreamRenderer;
