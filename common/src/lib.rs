pub mod error;
pub mod types;
pub mod config;
pub mod command;
pub mod constants;

pub use error::{GpError, Result, FanoutError, HostFailure};
pub use types::*;
pub use config::*;
pub use command::*;
pub use constants::*;
