//! Configuration, paths and logging setup shared by the camhub binaries.

mod config;
mod error;
mod logging;
mod paths;

pub use config::{ChannelConfig, Config, EdgeConfig, DEFAULT_LOG_LEVEL};
pub use error::{CoreError, CoreResult};
pub use logging::{init_logging, init_logging_for_service, parse_level, LogFormat};
pub use paths::Paths;
