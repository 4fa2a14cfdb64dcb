//! Configuration, paths, and shared utilities for the Tern agent.

mod config;
pub mod data_limit;
mod error;
mod logging;
mod paths;

pub use config::{Config, DEFAULT_LOG_LEVEL, DEFAULT_REDIS_URL};
pub use data_limit::{
    CellularConfig, DataLimitConfig, LimitSettings, StorageConfig, BYTES_PER_MEGABYTE,
};
pub use error::{CoreError, CoreResult};
pub use logging::{init_logging, parse_level};
pub use paths::Paths;
