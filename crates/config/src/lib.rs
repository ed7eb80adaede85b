//! Node configuration, loaded from TOML.

mod config;
pub mod errors;

pub use config::*;
pub use errors::ConfigError;
