//! Configuration shared by the onionserve crates.

pub mod config;

pub use config::{dev, service, tor, ConfigError, ServeMode, ServiceConfig};
