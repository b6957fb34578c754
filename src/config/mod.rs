//! Configuration module for relmap.
//!
//! Handles settings files, environment variable expansion and connection strings.

mod connection;
mod settings;

pub use connection::{ConnectionError, ConnectionInfo};
pub use settings::{
    expand_env_vars, ConnectionSettings, DatasetSettings, EngineSettings, Settings,
    SettingsError,
};
