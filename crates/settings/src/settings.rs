//! Configuration system for Termbridge.
//!
//! TOML config file with broker defaults and topic templates.

pub mod file;

pub use file::{config_path, expand_topic, load_config, Config};
