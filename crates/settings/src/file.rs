//! TOML config file support.
//!
//! Config location: `~/.config/termbridge/config.toml`

use serde::Deserialize;
use session::SessionId;
use std::path::PathBuf;
use tracing::warn;

/// User-facing config parsed from TOML.
///
/// Topic templates may contain a `{session}` placeholder, replaced with the
/// session's id so several bridged sessions don't share a topic. The broker
/// password is deliberately not a config key; it comes from the
/// `TERMBRIDGE_MQTT_PASSWORD` environment variable.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, rename_all = "kebab-case")]
pub struct Config {
    /// Broker hostname or IP.
    pub broker_host: String,
    /// Broker port (1883 for plain MQTT).
    pub broker_port: u16,
    /// Template for the topic terminal output is published to.
    pub publish_topic: String,
    /// Template for the topic injected input is received on.
    pub subscribe_topic: String,
    /// Prefix for generated MQTT client ids.
    pub client_id_prefix: String,
    /// MQTT keep-alive interval in seconds.
    pub keep_alive_secs: u64,
    /// Broker username, if the broker requires authentication.
    pub username: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            broker_host: "localhost".to_string(),
            broker_port: 1883,
            publish_topic: "termbridge/{session}/out".to_string(),
            subscribe_topic: "termbridge/{session}/in".to_string(),
            client_id_prefix: "termbridge".to_string(),
            keep_alive_secs: 30,
            username: None,
        }
    }
}

/// Path to the user's config file (`~/.config/termbridge/config.toml`).
pub fn config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("termbridge").join("config.toml"))
}

/// Load the config, falling back to defaults if the file is missing or
/// malformed. A bad config never prevents startup.
pub fn load_config() -> Config {
    let Some(path) = config_path() else {
        warn!("Could not determine config directory; using defaults");
        return Config::default();
    };
    let Ok(contents) = std::fs::read_to_string(&path) else {
        return Config::default();
    };
    parse_config(&contents)
}

fn parse_config(contents: &str) -> Config {
    match toml::from_str(contents) {
        Ok(config) => config,
        Err(e) => {
            warn!("Invalid config file, using defaults: {}", e);
            Config::default()
        }
    }
}

/// Expand a topic template for one session.
pub fn expand_topic(template: &str, session: SessionId) -> String {
    template.replace("{session}", &session.to_string())
}
