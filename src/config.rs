//! Configuration loading. Grounded on a sibling gateway's `Config::load`
//! (`serde` + `toml`) pattern, scaled to the options `flow_irc_gateway.py`'s
//! `parse_options_and_config` exposes. The core (state, dispatcher, session,
//! event loop) never touches this module or the filesystem directly — it
//! consumes the already-parsed `Config`.

use serde::Deserialize;
use std::path::Path;

use crate::error::ConfigError;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub gateway: GatewaySection,
    #[serde(default)]
    pub backend: BackendSection,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GatewaySection {
    /// Forced backend identity. Blank means "use the first local account".
    #[serde(default)]
    pub username: String,
    #[serde(default = "default_irc_ports")]
    pub irc_ports: Vec<u16>,
    #[serde(default)]
    pub show_timestamps: bool,
    #[serde(default)]
    pub debug: bool,
    #[serde(default)]
    pub verbose: bool,
    #[serde(default)]
    pub daemon: bool,
}

impl Default for GatewaySection {
    fn default() -> Self {
        Self {
            username: String::new(),
            irc_ports: default_irc_ports(),
            show_timestamps: false,
            debug: false,
            verbose: false,
            daemon: false,
        }
    }
}

fn default_irc_ports() -> Vec<u16> {
    vec![6667]
}

#[derive(Debug, Clone, Deserialize)]
pub struct BackendSection {
    #[serde(default = "default_backend_host")]
    pub host: String,
    /// 0 lets the backend subprocess pick its own loopback port.
    #[serde(default)]
    pub port: u16,
    #[serde(default = "default_backend_binary")]
    pub binary: String,
    #[serde(default)]
    pub uri: String,
    #[serde(default)]
    pub db_dir: String,
    #[serde(default)]
    pub schema_dir: String,
    #[serde(default)]
    pub attachment_dir: String,
    #[serde(default)]
    pub use_tls: bool,
}

impl Default for BackendSection {
    fn default() -> Self {
        Self {
            host: default_backend_host(),
            port: 0,
            binary: default_backend_binary(),
            uri: String::new(),
            db_dir: String::new(),
            schema_dir: String::new(),
            attachment_dir: String::new(),
            use_tls: false,
        }
    }
}

fn default_backend_host() -> String {
    "127.0.0.1".to_string()
}

fn default_backend_binary() -> String {
    "messaging-backend".to_string()
}

impl Config {
    /// Reads and parses a TOML config file from `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&raw)?;
        Ok(config)
    }

    /// Applies `--debug`, `--show-timestamps`, and `--username <name>`,
    /// which take precedence over whatever the config file set.
    pub fn apply_cli_overrides(&mut self, mut args: impl Iterator<Item = String>) {
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--debug" => self.gateway.debug = true,
                "--show-timestamps" => self.gateway.show_timestamps = true,
                "--username" => {
                    if let Some(name) = args.next() {
                        self.gateway.username = name;
                    }
                }
                _ => {}
            }
        }
    }
}
