use std::net::SocketAddr;
use std::time::Duration;

use clap::Parser;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::connection::ConnectionSettings;
use crate::error::ConfigError;

/// Command-line flags. Only flags actually passed override lower layers.
#[derive(Parser, Serialize, Debug, Default)]
#[command(name = "signalroom", version, about = "WebRTC signaling relay")]
pub struct Cli {
    /// Port to listen on
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    /// Bind address
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bind_address: Option<String>,

    /// Directory of static frontend files
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub static_dir: Option<String>,

    /// Enable structured JSON logging
    #[arg(long)]
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub json_logs: bool,

    /// Path to TOML config file
    #[arg(long, default_value = "./signalroom.toml")]
    #[serde(skip)]
    pub config: String,

    /// Output a commented TOML config template and exit
    #[arg(long)]
    #[serde(skip)]
    pub generate_config: bool,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Config {
    pub port: u16,
    pub bind_address: String,
    /// HS256 secret shared with the token issuer
    pub jwt_secret: String,
    /// Deadline for writing one frame to a peer's socket
    pub send_timeout_ms: u64,
    /// Frames queued per connection before it is treated as dead
    pub send_queue_capacity: usize,
    pub static_dir: Option<String>,
    pub json_logs: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8000,
            bind_address: "0.0.0.0".to_string(),
            jwt_secret: String::new(),
            send_timeout_ms: 5000,
            send_queue_capacity: 64,
            static_dir: None,
            json_logs: false,
        }
    }
}

impl Config {
    /// Layered precedence: built-in defaults < TOML file < env vars
    /// (SIGNALROOM_*) < CLI flags.
    pub fn load(cli: &Cli) -> Result<Self, ConfigError> {
        Self::figment(cli).extract::<Config>()?.validated()
    }

    fn figment(cli: &Cli) -> Figment {
        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&cli.config))
            .merge(Env::prefixed("SIGNALROOM_"))
            .merge(Serialized::defaults(cli))
    }

    fn validated(self) -> Result<Self, ConfigError> {
        if self.jwt_secret.is_empty() {
            return Err(ConfigError::Invalid(
                "jwt_secret must be set (SIGNALROOM_JWT_SECRET or config file)".into(),
            ));
        }
        if self.send_queue_capacity == 0 {
            return Err(ConfigError::Invalid("send_queue_capacity must be at least 1".into()));
        }
        if self.send_timeout_ms == 0 {
            return Err(ConfigError::Invalid("send_timeout_ms must be at least 1".into()));
        }
        Ok(self)
    }

    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        format!("{}:{}", self.bind_address, self.port)
            .parse()
            .map_err(|e| ConfigError::Invalid(format!("bad bind address: {e}")))
    }

    pub fn connection_settings(&self) -> ConnectionSettings {
        ConnectionSettings {
            send_timeout: Duration::from_millis(self.send_timeout_ms),
            queue_capacity: self.send_queue_capacity,
        }
    }
}

/// Generate a commented TOML config template
pub fn generate_config_template() -> String {
    r#"# signalroom configuration
# Place this file at ./signalroom.toml or pass --config <path>
# Every key can be overridden with SIGNALROOM_<KEY> environment variables.

# Server port (default: 8000)
# port = 8000

# Bind address (default: 0.0.0.0)
# bind_address = "0.0.0.0"

# HS256 secret shared with the service that issues access tokens (required)
# jwt_secret = ""

# Deadline in milliseconds for writing one frame to a peer (default: 5000)
# send_timeout_ms = 5000

# Frames that may queue for one peer before it is dropped as dead (default: 64)
# send_queue_capacity = 64

# Directory with the browser frontend, served for unmatched paths
# static_dir = "public"

# Structured JSON logs
# json_logs = false
"#
    .to_string()
}
