use clap::Parser;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// Beacon notification bridge
#[derive(Parser, Serialize, Deserialize, Clone, Debug)]
#[command(name = "beacon-server", version, about = "Queue-to-WebSocket notification bridge")]
pub struct Config {
    /// Port to listen on
    #[arg(long, env = "BEACON_PORT", default_value = "3001")]
    pub port: u16,

    /// Bind address
    #[arg(long, env = "BEACON_BIND_ADDRESS", default_value = "0.0.0.0")]
    pub bind_address: String,

    /// Path to TOML config file
    #[arg(long, default_value = "./beacon.toml")]
    pub config: String,

    /// Enable structured JSON logging (for Docker/production)
    #[arg(long, env = "BEACON_JSON_LOGS")]
    pub json_logs: bool,

    /// Output a commented TOML config template and exit
    #[arg(long)]
    pub generate_config: bool,

    /// Queue configuration (loaded from [queue] section in TOML)
    #[arg(skip)]
    #[serde(default)]
    pub queue: QueueConfig,
}

/// Configuration for the queue subscriptions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Queue carrying single-target notification jobs
    #[serde(default = "default_single_queue")]
    pub single_queue: String,

    /// Queue carrying bulk (multi-target) notification jobs
    #[serde(default = "default_bulk_queue")]
    pub bulk_queue: String,

    /// Max unacknowledged deliveries in flight per channel
    #[serde(default = "default_prefetch")]
    pub prefetch: u16,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            single_queue: default_single_queue(),
            bulk_queue: default_bulk_queue(),
            prefetch: default_prefetch(),
        }
    }
}

fn default_single_queue() -> String {
    "notifications.send".to_string()
}

fn default_bulk_queue() -> String {
    "notifications.bulk".to_string()
}

fn default_prefetch() -> u16 {
    1
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 3001,
            bind_address: "0.0.0.0".to_string(),
            config: "./beacon.toml".to_string(),
            json_logs: false,
            generate_config: false,
            queue: QueueConfig::default(),
        }
    }
}

impl Config {
    /// Load config with layered precedence:
    /// built-in defaults < TOML file < env vars (BEACON_*) < CLI args
    pub fn load() -> Result<Self, figment::Error> {
        let cli = Config::parse();
        let config_path = cli.config.clone();

        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&config_path))
            .merge(Env::prefixed("BEACON_"))
            .merge(Serialized::defaults(cli))
            .extract()
    }
}

/// Generate a commented TOML config template
pub fn generate_config_template() -> String {
    r#"# Beacon Notification Bridge Configuration
# Place this file at ./beacon.toml or specify with --config <path>
# All settings can be overridden via environment variables (BEACON_PORT, etc.)
# or CLI flags (--port, etc.)

# Server port (default: 3001)
# port = 3001

# Bind address (default: 0.0.0.0 — all interfaces)
# bind_address = "0.0.0.0"

# Enable structured JSON logging for Docker/production
# json_logs = false

# ---- Queue Subscriptions ----
# [queue]

# Queue carrying single-target notification jobs
# single_queue = "notifications.send"

# Queue carrying bulk (multi-target) notification jobs
# bulk_queue = "notifications.bulk"

# Max unacknowledged deliveries in flight per channel (default: 1)
# prefetch = 1
"#
    .to_string()
}
