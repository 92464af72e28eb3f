use clap::Parser;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Marketplace messaging server
#[derive(Parser, Serialize, Deserialize, Clone, Debug)]
#[command(name = "marketchat-server", version, about = "Marketplace real-time messaging server")]
pub struct Config {
    /// Port to listen on
    #[arg(long, env = "MARKETCHAT_PORT", default_value = "4000")]
    pub port: u16,

    /// Bind address
    #[arg(long, env = "MARKETCHAT_BIND_ADDRESS", default_value = "0.0.0.0")]
    pub bind_address: String,

    /// Path to TOML config file
    #[arg(long, default_value = "./marketchat.toml")]
    pub config: String,

    /// Enable structured JSON logging (for Docker/production)
    #[arg(long, env = "MARKETCHAT_JSON_LOGS")]
    pub json_logs: bool,

    /// Output a commented TOML config template and exit
    #[arg(long)]
    pub generate_config: bool,

    /// Data directory for persistent state (DB, signing key)
    #[arg(long, env = "MARKETCHAT_DATA_DIR", default_value = "./data")]
    pub data_dir: String,

    /// Messaging behaviour (loaded from [chat] section in TOML)
    #[arg(skip)]
    #[serde(default)]
    pub chat: Option<ChatConfig>,
}

/// Who receives presence broadcasts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PresenceScope {
    /// Every connected user.
    #[default]
    Global,
    /// Only users sharing at least one conversation with the subject.
    Conversations,
}

/// Configuration for the messaging core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatConfig {
    /// Maximum message length in characters after trimming (default: 4000)
    #[serde(default = "default_max_content_length")]
    pub max_content_length: usize,

    /// Upper bound for any single persistence call, in milliseconds (default: 5000)
    #[serde(default = "default_db_timeout_ms")]
    pub db_timeout_ms: u64,

    /// Page size used when a request names none (default: 50)
    #[serde(default = "default_page_size")]
    pub default_page_size: u32,

    /// Hard cap on requested page size (default: 100)
    #[serde(default = "default_max_page_size")]
    pub max_page_size: u32,

    /// Presence broadcast audience (default: global)
    #[serde(default)]
    pub presence_scope: PresenceScope,

    /// Interval between server WebSocket pings (default: 30)
    #[serde(default = "default_ping_interval")]
    pub ping_interval_secs: u64,

    /// Close the socket if no pong arrives within this many seconds (default: 10)
    #[serde(default = "default_pong_timeout")]
    pub pong_timeout_secs: u64,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            max_content_length: default_max_content_length(),
            db_timeout_ms: default_db_timeout_ms(),
            default_page_size: default_page_size(),
            max_page_size: default_max_page_size(),
            presence_scope: PresenceScope::Global,
            ping_interval_secs: default_ping_interval(),
            pong_timeout_secs: default_pong_timeout(),
        }
    }
}

impl ChatConfig {
    pub fn db_timeout(&self) -> Duration {
        Duration::from_millis(self.db_timeout_ms)
    }

    /// At least one second; `tokio::time::interval` panics on zero.
    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs.max(1))
    }

    pub fn pong_timeout(&self) -> Duration {
        Duration::from_secs(self.pong_timeout_secs.max(1))
    }

    /// Resolve a requested (page, limit) into a 1-based page and a clamped limit.
    pub fn page_window(&self, page: Option<u32>, limit: Option<u32>) -> (u32, u32) {
        let page = page.unwrap_or(1).max(1);
        let limit = limit
            .unwrap_or(self.default_page_size)
            .clamp(1, self.max_page_size.max(1));
        (page, limit)
    }
}

fn default_max_content_length() -> usize {
    4000
}

fn default_db_timeout_ms() -> u64 {
    5000
}

fn default_page_size() -> u32 {
    50
}

fn default_max_page_size() -> u32 {
    100
}

fn default_ping_interval() -> u64 {
    30
}

fn default_pong_timeout() -> u64 {
    10
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 4000,
            bind_address: "0.0.0.0".to_string(),
            config: "./marketchat.toml".to_string(),
            json_logs: false,
            generate_config: false,
            data_dir: "./data".to_string(),
            chat: Some(ChatConfig::default()),
        }
    }
}

impl Config {
    /// Load config with layered precedence:
    /// built-in defaults < TOML file < env vars (MARKETCHAT_*) < CLI args
    pub fn load() -> Result<Self, figment::Error> {
        let cli = Config::parse();
        let config_path = cli.config.clone();

        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&config_path))
            .merge(Env::prefixed("MARKETCHAT_").split("__"))
            .merge(Serialized::defaults(cli))
            .extract()
    }
}

/// Generate a commented TOML config template
pub fn generate_config_template() -> String {
    r#"# Marketchat Server Configuration
# Place this file at ./marketchat.toml or specify with --config <path>
# All settings can be overridden via environment variables (MARKETCHAT_PORT,
# MARKETCHAT_CHAT__DB_TIMEOUT_MS, etc.) or CLI flags (--port, etc.)

# Server port (default: 4000)
# port = 4000

# Bind address (default: 0.0.0.0, all interfaces)
# bind_address = "0.0.0.0"

# Enable structured JSON logging for Docker/production
# json_logs = false

# Data directory for the SQLite database and JWT signing key.
# The signing key must be shared with the service that issues session tokens.
# data_dir = "./data"

# ---- Messaging ----
# [chat]
# max_content_length = 4000
# db_timeout_ms = 5000
# default_page_size = 50
# max_page_size = 100

# Presence audience: "global" (every connected user) or
# "conversations" (only users sharing a conversation with the subject)
# presence_scope = "global"

# ping_interval_secs = 30
# pong_timeout_secs = 10
"#
    .to_string()
}
