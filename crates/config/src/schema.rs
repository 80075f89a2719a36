/// Config schema types (server, store, workers, channels).
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SwitchboardConfig {
    pub server: ServerConfig,
    pub store: StoreConfig,
    pub workers: WorkersConfig,
    pub channels: ChannelsConfig,
}

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind to. Defaults to "127.0.0.1".
    pub bind: String,
    /// Port to listen on. Defaults to 8080.
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".into(),
            port: 8080,
        }
    }
}

/// Which channel store backend to use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Sqlite,
    /// Records live only as long as the process. Useful for local testing.
    Memory,
}

/// Channel store configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    /// SQLite connection URL. When unset, `switchboard.db` in the data
    /// directory is used.
    pub database_url: Option<String>,
}

/// Worker supervision limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkersConfig {
    /// Seconds a worker may take to start before it is treated as failed.
    pub start_timeout_secs: u64,
    /// Seconds a worker may take to shut down.
    pub stop_timeout_secs: u64,
}

impl Default for WorkersConfig {
    fn default() -> Self {
        Self {
            start_timeout_secs: 10,
            stop_timeout_secs: 10,
        }
    }
}

impl WorkersConfig {
    #[must_use]
    pub fn start_timeout(&self) -> Duration {
        Duration::from_secs(self.start_timeout_secs)
    }

    #[must_use]
    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }
}

/// When a modify request restarts the channel's worker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RestartPolicy {
    /// Restart only when the merged `config` document differs from the old one.
    #[default]
    OnConfigChange,
    /// Restart on every modify, including metadata-only changes.
    Always,
    /// Never restart; changes apply on the next start.
    Never,
}

impl RestartPolicy {
    /// Whether a modify that turned `old` config into `new` needs a restart.
    #[must_use]
    pub fn requires_restart(self, old: &serde_json::Value, new: &serde_json::Value) -> bool {
        match self {
            Self::OnConfigChange => old != new,
            Self::Always => true,
            Self::Never => false,
        }
    }
}

/// Channel lifecycle behaviour.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelsConfig {
    pub restart_policy: RestartPolicy,
}
