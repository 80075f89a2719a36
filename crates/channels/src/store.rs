//! Persistence contract for channel records.

use {
    async_trait::async_trait,
    futures::stream::BoxStream,
    serde::{Deserialize, Serialize},
    serde_json::{Map, Value},
};

use crate::error::{Error, Result};

/// Persisted worker intent, read by startup reconciliation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelState {
    #[default]
    Stopped,
    Running,
}

impl ChannelState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::Running => "running",
        }
    }
}

impl std::str::FromStr for ChannelState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "stopped" => Ok(Self::Stopped),
            "running" => Ok(Self::Running),
            other => Err(Error::storage(
                "decode channel state",
                format!("unknown state '{other}'"),
            )),
        }
    }
}

/// A persisted channel.
///
/// Serializes to the API representation: `id`, `type`, `config`, `status`
/// and every metadata field flattened alongside them. `state` and the
/// timestamps stay internal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelRecord {
    pub id: String,
    #[serde(rename = "type")]
    pub channel_type: String,
    #[serde(default)]
    pub config: Value,
    #[serde(default = "empty_object")]
    pub status: Value,
    #[serde(flatten)]
    pub metadata: Map<String, Value>,
    #[serde(skip)]
    pub state: ChannelState,
    #[serde(skip)]
    pub created_at: i64,
    #[serde(skip)]
    pub updated_at: i64,
}

fn empty_object() -> Value {
    Value::Object(Map::new())
}

impl ChannelRecord {
    /// A freshly created, stopped record with an empty status.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        channel_type: impl Into<String>,
        config: Value,
        metadata: Map<String, Value>,
    ) -> Self {
        let now = unix_now();
        Self {
            id: id.into(),
            channel_type: channel_type.into(),
            config,
            status: empty_object(),
            metadata,
            state: ChannelState::Stopped,
            created_at: now,
            updated_at: now,
        }
    }

    /// Bump `updated_at` to now.
    pub fn touch(&mut self) {
        self.updated_at = unix_now();
    }

    /// Integer metadata field, if present and non-negative.
    #[must_use]
    pub fn metadata_u64(&self, key: &str) -> Option<u64> {
        self.metadata.get(key).and_then(Value::as_u64)
    }

    /// String metadata field, if present.
    #[must_use]
    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(Value::as_str)
    }
}

pub(crate) fn unix_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

/// Durable key-value storage for channel records, keyed by channel id.
///
/// Implementations must be safe to share across channels and tasks.
#[async_trait]
pub trait ChannelStore: Send + Sync {
    /// Insert or replace the record stored under `record.id`.
    async fn put(&self, record: &ChannelRecord) -> Result<()>;

    /// Fetch a record, failing with [`Error::ChannelNotFound`] when absent.
    async fn get(&self, id: &str) -> Result<ChannelRecord>;

    /// Remove a record. Removing an absent id succeeds.
    async fn delete(&self, id: &str) -> Result<()>;

    /// Stream every stored id. Each call starts a fresh, finite pass.
    fn list(&self) -> BoxStream<'_, Result<String>>;

    /// Whether a record exists for `id`.
    async fn exists(&self, id: &str) -> Result<bool> {
        match self.get(id).await {
            Ok(_) => Ok(true),
            Err(Error::ChannelNotFound { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }
}
