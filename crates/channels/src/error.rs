use std::error::Error as StdError;

/// Crate-wide result type for channel operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Failure categories surfaced to API callers.
///
/// Every [`Error`] maps to exactly one kind; the HTTP layer owns the
/// status/description pairing for each. Body validation failures never reach
/// the channel core and have no kind here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Well-formed request that breaks a usage rule.
    ApiUsage,
    /// Referenced channel or message does not exist.
    NotFound,
    /// Operation needed a live worker and none is running.
    ChannelNotRunning,
    /// Worker failed to start or restart.
    WorkerStart,
    /// Persistence backend failure.
    Storage,
    /// Anything else.
    Internal,
}

/// Typed channel lifecycle errors.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Request is schema-valid but semantically wrong.
    #[error("{message}")]
    ApiUsage { message: String },

    #[error("channel not found: {channel_id}")]
    ChannelNotFound { channel_id: String },

    #[error("message {message_id} not found on channel {channel_id}")]
    MessageNotFound {
        channel_id: String,
        message_id: String,
    },

    #[error("channel {channel_id} is not running")]
    NotRunning { channel_id: String },

    #[error("channel {channel_id} already has a running worker")]
    AlreadyRunning { channel_id: String },

    #[error("worker for channel {channel_id} failed to start: {source}")]
    WorkerStart {
        channel_id: String,
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },

    #[error("worker for channel {channel_id} failed to stop: {source}")]
    WorkerStop {
        channel_id: String,
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },

    /// A running worker rejected or failed a forwarded request.
    #[error("worker for channel {channel_id} failed: {source}")]
    Worker {
        channel_id: String,
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },

    #[error("storage failure: {context}: {source}")]
    Storage {
        context: String,
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },

    /// JSON (de)serialization failed.
    #[error(transparent)]
    SerdeJson(#[from] serde_json::Error),

    /// A detached lifecycle task panicked or was aborted.
    #[error(transparent)]
    Join(#[from] tokio::task::JoinError),
}

impl Error {
    #[must_use]
    pub fn api_usage(message: impl std::fmt::Display) -> Self {
        Self::ApiUsage {
            message: message.to_string(),
        }
    }

    #[must_use]
    pub fn channel_not_found(channel_id: impl Into<String>) -> Self {
        Self::ChannelNotFound {
            channel_id: channel_id.into(),
        }
    }

    #[must_use]
    pub fn message_not_found(channel_id: impl Into<String>, message_id: impl Into<String>) -> Self {
        Self::MessageNotFound {
            channel_id: channel_id.into(),
            message_id: message_id.into(),
        }
    }

    #[must_use]
    pub fn not_running(channel_id: impl Into<String>) -> Self {
        Self::NotRunning {
            channel_id: channel_id.into(),
        }
    }

    #[must_use]
    pub fn worker_start(
        channel_id: impl Into<String>,
        source: impl Into<Box<dyn StdError + Send + Sync>>,
    ) -> Self {
        Self::WorkerStart {
            channel_id: channel_id.into(),
            source: source.into(),
        }
    }

    #[must_use]
    pub fn worker_stop(
        channel_id: impl Into<String>,
        source: impl Into<Box<dyn StdError + Send + Sync>>,
    ) -> Self {
        Self::WorkerStop {
            channel_id: channel_id.into(),
            source: source.into(),
        }
    }

    #[must_use]
    pub fn worker(
        channel_id: impl Into<String>,
        source: impl Into<Box<dyn StdError + Send + Sync>>,
    ) -> Self {
        Self::Worker {
            channel_id: channel_id.into(),
            source: source.into(),
        }
    }

    #[must_use]
    pub fn storage(
        context: impl Into<String>,
        source: impl Into<Box<dyn StdError + Send + Sync>>,
    ) -> Self {
        Self::Storage {
            context: context.into(),
            source: source.into(),
        }
    }

    /// Classify this error for the response envelope.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ApiUsage { .. } => ErrorKind::ApiUsage,
            Self::ChannelNotFound { .. } | Self::MessageNotFound { .. } => ErrorKind::NotFound,
            Self::NotRunning { .. } => ErrorKind::ChannelNotRunning,
            Self::WorkerStart { .. } | Self::AlreadyRunning { .. } => ErrorKind::WorkerStart,
            Self::Storage { .. } => ErrorKind::Storage,
            Self::WorkerStop { .. } | Self::Worker { .. } | Self::SerdeJson(_) | Self::Join(_) => {
                ErrorKind::Internal
            },
        }
    }

    /// Stable symbolic name reported as the error entry `type`.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::ApiUsage { .. } => "ApiUsageError",
            Self::ChannelNotFound { .. } => "ChannelNotFound",
            Self::MessageNotFound { .. } => "MessageNotFound",
            Self::NotRunning { .. } => "ChannelNotRunning",
            Self::AlreadyRunning { .. } => "WorkerAlreadyRunning",
            Self::WorkerStart { .. } => "WorkerStartError",
            Self::WorkerStop { .. } => "WorkerStopError",
            Self::Worker { .. } => "WorkerError",
            Self::Storage { .. } => "StorageError",
            Self::SerdeJson(_) => "SerializationError",
            Self::Join(_) => "TaskError",
        }
    }

    /// Whether the message is safe to return to API callers.
    #[must_use]
    pub fn is_user_facing(&self) -> bool {
        matches!(self.kind(), ErrorKind::ApiUsage)
    }
}
