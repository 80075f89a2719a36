use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid telnet config: {0}")]
    Config(#[source] serde_json::Error),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("no telnet client connected from '{address}'")]
    UnknownAddress { address: String },

    #[error("no inbound message '{message_id}' to reply to")]
    UnknownReply { message_id: String },

    #[error(transparent)]
    Reqwest(#[from] reqwest::Error),
}

impl Error {
    #[must_use]
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    #[must_use]
    pub fn unknown_address(address: impl Into<String>) -> Self {
        Self::UnknownAddress {
            address: address.into(),
        }
    }

    #[must_use]
    pub fn unknown_reply(message_id: impl Into<String>) -> Self {
        Self::UnknownReply {
            message_id: message_id.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
