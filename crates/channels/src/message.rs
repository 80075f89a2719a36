//! Outbound message payloads and the channel-level rules they must satisfy.

use {
    serde::{Deserialize, Serialize},
    serde_json::{Map, Value},
};

use crate::error::{Error, Result};

/// A message submitted through `POST /channels/{id}/messages`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutboundMessage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    /// Id of an inbound message this one answers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Where delivery events for this message should be posted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<u64>,
    /// Transport-specific extras, passed through to the worker untouched.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel_data: Option<Map<String, Value>>,
}

/// Where a message is headed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Destination<'a> {
    Address(&'a str),
    Reply(&'a str),
}

impl OutboundMessage {
    /// Exactly one of `to` and `reply_to` must be set.
    pub fn destination(&self) -> Result<Destination<'_>> {
        match (self.to.as_deref(), self.reply_to.as_deref()) {
            (Some(_), Some(_)) => Err(Error::api_usage(
                "Only one of \"to\" and \"reply_to\" may be specified",
            )),
            (None, None) => Err(Error::api_usage(
                "Either \"to\" or \"reply_to\" must be specified",
            )),
            (Some(to), None) => Ok(Destination::Address(to)),
            (None, Some(reply_to)) => Ok(Destination::Reply(reply_to)),
        }
    }

    /// Reject content longer than the channel's `character_limit`.
    pub fn check_character_limit(&self, limit: Option<u64>) -> Result<()> {
        let (Some(limit), Some(content)) = (limit, self.content.as_deref()) else {
            return Ok(());
        };
        let len = content.chars().count() as u64;
        if len > limit {
            return Err(Error::api_usage(format!(
                "Message content is {len} characters, exceeding the channel character limit of {limit}"
            )));
        }
        Ok(())
    }
}
