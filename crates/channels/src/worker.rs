//! Transport worker contract.
//!
//! Every channel type (telnet, SMPP, ...) provides a [`WorkerFactory`]
//! registered under its type tag. The factory starts a [`Worker`] for one
//! channel; the worker does the protocol I/O and is driven only through
//! this interface.

use std::{collections::BTreeMap, sync::Arc};

use {
    async_trait::async_trait,
    serde::Serialize,
    serde_json::{Map, Value},
    tokio::sync::broadcast,
};

use crate::message::OutboundMessage;

/// Lifecycle and fault notifications published by the supervisor.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WorkerEvent {
    Started {
        channel_id: String,
        channel_type: String,
    },
    Stopped {
        channel_id: String,
    },
    /// A running worker hit an error it could not handle itself.
    Fault {
        channel_id: String,
        message: String,
    },
}

/// Handle a worker uses to report runtime faults.
#[derive(Debug, Clone)]
pub struct FaultReporter {
    channel_id: String,
    events: broadcast::Sender<WorkerEvent>,
}

impl FaultReporter {
    pub fn new(channel_id: String, events: broadcast::Sender<WorkerEvent>) -> Self {
        Self { channel_id, events }
    }

    /// Publish a fault. Dropped silently when nobody is subscribed.
    pub fn report(&self, message: impl std::fmt::Display) {
        self.events
            .send(WorkerEvent::Fault {
                channel_id: self.channel_id.clone(),
                message: message.to_string(),
            })
            .ok();
    }
}

/// Everything a factory needs to start a worker for one channel.
#[derive(Debug, Clone)]
pub struct WorkerContext {
    pub channel_id: String,
    pub config: Value,
    /// Channel metadata (`mo_url`, limits, ...), read-only for the worker.
    pub metadata: Map<String, Value>,
    pub faults: FaultReporter,
}

/// Why a worker refused an outbound message.
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    /// The message is invalid for this transport (unknown address, ...).
    #[error("{0}")]
    Rejected(String),
    #[error(transparent)]
    Failed(#[from] anyhow::Error),
}

/// A running transport instance.
#[async_trait]
pub trait Worker: Send + Sync {
    /// Shut the worker down, releasing every resource it holds.
    async fn stop(&self) -> anyhow::Result<()>;

    /// Current status snapshot. Free-form, transport specific.
    async fn status(&self) -> Value;

    /// Hand an outbound message to the transport.
    ///
    /// Returns the message document including its assigned `message_id`.
    async fn send_message(&self, _message: &OutboundMessage) -> Result<Value, SendError> {
        Err(SendError::Rejected(
            "this channel type does not support sending messages".into(),
        ))
    }

    /// Delivery status for a message previously sent through this worker.
    async fn message_status(&self, _message_id: &str) -> anyhow::Result<Option<Value>> {
        Ok(None)
    }

    /// Channel metadata changed without a restart. Workers that read
    /// metadata (`mo_url`, ...) must pick up the new values.
    fn update_metadata(&self, _metadata: &Map<String, Value>) {}
}

/// Constructs workers for one channel type.
#[async_trait]
pub trait WorkerFactory: Send + Sync {
    /// Type tag this factory is registered under (e.g. "telnet").
    fn channel_type(&self) -> &str;

    /// Start a worker. Must only return once the worker is running.
    async fn start(&self, ctx: WorkerContext) -> anyhow::Result<Arc<dyn Worker>>;
}

/// Worker factories keyed by channel type, fixed at process start.
#[derive(Default, Clone)]
pub struct WorkerFactories {
    factories: BTreeMap<String, Arc<dyn WorkerFactory>>,
}

impl WorkerFactories {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory, replacing any previous one for the same type.
    pub fn register(&mut self, factory: Arc<dyn WorkerFactory>) {
        self.factories
            .insert(factory.channel_type().to_string(), factory);
    }

    #[must_use]
    pub fn with(mut self, factory: Arc<dyn WorkerFactory>) -> Self {
        self.register(factory);
        self
    }

    pub fn get(&self, channel_type: &str) -> Option<&Arc<dyn WorkerFactory>> {
        self.factories.get(channel_type)
    }

    pub fn contains(&self, channel_type: &str) -> bool {
        self.factories.contains_key(channel_type)
    }

    pub fn types(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    struct NullFactory(&'static str);

    #[async_trait]
    impl WorkerFactory for NullFactory {
        fn channel_type(&self) -> &str {
            self.0
        }

        async fn start(&self, _ctx: WorkerContext) -> anyhow::Result<Arc<dyn Worker>> {
            anyhow::bail!("null factory never starts")
        }
    }

    #[test]
    fn registry_keys_by_type() {
        let factories = WorkerFactories::new()
            .with(Arc::new(NullFactory("telnet")))
            .with(Arc::new(NullFactory("smpp")));
        assert!(factories.contains("telnet"));
        assert!(!factories.contains("xmpp"));
        assert_eq!(factories.types(), vec!["smpp", "telnet"]);
    }

    #[test]
    fn fault_reporter_publishes() {
        let (tx, mut rx) = broadcast::channel(4);
        let reporter = FaultReporter::new("c1".into(), tx);
        reporter.report("socket closed");
        assert_eq!(
            rx.try_recv().unwrap(),
            WorkerEvent::Fault {
                channel_id: "c1".into(),
                message: "socket closed".into(),
            }
        );
    }

    #[test]
    fn fault_reporter_without_subscribers() {
        let (tx, rx) = broadcast::channel(4);
        drop(rx);
        FaultReporter::new("c1".into(), tx).report("ignored");
    }
}
