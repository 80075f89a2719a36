//! Stub worker factory shared by the unit tests in this crate.
//!
//! Behaviour is driven by the channel config:
//! - `"fail": true` makes start fail
//! - `"hang": true` makes start never complete
//! - `"delay_ms": n` delays start by `n` milliseconds
//! - `"stuck": true` makes stop never complete

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use {
    async_trait::async_trait,
    serde_json::{Map, Value, json},
};

use crate::{
    message::OutboundMessage,
    worker::{SendError, Worker, WorkerContext, WorkerFactory},
};

#[derive(Default)]
struct Counts {
    live: HashMap<String, usize>,
    peak: HashMap<String, usize>,
    /// Metadata each channel's worker currently sees.
    metadata: HashMap<String, Map<String, Value>>,
}

pub struct StubFactory {
    channel_type: &'static str,
    starts: AtomicUsize,
    counts: Arc<Mutex<Counts>>,
}

impl StubFactory {
    pub fn new(channel_type: &'static str) -> Arc<Self> {
        Arc::new(Self {
            channel_type,
            starts: AtomicUsize::new(0),
            counts: Arc::new(Mutex::new(Counts::default())),
        })
    }

    /// Workers currently alive across all channels.
    pub fn live(&self) -> usize {
        let counts = self.counts.lock().unwrap_or_else(|e| e.into_inner());
        counts.live.values().sum()
    }

    pub fn live_for(&self, channel_id: &str) -> usize {
        let counts = self.counts.lock().unwrap_or_else(|e| e.into_inner());
        counts.live.get(channel_id).copied().unwrap_or(0)
    }

    /// Highest number of simultaneously alive workers seen for one channel.
    pub fn peak_for(&self, channel_id: &str) -> usize {
        let counts = self.counts.lock().unwrap_or_else(|e| e.into_inner());
        counts.peak.get(channel_id).copied().unwrap_or(0)
    }

    pub fn metadata_for(&self, channel_id: &str) -> Option<Map<String, Value>> {
        let counts = self.counts.lock().unwrap_or_else(|e| e.into_inner());
        counts.metadata.get(channel_id).cloned()
    }

    /// Successful starts so far.
    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WorkerFactory for StubFactory {
    fn channel_type(&self) -> &str {
        self.channel_type
    }

    async fn start(&self, ctx: WorkerContext) -> anyhow::Result<Arc<dyn Worker>> {
        if let Some(ms) = ctx.config.get("delay_ms").and_then(Value::as_u64) {
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }
        if ctx.config.get("hang").and_then(Value::as_bool) == Some(true) {
            std::future::pending::<()>().await;
        }
        if ctx.config.get("fail").and_then(Value::as_bool) == Some(true) {
            anyhow::bail!("stub configured to fail");
        }

        {
            let mut counts = self.counts.lock().unwrap_or_else(|e| e.into_inner());
            let live = counts.live.entry(ctx.channel_id.clone()).or_default();
            *live += 1;
            let live = *live;
            let peak = counts.peak.entry(ctx.channel_id.clone()).or_default();
            *peak = (*peak).max(live);
            counts
                .metadata
                .insert(ctx.channel_id.clone(), ctx.metadata.clone());
        }
        self.starts.fetch_add(1, Ordering::SeqCst);

        Ok(Arc::new(StubWorker {
            channel_id: ctx.channel_id,
            config: ctx.config,
            counts: Arc::clone(&self.counts),
            messages: Mutex::new(HashMap::new()),
        }))
    }
}

struct StubWorker {
    channel_id: String,
    config: Value,
    counts: Arc<Mutex<Counts>>,
    messages: Mutex<HashMap<String, Value>>,
}

#[async_trait]
impl Worker for StubWorker {
    async fn stop(&self) -> anyhow::Result<()> {
        if self.config.get("stuck").and_then(Value::as_bool) == Some(true) {
            std::future::pending::<()>().await;
        }
        let mut counts = self.counts.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(live) = counts.live.get_mut(&self.channel_id) {
            *live = live.saturating_sub(1);
        }
        Ok(())
    }

    async fn status(&self) -> Value {
        json!({ "config": self.config })
    }

    async fn send_message(&self, message: &OutboundMessage) -> Result<Value, SendError> {
        let message_id = uuid::Uuid::new_v4().to_string();
        let mut doc = serde_json::to_value(message).map_err(anyhow::Error::from)?;
        doc["message_id"] = json!(message_id);
        let mut messages = self.messages.lock().unwrap_or_else(|e| e.into_inner());
        messages.insert(message_id, doc.clone());
        Ok(doc)
    }

    async fn message_status(&self, message_id: &str) -> anyhow::Result<Option<Value>> {
        let messages = self.messages.lock().unwrap_or_else(|e| e.into_inner());
        Ok(messages
            .get(message_id)
            .map(|doc| json!({ "message_id": message_id, "status": "delivered", "message": doc })))
    }

    fn update_metadata(&self, metadata: &Map<String, Value>) {
        let mut counts = self.counts.lock().unwrap_or_else(|e| e.into_inner());
        counts
            .metadata
            .insert(self.channel_id.clone(), metadata.clone());
    }
}
