//! Channel entity: one persisted record plus at most one supervised worker.
//!
//! ```text
//! Uncreated ──create──▶ Stopped ◀──stop── Running
//!                          │ ──start──▶     │
//!                          └────destroy─────┴──▶ Destroyed
//! ```
//!
//! Every operation holds the channel's async mutex for its whole duration,
//! so start/stop/store writes for one id never interleave.

use std::sync::Arc;

use {
    serde_json::{Map, Value},
    switchboard_config::RestartPolicy,
    tokio::sync::{Mutex, OwnedMutexGuard},
    tracing::{info, warn},
};

use crate::{
    error::{Error, Result},
    message::OutboundMessage,
    store::{ChannelRecord, ChannelState, ChannelStore},
    supervisor::WorkerSupervisor,
    worker::SendError,
};

/// Runtime lifecycle of a channel entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    /// Reserved in the registry, nothing persisted yet.
    Uncreated,
    /// Record persisted, no worker.
    Stopped,
    /// Record persisted and a worker is live.
    Running,
    /// Record removed. Terminal.
    Destroyed,
}

/// Fields supplied by a modify request. Absent fields stay unchanged.
#[derive(Debug, Clone, Default)]
pub struct ChannelPatch {
    pub channel_type: Option<String>,
    /// Merge patch applied to the stored `config`.
    pub config: Option<Value>,
    /// Merge patch applied to the metadata; `null` values remove keys.
    pub metadata: Map<String, Value>,
}

pub(crate) struct ChannelInner {
    lifecycle: Lifecycle,
    record: Option<ChannelRecord>,
}

impl ChannelInner {
    pub(crate) fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    fn record(&mut self, id: &str) -> Result<&mut ChannelRecord> {
        match (self.lifecycle, self.record.as_mut()) {
            (Lifecycle::Stopped | Lifecycle::Running, Some(record)) => Ok(record),
            _ => Err(Error::channel_not_found(id)),
        }
    }
}

pub(crate) type ChannelGuard = OwnedMutexGuard<ChannelInner>;

/// A channel and its serialized lifecycle.
pub struct Channel {
    id: String,
    inner: Arc<Mutex<ChannelInner>>,
    store: Arc<dyn ChannelStore>,
    supervisor: Arc<WorkerSupervisor>,
}

impl Channel {
    /// Build an uncreated entity together with the guard over its state.
    ///
    /// The guard is taken before the entity is shared, so no other task can
    /// observe the channel until the caller releases it.
    pub(crate) async fn reserve(
        id: impl Into<String>,
        store: Arc<dyn ChannelStore>,
        supervisor: Arc<WorkerSupervisor>,
    ) -> (Arc<Self>, ChannelGuard) {
        let inner = Arc::new(Mutex::new(ChannelInner {
            lifecycle: Lifecycle::Uncreated,
            record: None,
        }));
        // Fresh mutex, resolves immediately.
        let guard = Arc::clone(&inner).lock_owned().await;
        let channel = Arc::new(Self {
            id: id.into(),
            inner,
            store,
            supervisor,
        });
        (channel, guard)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub async fn lifecycle(&self) -> Lifecycle {
        self.inner.lock().await.lifecycle
    }

    // ── Locked transitions ──────────────────────────────────────────────────

    /// Persist `record` and start its worker.
    ///
    /// The record is persisted with `running` intent before the first start,
    /// so a start failure leaves a stopped channel that reconciliation and
    /// restarting modifies retry. The failure is returned to the caller.
    pub(crate) async fn create_locked(
        &self,
        inner: &mut ChannelInner,
        mut record: ChannelRecord,
    ) -> Result<ChannelRecord> {
        record.state = ChannelState::Running;
        self.store.put(&record).await?;
        info!(channel_id = %self.id, channel_type = %record.channel_type, "channel created");
        inner.record = Some(record);
        inner.lifecycle = Lifecycle::Stopped;

        self.start_locked(inner).await?;
        Ok(inner.record(&self.id)?.clone())
    }

    /// Adopt a record loaded from the store, restarting its worker if it was
    /// running before.
    pub(crate) async fn restore_locked(&self, inner: &mut ChannelInner, record: ChannelRecord) {
        let was_running = record.state == ChannelState::Running;
        inner.record = Some(record);
        inner.lifecycle = Lifecycle::Stopped;
        if !was_running {
            return;
        }

        match self.start_worker(inner).await {
            Ok(()) => info!(channel_id = %self.id, "channel worker restored"),
            // Intent stays `running` so the next boot retries.
            Err(e) => warn!(channel_id = %self.id, error = %e, "failed to restore channel worker"),
        }
    }

    async fn start_worker(&self, inner: &mut ChannelInner) -> Result<()> {
        let record = inner.record(&self.id)?;
        self.supervisor
            .start(
                &self.id,
                &record.channel_type,
                &record.config,
                &record.metadata,
            )
            .await?;
        inner.lifecycle = Lifecycle::Running;
        Ok(())
    }

    async fn start_locked(&self, inner: &mut ChannelInner) -> Result<()> {
        if inner.lifecycle == Lifecycle::Running {
            return Ok(());
        }
        self.start_worker(inner).await?;

        let record = inner.record(&self.id)?;
        record.state = ChannelState::Running;
        record.touch();
        if let Err(e) = self.store.put(record).await {
            // Intent could not be recorded; do not leave an untracked worker.
            record.state = ChannelState::Stopped;
            if let Err(stop_err) = self.supervisor.stop(&self.id).await {
                warn!(channel_id = %self.id, error = %stop_err, "failed to stop worker after store error");
            } else {
                inner.lifecycle = Lifecycle::Stopped;
            }
            return Err(e);
        }
        Ok(())
    }

    /// Stop the live worker and keep its last status. Persisted intent is
    /// left alone.
    async fn stop_worker(&self, inner: &mut ChannelInner) -> Result<()> {
        if inner.lifecycle == Lifecycle::Running {
            let status = self.supervisor.status(&self.id).await;
            self.supervisor.stop(&self.id).await?;
            inner.lifecycle = Lifecycle::Stopped;
            inner.record(&self.id)?.status = status;
        }
        Ok(())
    }

    async fn stop_locked(&self, inner: &mut ChannelInner) -> Result<()> {
        let was_running = inner.lifecycle == Lifecycle::Running;
        self.stop_worker(inner).await?;

        let record = inner.record(&self.id)?;
        if was_running || record.state == ChannelState::Running {
            record.state = ChannelState::Stopped;
            record.touch();
            self.store.put(record).await?;
            info!(channel_id = %self.id, "channel stopped");
        }
        Ok(())
    }

    // ── Public operations ───────────────────────────────────────────────────

    /// The record with the live worker status, or the last known status when
    /// stopped.
    pub async fn get(&self) -> Result<ChannelRecord> {
        let (mut snapshot, running) = {
            let mut inner = self.inner.lock().await;
            let running = inner.lifecycle == Lifecycle::Running;
            (inner.record(&self.id)?.clone(), running)
        };
        if running {
            snapshot.status = self.supervisor.status(&self.id).await;
        }
        Ok(snapshot)
    }

    /// Start the worker if it is not running.
    pub async fn start(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.record(&self.id)?;
        self.start_locked(&mut inner).await
    }

    /// Stop the worker if it is running. Idempotent.
    pub async fn stop(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.record(&self.id)?;
        self.stop_locked(&mut inner).await
    }

    /// Merge `patch` into the record, persist it, and restart the worker when
    /// `policy` asks for it.
    ///
    /// Only channels that are running, or meant to be running, are restarted.
    /// A channel stopped through [`Channel::stop`] stays stopped.
    pub async fn modify(&self, patch: ChannelPatch, policy: RestartPolicy) -> Result<ChannelRecord> {
        let mut inner = self.inner.lock().await;
        let was_running = inner.lifecycle == Lifecycle::Running;
        let record = inner.record(&self.id)?;

        if let Some(channel_type) = patch.channel_type
            && channel_type != record.channel_type
        {
            return Err(Error::api_usage("The type of a channel cannot be changed"));
        }

        let old_config = record.config.clone();
        if let Some(config_patch) = &patch.config {
            merge_patch(&mut record.config, config_patch);
        }
        for (key, value) in patch.metadata {
            if value.is_null() {
                record.metadata.remove(&key);
            } else {
                merge_patch(record.metadata.entry(key).or_insert(Value::Null), &value);
            }
        }
        record.touch();
        self.store.put(record).await?;
        let wants_worker = was_running || record.state == ChannelState::Running;
        let restart = wants_worker && policy.requires_restart(&old_config, &record.config);
        info!(channel_id = %self.id, restart, "channel modified");

        if restart {
            self.stop_worker(&mut inner).await?;
            self.start_locked(&mut inner).await?;
        } else if let Some(worker) = self.supervisor.worker(&self.id) {
            worker.update_metadata(&inner.record(&self.id)?.metadata);
        }

        let running = inner.lifecycle == Lifecycle::Running;
        let mut snapshot = inner.record(&self.id)?.clone();
        drop(inner);
        if running {
            snapshot.status = self.supervisor.status(&self.id).await;
        }
        Ok(snapshot)
    }

    /// Stop the worker, then delete the record.
    pub async fn destroy(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.record(&self.id)?;

        self.supervisor.stop(&self.id).await?;
        if inner.lifecycle == Lifecycle::Running {
            inner.lifecycle = Lifecycle::Stopped;
        }
        self.store.delete(&self.id).await?;

        inner.lifecycle = Lifecycle::Destroyed;
        inner.record = None;
        info!(channel_id = %self.id, "channel destroyed");
        Ok(())
    }

    /// Forward an outbound message to the live worker.
    pub async fn send_message(&self, message: &OutboundMessage) -> Result<Value> {
        message.destination()?;
        {
            let mut inner = self.inner.lock().await;
            let record = inner.record(&self.id)?;
            message.check_character_limit(record.metadata_u64("character_limit"))?;
        }

        let worker = self
            .supervisor
            .worker(&self.id)
            .ok_or_else(|| Error::not_running(&self.id))?;
        worker.send_message(message).await.map_err(|e| match e {
            SendError::Rejected(reason) => Error::api_usage(reason),
            SendError::Failed(source) => Error::worker(&self.id, source),
        })
    }

    /// Delivery status of a message sent through this channel.
    pub async fn message_status(&self, message_id: &str) -> Result<Value> {
        self.inner.lock().await.record(&self.id)?;

        let worker = self
            .supervisor
            .worker(&self.id)
            .ok_or_else(|| Error::not_running(&self.id))?;
        worker
            .message_status(message_id)
            .await
            .map_err(|e| Error::worker(&self.id, e))?
            .ok_or_else(|| Error::message_not_found(&self.id, message_id))
    }
}

/// Apply an RFC 7386 JSON merge patch to `target`.
pub fn merge_patch(target: &mut Value, patch: &Value) {
    let Value::Object(patch) = patch else {
        *target = patch.clone();
        return;
    };
    if !target.is_object() {
        *target = Value::Object(Map::new());
    }
    if let Value::Object(target) = target {
        for (key, value) in patch {
            if value.is_null() {
                target.remove(key);
            } else {
                merge_patch(target.entry(key.clone()).or_insert(Value::Null), value);
            }
        }
    }
}
