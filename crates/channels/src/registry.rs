//! Process-wide directory of channels, keyed by id.

use std::{future::Future, sync::Arc};

use {
    dashmap::{DashMap, mapref::entry::Entry},
    futures::{TryStreamExt, future::join_all},
    serde_json::{Map, Value},
    switchboard_config::RestartPolicy,
    tracing::{debug, info},
    uuid::Uuid,
};

use crate::{
    channel::{Channel, ChannelGuard, ChannelPatch, Lifecycle},
    error::{Error, ErrorKind, Result},
    message::OutboundMessage,
    store::{ChannelRecord, ChannelStore},
    supervisor::WorkerSupervisor,
};

/// Input for [`ChannelRegistry::create`].
#[derive(Debug, Clone, Default)]
pub struct NewChannel {
    /// Caller-chosen id. Generated when absent.
    pub id: Option<String>,
    pub channel_type: String,
    pub config: Value,
    pub metadata: Map<String, Value>,
}

/// Owns every [`Channel`] entity for the lifetime of the process.
///
/// Lifecycle operations run on detached tasks, so a caller that goes away
/// mid-request never leaves a channel half started or half destroyed.
pub struct ChannelRegistry {
    store: Arc<dyn ChannelStore>,
    supervisor: Arc<WorkerSupervisor>,
    policy: RestartPolicy,
    channels: DashMap<String, Arc<Channel>>,
}

/// Run `fut` on its own task and wait for it.
async fn detached<T, F>(fut: F) -> Result<T>
where
    F: Future<Output = Result<T>> + Send + 'static,
    T: Send + 'static,
{
    tokio::spawn(fut).await?
}

impl ChannelRegistry {
    /// Build the registry from every stored record, restarting the workers of
    /// channels whose persisted state is `running`.
    ///
    /// Restarts run concurrently. A failed restart is logged and leaves the
    /// channel stopped with its intent unchanged.
    pub async fn load(
        store: Arc<dyn ChannelStore>,
        supervisor: Arc<WorkerSupervisor>,
        policy: RestartPolicy,
    ) -> Result<Arc<Self>> {
        let registry = Arc::new(Self {
            store,
            supervisor,
            policy,
            channels: DashMap::new(),
        });

        let ids: Vec<String> = registry.store.list().try_collect().await?;
        let mut pending = Vec::with_capacity(ids.len());
        for id in ids {
            let record = match registry.store.get(&id).await {
                Ok(record) => record,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e),
            };
            let (channel, guard) = Channel::reserve(
                &id,
                Arc::clone(&registry.store),
                Arc::clone(&registry.supervisor),
            )
            .await;
            registry.channels.insert(id, Arc::clone(&channel));
            pending.push((channel, guard, record));
        }

        let loaded = pending.len();
        join_all(
            pending
                .into_iter()
                .map(|(channel, mut guard, record)| async move {
                    channel.restore_locked(&mut guard, record).await;
                }),
        )
        .await;

        info!(
            channels = loaded,
            running = registry.supervisor.running_count(),
            "channel registry loaded"
        );
        Ok(registry)
    }

    pub fn supervisor(&self) -> &Arc<WorkerSupervisor> {
        &self.supervisor
    }

    pub fn restart_policy(&self) -> RestartPolicy {
        self.policy
    }

    pub fn get_or_not_found(&self, id: &str) -> Result<Arc<Channel>> {
        self.channels
            .get(id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| Error::channel_not_found(id))
    }

    /// Drop `channel` from the directory if it is still the entity for its id.
    pub fn remove(&self, channel: &Arc<Channel>) -> bool {
        self.channels
            .remove_if(channel.id(), |_, current| Arc::ptr_eq(current, channel))
            .is_some()
    }

    /// Every stored channel id.
    pub async fn list_ids(&self) -> Result<Vec<String>> {
        self.store.list().try_collect().await
    }

    // ── Lifecycle ───────────────────────────────────────────────────────────

    pub async fn create(self: &Arc<Self>, new: NewChannel) -> Result<ChannelRecord> {
        let this = Arc::clone(self);
        detached(async move { this.create_new(new).await }).await
    }

    /// Persist and start a new channel.
    pub async fn create_new(&self, new: NewChannel) -> Result<ChannelRecord> {
        if !self.supervisor.supports(&new.channel_type) {
            return Err(Error::api_usage(format!(
                "Unknown channel type '{}'",
                new.channel_type
            )));
        }

        let (channel, mut guard) = match new.id {
            Some(id) => self.claim(&id).await?.ok_or_else(|| {
                Error::api_usage(format!("A channel with id '{id}' already exists"))
            })?,
            None => loop {
                let id = Uuid::new_v4().to_string();
                if let Some(claimed) = self.claim(&id).await? {
                    break claimed;
                }
                debug!(channel_id = %id, "generated channel id collided, retrying");
            },
        };

        let record = ChannelRecord::new(
            channel.id(),
            new.channel_type,
            new.config,
            new.metadata,
        );
        let result = channel.create_locked(&mut guard, record).await;
        if guard.lifecycle() == Lifecycle::Uncreated {
            // Nothing was persisted; free the id again.
            self.remove(&channel);
        }
        result
    }

    /// Reserve `id` unless a stored or in-flight channel already holds it.
    async fn claim(&self, id: &str) -> Result<Option<(Arc<Channel>, ChannelGuard)>> {
        if self.channels.contains_key(id) || self.store.exists(id).await? {
            return Ok(None);
        }
        let (channel, guard) =
            Channel::reserve(id, Arc::clone(&self.store), Arc::clone(&self.supervisor)).await;
        match self.channels.entry(id.to_string()) {
            Entry::Occupied(_) => Ok(None),
            Entry::Vacant(slot) => {
                slot.insert(Arc::clone(&channel));
                Ok(Some((channel, guard)))
            },
        }
    }

    pub async fn get(&self, id: &str) -> Result<ChannelRecord> {
        self.get_or_not_found(id)?.get().await
    }

    pub async fn modify(&self, id: &str, patch: ChannelPatch) -> Result<ChannelRecord> {
        let channel = self.get_or_not_found(id)?;
        let policy = self.policy;
        detached(async move { channel.modify(patch, policy).await }).await
    }

    pub async fn start(&self, id: &str) -> Result<()> {
        let channel = self.get_or_not_found(id)?;
        detached(async move { channel.start().await }).await
    }

    pub async fn stop(&self, id: &str) -> Result<()> {
        let channel = self.get_or_not_found(id)?;
        detached(async move { channel.stop().await }).await
    }

    pub async fn destroy(self: &Arc<Self>, id: &str) -> Result<()> {
        let channel = self.get_or_not_found(id)?;
        let this = Arc::clone(self);
        detached(async move {
            channel.destroy().await?;
            this.remove(&channel);
            Ok(())
        })
        .await
    }

    // ── Messages ────────────────────────────────────────────────────────────

    /// Send through the channel's worker. The destination is validated before
    /// the channel is looked up.
    pub async fn send_message(&self, id: &str, message: &OutboundMessage) -> Result<Value> {
        message.destination()?;
        self.get_or_not_found(id)?.send_message(message).await
    }

    pub async fn message_status(&self, id: &str, message_id: &str) -> Result<Value> {
        self.get_or_not_found(id)?.message_status(message_id).await
    }

    /// Stop every worker. Persisted intent is kept for the next boot.
    pub async fn shutdown(&self) {
        let running = self.supervisor.running_count();
        self.supervisor.stop_all().await;
        info!(stopped = running, "channel registry shut down");
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use std::time::Duration;

    use {
        super::*,
        crate::{
            store::ChannelState, store_memory::InMemoryChannelStore, test_support::StubFactory,
            worker::WorkerFactories,
        },
        async_trait::async_trait,
        futures::stream::BoxStream,
        serde_json::json,
    };

    struct Fixture {
        store: Arc<InMemoryChannelStore>,
        factory: Arc<StubFactory>,
        registry: Arc<ChannelRegistry>,
    }

    fn supervisor(factory: &Arc<StubFactory>) -> Arc<WorkerSupervisor> {
        Arc::new(WorkerSupervisor::new(
            WorkerFactories::new().with(factory.clone()),
        ))
    }

    async fn fixture_with(store: Arc<InMemoryChannelStore>) -> Fixture {
        let factory = StubFactory::new("stub");
        let registry = ChannelRegistry::load(
            store.clone(),
            supervisor(&factory),
            RestartPolicy::OnConfigChange,
        )
        .await
        .unwrap();
        Fixture {
            store,
            factory,
            registry,
        }
    }

    async fn fixture() -> Fixture {
        fixture_with(Arc::new(InMemoryChannelStore::new())).await
    }

    fn new_channel(id: Option<&str>, config: Value) -> NewChannel {
        let mut metadata = Map::new();
        metadata.insert("mo_url".into(), json!("http://foo.bar"));
        NewChannel {
            id: id.map(Into::into),
            channel_type: "stub".into(),
            config,
            metadata,
        }
    }

    #[tokio::test]
    async fn create_generates_id_and_starts_worker() {
        let fx = fixture().await;
        let record = fx.registry.create(new_channel(None, json!({}))).await.unwrap();

        assert!(Uuid::parse_str(&record.id).is_ok());
        assert_eq!(record.channel_type, "stub");
        assert!(fx.registry.supervisor().is_running(&record.id));
        assert_eq!(fx.factory.live_for(&record.id), 1);
        assert_eq!(fx.registry.list_ids().await.unwrap(), vec![record.id]);
    }

    #[tokio::test]
    async fn create_rejects_existing_id() {
        let fx = fixture().await;
        fx.registry
            .create(new_channel(Some("c1"), json!({})))
            .await
            .unwrap();
        let err = fx
            .registry
            .create(new_channel(Some("c1"), json!({})))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ApiUsage);
        assert_eq!(fx.factory.starts(), 1);
    }

    #[tokio::test]
    async fn create_rejects_unknown_type_before_persisting() {
        let fx = fixture().await;
        let mut new = new_channel(Some("c1"), json!({}));
        new.channel_type = "carrier-pigeon".into();

        let err = fx.registry.create(new).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ApiUsage);
        assert!(!fx.store.exists("c1").await.unwrap());
        assert!(fx.registry.get_or_not_found("c1").is_err());
    }

    #[tokio::test]
    async fn failed_start_keeps_channel_addressable() {
        let fx = fixture().await;
        let err = fx
            .registry
            .create(new_channel(Some("c1"), json!({"fail": true})))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::WorkerStart);

        let record = fx.registry.get("c1").await.unwrap();
        assert_eq!(record.status, json!({}));
        assert!(!fx.registry.supervisor().is_running("c1"));
    }

    #[tokio::test]
    async fn destroy_then_recreate_yields_fresh_worker() {
        let fx = fixture().await;
        fx.registry
            .create(new_channel(Some("c1"), json!({})))
            .await
            .unwrap();
        fx.registry.destroy("c1").await.unwrap();

        assert_eq!(
            fx.registry.get("c1").await.unwrap_err().kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            fx.registry.destroy("c1").await.unwrap_err().kind(),
            ErrorKind::NotFound
        );

        fx.registry
            .create(new_channel(Some("c1"), json!({})))
            .await
            .unwrap();
        assert_eq!(fx.factory.starts(), 2);
        assert_eq!(fx.factory.live_for("c1"), 1);
    }

    #[tokio::test]
    async fn stop_twice_then_start() {
        let fx = fixture().await;
        fx.registry
            .create(new_channel(Some("c1"), json!({})))
            .await
            .unwrap();

        fx.registry.stop("c1").await.unwrap();
        fx.registry.stop("c1").await.unwrap();
        assert!(!fx.registry.supervisor().is_running("c1"));

        fx.registry.start("c1").await.unwrap();
        fx.registry.start("c1").await.unwrap();
        assert_eq!(fx.factory.live_for("c1"), 1);
    }

    #[tokio::test]
    async fn modify_then_get_reflects_merge() {
        let fx = fixture().await;
        fx.registry
            .create(new_channel(Some("c1"), json!({"a": 1, "b": 2})))
            .await
            .unwrap();

        fx.registry
            .modify("c1", ChannelPatch {
                config: Some(json!({"b": 3})),
                ..Default::default()
            })
            .await
            .unwrap();

        let record = fx.registry.get("c1").await.unwrap();
        assert_eq!(record.config, json!({"a": 1, "b": 3}));
        assert_eq!(record.metadata_str("mo_url"), Some("http://foo.bar"));
        assert_eq!(record.channel_type, "stub");
    }

    #[tokio::test]
    async fn message_destination_checked_before_lookup() {
        let fx = fixture().await;
        let message = OutboundMessage {
            to: Some("+1".into()),
            reply_to: Some("abc".into()),
            ..Default::default()
        };
        let err = fx
            .registry
            .send_message("missing", &message)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ApiUsage);

        let message = OutboundMessage {
            to: Some("+1".into()),
            ..Default::default()
        };
        let err = fx
            .registry
            .send_message("missing", &message)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn distinct_ids_are_independent() {
        let fx = fixture().await;
        let mut tasks = Vec::new();
        for i in 0..10 {
            let registry = Arc::clone(&fx.registry);
            tasks.push(tokio::spawn(async move {
                registry
                    .create(new_channel(Some(&format!("c{i}")), json!({"delay_ms": 10})))
                    .await
            }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(fx.registry.supervisor().running_count(), 10);
        assert_eq!(fx.registry.list_ids().await.unwrap().len(), 10);
    }

    #[tokio::test]
    async fn create_completes_when_caller_goes_away() {
        let fx = fixture().await;
        let abandoned = tokio::time::timeout(
            Duration::from_millis(5),
            fx.registry
                .create(new_channel(Some("c1"), json!({"delay_ms": 50}))),
        )
        .await;
        assert!(abandoned.is_err());

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(fx.registry.supervisor().is_running("c1"));
        assert_eq!(
            fx.store.get("c1").await.unwrap().state,
            ChannelState::Running
        );
    }

    #[tokio::test]
    async fn load_restarts_running_channels() {
        let store = Arc::new(InMemoryChannelStore::new());
        let mut running = ChannelRecord::new("run", "stub", json!({}), Map::new());
        running.state = ChannelState::Running;
        store.put(&running).await.unwrap();
        store
            .put(&ChannelRecord::new("idle", "stub", json!({}), Map::new()))
            .await
            .unwrap();
        let mut broken = ChannelRecord::new("broken", "stub", json!({"fail": true}), Map::new());
        broken.state = ChannelState::Running;
        store.put(&broken).await.unwrap();

        let fx = fixture_with(store).await;

        assert!(fx.registry.supervisor().is_running("run"));
        assert!(!fx.registry.supervisor().is_running("idle"));
        assert!(!fx.registry.supervisor().is_running("broken"));
        // Intent survives a failed restart.
        assert_eq!(
            fx.store.get("broken").await.unwrap().state,
            ChannelState::Running
        );
        assert!(fx.registry.get("idle").await.is_ok());
    }

    #[tokio::test]
    async fn shutdown_keeps_intent() {
        let fx = fixture().await;
        fx.registry
            .create(new_channel(Some("c1"), json!({})))
            .await
            .unwrap();

        fx.registry.shutdown().await;
        assert_eq!(fx.factory.live(), 0);
        assert_eq!(
            fx.store.get("c1").await.unwrap().state,
            ChannelState::Running
        );
    }

    struct ReadOnlyStore;

    #[async_trait]
    impl ChannelStore for ReadOnlyStore {
        async fn put(&self, _record: &ChannelRecord) -> Result<()> {
            Err(Error::storage("write channel", "read-only store"))
        }

        async fn get(&self, id: &str) -> Result<ChannelRecord> {
            Err(Error::channel_not_found(id))
        }

        async fn delete(&self, _id: &str) -> Result<()> {
            Ok(())
        }

        fn list(&self) -> BoxStream<'_, Result<String>> {
            Box::pin(futures::stream::empty())
        }
    }

    #[tokio::test]
    async fn store_failure_on_create_frees_the_id() {
        let factory = StubFactory::new("stub");
        let registry = ChannelRegistry::load(
            Arc::new(ReadOnlyStore),
            supervisor(&factory),
            RestartPolicy::OnConfigChange,
        )
        .await
        .unwrap();

        let err = registry
            .create(new_channel(Some("c1"), json!({})))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Storage);
        assert!(registry.get_or_not_found("c1").is_err());
        assert_eq!(factory.starts(), 0);
    }
}
