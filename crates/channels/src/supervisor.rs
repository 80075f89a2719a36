//! Worker supervision: at most one live worker per channel id.

use std::{sync::Arc, time::Duration};

use {
    dashmap::{DashMap, mapref::entry::Entry},
    serde_json::{Map, Value},
    switchboard_config::WorkersConfig,
    tokio::sync::broadcast,
    tracing::{error, info, warn},
};

use crate::{
    error::{Error, Result},
    worker::{FaultReporter, Worker, WorkerContext, WorkerEvent, WorkerFactories},
};

const EVENT_CAPACITY: usize = 256;

enum Slot {
    /// Reserved while a factory is starting the worker.
    Starting,
    Running {
        channel_type: String,
        worker: Arc<dyn Worker>,
    },
}

/// Removes a `Starting` reservation if the start future is dropped or fails.
struct Reservation<'a> {
    slots: &'a DashMap<String, Slot>,
    channel_id: &'a str,
    armed: bool,
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.slots
                .remove_if(self.channel_id, |_, slot| matches!(slot, Slot::Starting));
        }
    }
}

/// Starts, stops and tracks workers by channel id.
pub struct WorkerSupervisor {
    factories: WorkerFactories,
    slots: DashMap<String, Slot>,
    start_timeout: Duration,
    stop_timeout: Duration,
    events: broadcast::Sender<WorkerEvent>,
}

impl WorkerSupervisor {
    pub fn new(factories: WorkerFactories) -> Self {
        Self::from_config(factories, &WorkersConfig::default())
    }

    pub fn from_config(factories: WorkerFactories, config: &WorkersConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            factories,
            slots: DashMap::new(),
            start_timeout: config.start_timeout(),
            stop_timeout: config.stop_timeout(),
            events,
        }
    }

    #[must_use]
    pub fn with_timeouts(mut self, start: Duration, stop: Duration) -> Self {
        self.start_timeout = start;
        self.stop_timeout = stop;
        self
    }

    /// Subscribe to lifecycle and fault events.
    pub fn subscribe(&self) -> broadcast::Receiver<WorkerEvent> {
        self.events.subscribe()
    }

    pub fn supports(&self, channel_type: &str) -> bool {
        self.factories.contains(channel_type)
    }

    pub fn supported_types(&self) -> Vec<&str> {
        self.factories.types()
    }

    /// Start a worker for `channel_id`.
    ///
    /// Fails with [`Error::AlreadyRunning`] if a worker is running or starting
    /// for the id. On any failure nothing stays registered for the id.
    pub async fn start(
        &self,
        channel_id: &str,
        channel_type: &str,
        config: &Value,
        metadata: &Map<String, Value>,
    ) -> Result<()> {
        let factory = self
            .factories
            .get(channel_type)
            .cloned()
            .ok_or_else(|| Error::api_usage(format!("Unknown channel type '{channel_type}'")))?;

        match self.slots.entry(channel_id.to_string()) {
            Entry::Occupied(_) => {
                return Err(Error::AlreadyRunning {
                    channel_id: channel_id.to_string(),
                });
            },
            Entry::Vacant(slot) => {
                slot.insert(Slot::Starting);
            },
        }
        let mut reservation = Reservation {
            slots: &self.slots,
            channel_id,
            armed: true,
        };

        let ctx = WorkerContext {
            channel_id: channel_id.to_string(),
            config: config.clone(),
            metadata: metadata.clone(),
            faults: FaultReporter::new(channel_id.to_string(), self.events.clone()),
        };

        let worker = match tokio::time::timeout(self.start_timeout, factory.start(ctx)).await {
            Ok(Ok(worker)) => worker,
            Ok(Err(e)) => {
                error!(channel_id, channel_type, error = %e, "worker failed to start");
                return Err(Error::worker_start(channel_id, e));
            },
            Err(_) => {
                error!(
                    channel_id,
                    channel_type,
                    timeout_secs = self.start_timeout.as_secs_f64(),
                    "worker start timed out"
                );
                return Err(Error::worker_start(
                    channel_id,
                    format!(
                        "start timed out after {:.1}s",
                        self.start_timeout.as_secs_f64()
                    ),
                ));
            },
        };

        reservation.armed = false;
        self.slots.insert(channel_id.to_string(), Slot::Running {
            channel_type: channel_type.to_string(),
            worker,
        });

        info!(channel_id, channel_type, "worker started");
        self.events
            .send(WorkerEvent::Started {
                channel_id: channel_id.to_string(),
                channel_type: channel_type.to_string(),
            })
            .ok();
        Ok(())
    }

    /// Stop and discard the worker for `channel_id`. No-op when none runs.
    ///
    /// If the worker fails to stop in time it stays registered, so the
    /// channel keeps reporting it and the caller can retry.
    pub async fn stop(&self, channel_id: &str) -> Result<()> {
        let Some((_, slot)) = self
            .slots
            .remove_if(channel_id, |_, slot| matches!(slot, Slot::Running { .. }))
        else {
            return Ok(());
        };
        let Slot::Running {
            channel_type,
            worker,
        } = slot
        else {
            return Ok(());
        };

        let outcome = match tokio::time::timeout(self.stop_timeout, worker.stop()).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(Error::worker_stop(channel_id, e)),
            Err(_) => Err(Error::worker_stop(
                channel_id,
                format!(
                    "stop timed out after {:.1}s",
                    self.stop_timeout.as_secs_f64()
                ),
            )),
        };

        match outcome {
            Ok(()) => {
                info!(channel_id, channel_type, "worker stopped");
                self.events
                    .send(WorkerEvent::Stopped {
                        channel_id: channel_id.to_string(),
                    })
                    .ok();
                Ok(())
            },
            Err(e) => {
                error!(channel_id, channel_type, error = %e, "worker failed to stop");
                match self.slots.entry(channel_id.to_string()) {
                    Entry::Vacant(slot) => {
                        slot.insert(Slot::Running {
                            channel_type,
                            worker,
                        });
                    },
                    Entry::Occupied(_) => {
                        warn!(channel_id, "slot taken while stopping, dropping old worker handle");
                    },
                }
                Err(e)
            },
        }
    }

    /// Stop every running worker. Failures are logged, not returned.
    pub async fn stop_all(&self) {
        let ids: Vec<String> = self
            .slots
            .iter()
            .filter(|slot| matches!(slot.value(), Slot::Running { .. }))
            .map(|slot| slot.key().clone())
            .collect();

        let results = futures::future::join_all(ids.iter().map(|id| self.stop(id))).await;
        for (id, result) in ids.iter().zip(results) {
            if let Err(e) = result {
                warn!(channel_id = %id, error = %e, "failed to stop worker during shutdown");
            }
        }
    }

    /// The live worker for `channel_id`, if one is running.
    pub fn worker(&self, channel_id: &str) -> Option<Arc<dyn Worker>> {
        self.slots.get(channel_id).and_then(|slot| match slot.value() {
            Slot::Running { worker, .. } => Some(Arc::clone(worker)),
            Slot::Starting => None,
        })
    }

    /// Live status snapshot, or an empty document when no worker runs.
    pub async fn status(&self, channel_id: &str) -> Value {
        match self.worker(channel_id) {
            Some(worker) => worker.status().await,
            None => Value::Object(Map::new()),
        }
    }

    pub fn is_running(&self, channel_id: &str) -> bool {
        self.slots
            .get(channel_id)
            .is_some_and(|slot| matches!(slot.value(), Slot::Running { .. }))
    }

    pub fn running_count(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| matches!(slot.value(), Slot::Running { .. }))
            .count()
    }
}
