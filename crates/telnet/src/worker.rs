//! Telnet worker: a line-based TCP listener where every connected client is
//! an addressable peer (`ip:port`).

use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use {
    async_trait::async_trait,
    serde::Serialize,
    serde_json::{Map, Value, json},
    switchboard_channels::{
        Destination, FaultReporter, OutboundMessage, SendError, Worker, WorkerContext,
        WorkerFactory,
    },
    tokio::{
        io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
        net::{TcpListener, TcpStream},
        sync::mpsc,
        task::{JoinHandle, JoinSet},
    },
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
    uuid::Uuid,
};

use crate::{
    config::TelnetConfig,
    error::{Error, Result},
    history::History,
};

/// Type tag telnet channels are created with.
pub const CHANNEL_TYPE: &str = "telnet";

const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Pending,
    Delivered,
    Failed,
}

/// A line received from a connected client.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InboundMessage {
    pub message_id: String,
    pub channel_id: String,
    pub from: String,
    pub to: String,
    pub content: String,
    pub timestamp: u64,
}

#[derive(Debug, Clone)]
struct OutboundRecord {
    to: String,
    status: DeliveryStatus,
}

struct Outgoing {
    message_id: String,
    line: String,
}

/// State shared by the accept loop, client tasks and the worker handle.
struct Shared {
    channel_id: String,
    local_name: String,
    /// Replaced in place when channel metadata is modified.
    mo_url: Mutex<Option<String>>,
    http: reqwest::Client,
    faults: FaultReporter,
    clients: Mutex<HashMap<String, mpsc::UnboundedSender<Outgoing>>>,
    inbound: Mutex<History<InboundMessage>>,
    outbound: Mutex<History<OutboundRecord>>,
}

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

fn mo_url(metadata: &Map<String, Value>) -> Option<String> {
    metadata
        .get("mo_url")
        .and_then(Value::as_str)
        .map(str::to_owned)
}

fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

impl Shared {
    fn set_status(&self, message_id: &str, status: DeliveryStatus) {
        if let Some(record) = locked(&self.outbound).get_mut(message_id) {
            record.status = status;
        }
    }

    fn client(&self, address: &str) -> Option<mpsc::UnboundedSender<Outgoing>> {
        locked(&self.clients).get(address).cloned()
    }

    fn reply_address(&self, message_id: &str) -> Option<String> {
        locked(&self.inbound)
            .get(message_id)
            .map(|message| message.from.clone())
    }

    fn receive(&self, from: &str, content: String) {
        let message = InboundMessage {
            message_id: Uuid::new_v4().to_string(),
            channel_id: self.channel_id.clone(),
            from: from.to_string(),
            to: self.local_name.clone(),
            content,
            timestamp: unix_now(),
        };
        debug!(
            channel_id = %self.channel_id,
            message_id = %message.message_id,
            from,
            "telnet message received"
        );
        locked(&self.inbound).insert(message.message_id.clone(), message.clone());

        let mo_url = locked(&self.mo_url).clone();
        if let Some(url) = mo_url {
            let http = self.http.clone();
            let faults = self.faults.clone();
            tokio::spawn(async move {
                if let Err(e) = post_inbound(&http, &url, &message).await {
                    warn!(
                        channel_id = %message.channel_id,
                        message_id = %message.message_id,
                        error = %e,
                        "failed to post inbound message"
                    );
                    faults.report(format!("inbound delivery to {url} failed: {e}"));
                }
            });
        }
    }
}

async fn post_inbound(http: &reqwest::Client, url: &str, message: &InboundMessage) -> Result<()> {
    http.post(url)
        .json(message)
        .send()
        .await?
        .error_for_status()?;
    Ok(())
}

// ── Factory ──────────────────────────────────────────────────────────────────

/// Starts [`TelnetWorker`]s for channels of type `telnet`.
#[derive(Default)]
pub struct TelnetFactory {
    http: reqwest::Client,
}

impl TelnetFactory {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WorkerFactory for TelnetFactory {
    fn channel_type(&self) -> &str {
        CHANNEL_TYPE
    }

    async fn start(&self, ctx: WorkerContext) -> anyhow::Result<Arc<dyn Worker>> {
        let worker = TelnetWorker::start(ctx, self.http.clone()).await?;
        Ok(Arc::new(worker))
    }
}

// ── Worker ───────────────────────────────────────────────────────────────────

pub struct TelnetWorker {
    shared: Arc<Shared>,
    address: SocketAddr,
    cancel: CancellationToken,
    accept_task: Mutex<Option<JoinHandle<()>>>,
}

impl TelnetWorker {
    /// Bind the listener and start accepting clients.
    pub async fn start(ctx: WorkerContext, http: reqwest::Client) -> Result<Self> {
        let config = TelnetConfig::from_value(&ctx.config)?;
        let bind_addr = config.bind_addr();
        let listener = TcpListener::bind(&bind_addr)
            .await
            .map_err(|e| Error::io(format!("failed to bind {bind_addr}"), e))?;
        let address = listener
            .local_addr()
            .map_err(|e| Error::io("failed to read bound address", e))?;

        let shared = Arc::new(Shared {
            channel_id: ctx.channel_id.clone(),
            local_name: config
                .transport_name
                .unwrap_or_else(|| address.to_string()),
            mo_url: Mutex::new(mo_url(&ctx.metadata)),
            http,
            faults: ctx.faults,
            clients: Mutex::new(HashMap::new()),
            inbound: Mutex::new(History::new(config.history_limit)),
            outbound: Mutex::new(History::new(config.history_limit)),
        });

        let cancel = CancellationToken::new();
        let accept_task = tokio::spawn(accept_loop(listener, Arc::clone(&shared), cancel.clone()));
        info!(channel_id = %ctx.channel_id, %address, "telnet channel listening");

        Ok(Self {
            shared,
            address,
            cancel,
            accept_task: Mutex::new(Some(accept_task)),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.address
    }
}

impl Drop for TelnetWorker {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn accept_loop(listener: TcpListener, shared: Arc<Shared>, cancel: CancellationToken) {
    let mut clients = JoinSet::new();
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let (tx, rx) = mpsc::unbounded_channel();
                    locked(&shared.clients).insert(peer.to_string(), tx);
                    debug!(channel_id = %shared.channel_id, %peer, "telnet client connected");
                    clients.spawn(serve_client(
                        stream,
                        peer,
                        rx,
                        Arc::clone(&shared),
                        cancel.child_token(),
                    ));
                },
                Err(e) => {
                    warn!(channel_id = %shared.channel_id, error = %e, "telnet accept failed");
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                },
            },
            Some(_) = clients.join_next(), if !clients.is_empty() => {},
        }
    }

    drop(listener);
    while clients.join_next().await.is_some() {}
    debug!(channel_id = %shared.channel_id, "telnet accept loop finished");
}

async fn serve_client(
    stream: TcpStream,
    peer: SocketAddr,
    mut outgoing: mpsc::UnboundedReceiver<Outgoing>,
    shared: Arc<Shared>,
    cancel: CancellationToken,
) {
    let address = peer.to_string();
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            line = lines.next_line() => match line {
                Ok(Some(line)) if line.trim().is_empty() => {},
                Ok(Some(line)) => shared.receive(&address, line),
                Ok(None) => break,
                Err(e) => {
                    debug!(channel_id = %shared.channel_id, %peer, error = %e, "telnet read failed");
                    break;
                },
            },
            Some(out) = outgoing.recv() => {
                let written = writer.write_all(format!("{}\r\n", out.line).as_bytes()).await;
                match written {
                    Ok(()) => shared.set_status(&out.message_id, DeliveryStatus::Delivered),
                    Err(e) => {
                        shared.set_status(&out.message_id, DeliveryStatus::Failed);
                        debug!(channel_id = %shared.channel_id, %peer, error = %e, "telnet write failed");
                        break;
                    },
                }
            },
        }
    }

    locked(&shared.clients).remove(&address);
    outgoing.close();
    while let Ok(out) = outgoing.try_recv() {
        shared.set_status(&out.message_id, DeliveryStatus::Failed);
    }
    debug!(channel_id = %shared.channel_id, %peer, "telnet client disconnected");
}

#[async_trait]
impl Worker for TelnetWorker {
    async fn stop(&self) -> anyhow::Result<()> {
        self.cancel.cancel();
        let accept_task = locked(&self.accept_task).take();
        if let Some(accept_task) = accept_task {
            accept_task.await?;
        }
        info!(channel_id = %self.shared.channel_id, address = %self.address, "telnet channel stopped");
        Ok(())
    }

    async fn status(&self) -> Value {
        json!({
            "address": self.address.to_string(),
            "transport_name": self.shared.local_name,
            "clients": locked(&self.shared.clients).len(),
        })
    }

    async fn send_message(&self, message: &OutboundMessage) -> std::result::Result<Value, SendError> {
        let destination = message
            .destination()
            .map_err(|e| SendError::Rejected(e.to_string()))?;
        let to = match destination {
            Destination::Address(address) => address.to_string(),
            Destination::Reply(message_id) => self
                .shared
                .reply_address(message_id)
                .ok_or_else(|| SendError::Rejected(Error::unknown_reply(message_id).to_string()))?,
        };
        let client = self
            .shared
            .client(&to)
            .ok_or_else(|| SendError::Rejected(Error::unknown_address(&to).to_string()))?;

        let message_id = Uuid::new_v4().to_string();
        locked(&self.shared.outbound).insert(message_id.clone(), OutboundRecord {
            to: to.clone(),
            status: DeliveryStatus::Pending,
        });
        let outgoing = Outgoing {
            message_id: message_id.clone(),
            line: message.content.clone().unwrap_or_default(),
        };
        if client.send(outgoing).is_err() {
            self.shared.set_status(&message_id, DeliveryStatus::Failed);
            return Err(SendError::Rejected(Error::unknown_address(&to).to_string()));
        }

        let mut doc = serde_json::to_value(message).map_err(anyhow::Error::from)?;
        doc["message_id"] = json!(message_id);
        doc["channel_id"] = json!(self.shared.channel_id);
        doc["to"] = json!(to);
        if message.from.is_none() {
            doc["from"] = json!(self.shared.local_name);
        }
        Ok(doc)
    }

    /// Messages evicted from the history report as unknown.
    async fn message_status(&self, message_id: &str) -> anyhow::Result<Option<Value>> {
        Ok(locked(&self.shared.outbound).get(message_id).map(|record| {
            json!({
                "message_id": message_id,
                "to": record.to,
                "status": record.status,
            })
        }))
    }

    fn update_metadata(&self, metadata: &Map<String, Value>) {
        let url = mo_url(metadata);
        debug!(channel_id = %self.shared.channel_id, mo_url = ?url, "telnet metadata updated");
        *locked(&self.shared.mo_url) = url;
    }
}
