//! The server orchestrator: per-client sessions and broadcast fan-out.
//!
//! ```text
//! Client A ──┐                       ┌── Agent A ──┐
//!             ├── in-process channels ┤             ├── Backend ── Storage
//! Client B ──┘                       └── Agent B ──┘      │
//!                                                         │ subscription index
//!                                                         ▼
//!                                          collection → id → {agents}
//! ```
//!
//! Each connected client gets an `Agent`: a session that dispatches inbound
//! messages and answers on its own outbound channel. The backend owns the
//! store, the registry of live agents, and the subscription index; a
//! successful submit ACKs the submitter and fans the committed op out to
//! every other subscriber of that document.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

use crate::op::Operation;
use crate::protocol::{ClientMessage, ServerMessage};
use crate::server::store::{MemoryStore, Storage};
use crate::server::submit::{submit_op, DEFAULT_MAX_RETRIES};
use crate::transport::{self, ClientChannel};
use crate::types::TypeRegistry;

/// Backend configuration.
#[derive(Debug, Clone)]
pub struct BackendConfig {
    /// Bound on the commit loop's compare-and-swap retries.
    pub max_submit_retries: u32,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            max_submit_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

/// Server-wide counters.
#[derive(Debug, Clone, Default)]
pub struct BackendStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub commits: u64,
    pub rejected_ops: u64,
    pub broadcasts: u64,
}

struct AgentHandle {
    outbound: mpsc::UnboundedSender<ServerMessage>,
    task: Option<JoinHandle<()>>,
}

#[derive(Default)]
struct SharedState {
    agents: HashMap<String, AgentHandle>,
    /// collection → id → subscribed client ids.
    subscriptions: HashMap<String, HashMap<String, HashSet<String>>>,
    next_client: u64,
}

/// The authoritative server.
#[derive(Clone)]
pub struct Backend {
    store: Arc<dyn Storage>,
    registry: Arc<TypeRegistry>,
    config: BackendConfig,
    shared: Arc<RwLock<SharedState>>,
    stats: Arc<RwLock<BackendStats>>,
}

fn base36(mut n: u64) -> String {
    const DIGITS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if n == 0 {
        return "0".into();
    }
    let mut out = Vec::new();
    while n > 0 {
        out.push(DIGITS[(n % 36) as usize]);
        n /= 36;
    }
    out.reverse();
    String::from_utf8(out).unwrap_or_default()
}

impl Backend {
    /// A backend over the in-memory reference store with the seeded registry.
    pub fn new() -> Self {
        Self::with_store(Arc::new(MemoryStore::new()), TypeRegistry::with_defaults())
    }

    pub fn with_store(store: Arc<dyn Storage>, registry: Arc<TypeRegistry>) -> Self {
        Self {
            store,
            registry,
            config: BackendConfig::default(),
            shared: Arc::new(RwLock::new(SharedState::default())),
            stats: Arc::new(RwLock::new(BackendStats::default())),
        }
    }

    pub fn with_config(mut self, config: BackendConfig) -> Self {
        self.config = config;
        self
    }

    pub fn registry(&self) -> Arc<TypeRegistry> {
        self.registry.clone()
    }

    pub fn store(&self) -> Arc<dyn Storage> {
        self.store.clone()
    }

    /// Connect a new client: mint an agent, send the handshake, and start
    /// the inbound pump. Returns the client's end of the transport.
    pub async fn connect(&self) -> ClientChannel {
        let (client_ch, server_ch) = transport::pair();
        let outbound = server_ch.outbound;
        let mut inbound = server_ch.inbound;

        let client_id = {
            let mut shared = self.shared.write().await;
            shared.next_client += 1;
            base36(shared.next_client)
        };

        let _ = outbound.send(ServerMessage::Handshake {
            id: client_id.clone(),
        });
        log::info!("client {client_id} connected");

        let mut agent = Agent {
            client_id: client_id.clone(),
            backend: self.clone(),
            outbound: outbound.clone(),
            subscriptions: HashMap::new(),
        };

        let backend = self.clone();
        let id_for_task = client_id.clone();
        let task = tokio::spawn(async move {
            while let Some(msg) = inbound.recv().await {
                agent.handle_message(msg).await;
            }
            backend.remove_agent(&id_for_task).await;
            log::info!("client {id_for_task} disconnected");
        });

        {
            let mut shared = self.shared.write().await;
            shared.agents.insert(
                client_id,
                AgentHandle {
                    outbound,
                    task: Some(task),
                },
            );
        }
        {
            let mut stats = self.stats.write().await;
            stats.total_connections += 1;
            stats.active_connections += 1;
        }

        client_ch
    }

    /// Tear down every agent and drop all subscriptions.
    pub async fn close(&self) {
        let mut shared = self.shared.write().await;
        for (id, mut handle) in shared.agents.drain() {
            if let Some(task) = handle.task.take() {
                task.abort();
            }
            log::debug!("agent {id} torn down");
        }
        shared.subscriptions.clear();
        self.stats.write().await.active_connections = 0;
    }

    pub async fn stats(&self) -> BackendStats {
        self.stats.read().await.clone()
    }

    async fn remove_agent(&self, client_id: &str) {
        let mut shared = self.shared.write().await;
        shared.agents.remove(client_id);
        for docs in shared.subscriptions.values_mut() {
            docs.retain(|_, subscribers| {
                subscribers.remove(client_id);
                !subscribers.is_empty()
            });
        }
        shared.subscriptions.retain(|_, docs| !docs.is_empty());
        drop(shared);
        let mut stats = self.stats.write().await;
        stats.active_connections = stats.active_connections.saturating_sub(1);
    }

    async fn subscribe(&self, collection: &str, id: &str, client_id: &str) {
        let mut shared = self.shared.write().await;
        shared
            .subscriptions
            .entry(collection.to_string())
            .or_default()
            .entry(id.to_string())
            .or_default()
            .insert(client_id.to_string());
    }

    async fn unsubscribe(&self, collection: &str, id: &str, client_id: &str) {
        let mut shared = self.shared.write().await;
        if let Some(docs) = shared.subscriptions.get_mut(collection) {
            if let Some(subscribers) = docs.get_mut(id) {
                subscribers.remove(client_id);
                if subscribers.is_empty() {
                    docs.remove(id);
                }
            }
            if docs.is_empty() {
                shared.subscriptions.remove(collection);
            }
        }
    }

    /// Deliver `msg` to every agent subscribed to `(collection, id)`,
    /// except `except`.
    async fn broadcast(&self, collection: &str, id: &str, msg: &ServerMessage, except: &str) {
        let shared = self.shared.read().await;
        let subscribers = match shared
            .subscriptions
            .get(collection)
            .and_then(|docs| docs.get(id))
        {
            Some(set) => set,
            None => return,
        };

        let mut delivered = 0u64;
        for client_id in subscribers {
            if client_id == except {
                continue;
            }
            if let Some(handle) = shared.agents.get(client_id) {
                if handle.outbound.send(msg.clone()).is_ok() {
                    delivered += 1;
                }
            }
        }
        drop(shared);

        if delivered > 0 {
            self.stats.write().await.broadcasts += delivered;
        }
    }
}

impl Default for Backend {
    fn default() -> Self {
        Self::new()
    }
}

/// A per-connected-client session.
struct Agent {
    client_id: String,
    backend: Backend,
    outbound: mpsc::UnboundedSender<ServerMessage>,
    /// collection → subscribed doc ids, for teardown bookkeeping.
    subscriptions: HashMap<String, HashSet<String>>,
}

impl Agent {
    fn send(&self, msg: ServerMessage) {
        if self.outbound.send(msg).is_err() {
            log::debug!("client {} is gone; reply dropped", self.client_id);
        }
    }

    async fn handle_message(&mut self, msg: ClientMessage) {
        match msg {
            ClientMessage::Subscribe { c, d } => self.handle_subscribe(c, d).await,
            ClientMessage::Unsubscribe { c, d } => self.handle_unsubscribe(c, d).await,
            ClientMessage::Fetch { c, d } => self.handle_fetch(c, d).await,
            ClientMessage::Op { c, d, op } => self.handle_op(c, d, op).await,
        }
    }

    async fn handle_subscribe(&mut self, c: String, d: String) {
        match self.backend.store.get_snapshot(&c, &d).await {
            Ok(snapshot) => {
                self.backend.subscribe(&c, &d, &self.client_id).await;
                self.subscriptions
                    .entry(c.clone())
                    .or_default()
                    .insert(d.clone());
                log::debug!("client {} subscribed to {c}/{d}", self.client_id);
                self.send(ServerMessage::Subscribe {
                    c,
                    d,
                    data: Some(snapshot),
                    error: None,
                });
            }
            Err(err) => self.send(ServerMessage::Subscribe {
                c,
                d,
                data: None,
                error: Some(err.to_envelope()),
            }),
        }
    }

    async fn handle_unsubscribe(&mut self, c: String, d: String) {
        self.backend.unsubscribe(&c, &d, &self.client_id).await;
        if let Some(ids) = self.subscriptions.get_mut(&c) {
            ids.remove(&d);
        }
        self.send(ServerMessage::Unsubscribe { c, d, error: None });
    }

    async fn handle_fetch(&self, c: String, d: String) {
        match self.backend.store.get_snapshot(&c, &d).await {
            Ok(snapshot) => self.send(ServerMessage::Fetch {
                c,
                d,
                data: Some(snapshot),
                error: None,
            }),
            Err(err) => self.send(ServerMessage::Fetch {
                c,
                d,
                data: None,
                error: Some(err.to_envelope()),
            }),
        }
    }

    async fn handle_op(&self, c: String, d: String, op: Operation) {
        let result = submit_op(
            self.backend.store.as_ref(),
            &self.backend.registry,
            &c,
            &d,
            &op,
            self.backend.config.max_submit_retries,
        )
        .await;

        match result {
            Ok(res) => {
                self.backend.stats.write().await.commits += 1;

                // Ack carries the committed snapshot version; the broadcast
                // carries the op at its stored base version.
                self.send(ServerMessage::op_ack(
                    &c,
                    &d,
                    res.snapshot.v,
                    res.op.src.clone(),
                    res.op.seq,
                ));
                let broadcast = ServerMessage::Op {
                    c: c.clone(),
                    d: d.clone(),
                    op: res.op,
                    error: None,
                };
                self.backend.broadcast(&c, &d, &broadcast, &self.client_id).await;
            }
            Err(err) => {
                log::debug!(
                    "rejected op on {c}/{d} from client {}: {err}",
                    self.client_id
                );
                self.backend.stats.write().await.rejected_ops += 1;
                self.send(ServerMessage::op_error(
                    &c,
                    &d,
                    &err,
                    op.src.clone(),
                    op.seq,
                ));
            }
        }
    }
}
