//! The client connection: handshake, document routing, and the flush loop.
//!
//! A connection owns one transport channel, the server-assigned client id,
//! the per-connection `seq` counter, and every `Doc` this client touches.
//! Inbound processing is pull-driven: callers drain messages with
//! `process_one`/`process_pending`, which keeps interleaving deterministic.
//!
//! The single-inflight discipline lives here: `flush` moves at most one op
//! per document onto the wire, stamping `(src, seq)` exactly once, and the
//! next op leaves only after the ack for the previous one.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use crate::client::doc::{Doc, SubmitAck};
use crate::error::{ErrorEnvelope, OtError};
use crate::events::Events;
use crate::op::Operation;
use crate::protocol::{ClientMessage, ServerMessage};
use crate::transport::ClientChannel;
use crate::types::TypeRegistry;

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Transport attached, handshake not yet processed.
    Connecting,
    Connected,
    Disconnected,
}

/// Connection lifecycle events, fired synchronously.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    Connected,
    Disconnected,
    Closed,
}

/// Connection tuning.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Fold new edits into the last unsent pending edit when the document's
    /// type supports composition.
    pub compose_pending: bool,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            compose_pending: true,
        }
    }
}

/// A client's connection to the authority.
pub struct Connection {
    state: ConnectionState,
    /// Server-assigned client id; the `src` stamp on outgoing ops.
    id: Option<String>,
    /// Monotone per-connection counter, incremented exactly once per flush.
    seq: u64,
    docs: HashMap<(String, String), Doc>,
    channel: Option<ClientChannel>,
    registry: Arc<TypeRegistry>,
    config: ConnectionConfig,
    pub events: Events<ConnectionEvent>,
}

impl Connection {
    pub fn new(channel: ClientChannel, registry: Arc<TypeRegistry>) -> Self {
        Self {
            state: ConnectionState::Connecting,
            id: None,
            seq: 0,
            docs: HashMap::new(),
            channel: Some(channel),
            registry,
            config: ConnectionConfig::default(),
            events: Events::new(),
        }
    }

    pub fn with_config(mut self, config: ConnectionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// The server-assigned client id, known after the handshake.
    pub fn client_id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    /// The document replica for `(collection, id)`, created on first touch.
    pub fn get_doc(&mut self, collection: &str, id: &str) -> &mut Doc {
        let key = (collection.to_string(), id.to_string());
        let registry = self.registry.clone();
        self.docs
            .entry(key)
            .or_insert_with(|| Doc::new(collection, id, registry))
    }

    /// The document replica, if this connection has touched it.
    pub fn doc(&self, collection: &str, id: &str) -> Option<&Doc> {
        self.docs.get(&(collection.to_string(), id.to_string()))
    }

    // ------------------------------------------------------------------
    // Outbound
    // ------------------------------------------------------------------

    /// Subscribe to a document. The reply carries the current snapshot and
    /// opens the broadcast stream.
    pub fn subscribe(&mut self, collection: &str, id: &str) {
        let doc = self.get_doc(collection, id);
        doc.wants_subscribe = true;
        doc.subscribe_pending = true;
        self.send(ClientMessage::Subscribe {
            c: collection.to_string(),
            d: id.to_string(),
        });
    }

    pub fn unsubscribe(&mut self, collection: &str, id: &str) {
        let doc = self.get_doc(collection, id);
        doc.wants_subscribe = false;
        doc.subscribed = false;
        doc.subscribe_pending = false;
        self.send(ClientMessage::Unsubscribe {
            c: collection.to_string(),
            d: id.to_string(),
        });
    }

    /// Fetch the current snapshot once, without subscribing.
    pub fn fetch(&mut self, collection: &str, id: &str) {
        self.get_doc(collection, id);
        self.send(ClientMessage::Fetch {
            c: collection.to_string(),
            d: id.to_string(),
        });
    }

    /// Create the document. Applies locally at once; the returned ack
    /// resolves when the authority commits.
    pub fn submit_create(
        &mut self,
        collection: &str,
        id: &str,
        type_name: &str,
        data: Option<Value>,
    ) -> Result<SubmitAck, OtError> {
        let ack = self.get_doc(collection, id).submit_create(type_name, data)?;
        self.flush(collection, id);
        Ok(ack)
    }

    /// Submit an edit against the optimistic local state.
    pub fn submit_edit(
        &mut self,
        collection: &str,
        id: &str,
        payload: Value,
    ) -> Result<SubmitAck, OtError> {
        let compose = self.config.compose_pending;
        let ack = self.get_doc(collection, id).submit_edit(payload, compose)?;
        self.flush(collection, id);
        Ok(ack)
    }

    /// Delete the document.
    pub fn submit_delete(&mut self, collection: &str, id: &str) -> Result<SubmitAck, OtError> {
        let ack = self.get_doc(collection, id).submit_delete()?;
        self.flush(collection, id);
        Ok(ack)
    }

    /// Move the head of the pending queue into flight, if allowed.
    ///
    /// Requires: connected with a handshake, nothing currently in flight,
    /// and a non-empty queue. `(src, seq)` is stamped on first flight only,
    /// so a resend after reconnect keeps its identity.
    fn flush(&mut self, collection: &str, id: &str) {
        if self.state != ConnectionState::Connected {
            return;
        }
        let client_id = match &self.id {
            Some(client_id) => client_id.clone(),
            None => return,
        };

        let key = (collection.to_string(), id.to_string());
        let doc = match self.docs.get_mut(&key) {
            Some(doc) => doc,
            None => return,
        };
        if doc.inflight.is_some() || doc.pending.is_empty() {
            return;
        }

        let mut record = match doc.pending.pop_front() {
            Some(record) => record,
            None => return,
        };
        if record.op.src.is_none() {
            self.seq += 1;
            record.op.src = Some(client_id);
            record.op.seq = Some(self.seq);
        }
        let msg = ClientMessage::Op {
            c: collection.to_string(),
            d: id.to_string(),
            op: record.op.clone(),
        };
        doc.inflight = Some(record);
        self.send(msg);
    }

    fn send(&mut self, msg: ClientMessage) {
        if self.state == ConnectionState::Disconnected {
            return;
        }
        let closed = match &self.channel {
            Some(channel) => channel.outbound.send(msg).is_err(),
            None => true,
        };
        if closed {
            log::warn!("transport closed mid-send");
            self.handle_disconnect();
        }
    }

    // ------------------------------------------------------------------
    // Inbound
    // ------------------------------------------------------------------

    /// Wait for and process one inbound message. Returns `false` when the
    /// transport has closed (after running the disconnect path).
    pub async fn process_one(&mut self) -> bool {
        let msg = match self.channel.as_mut() {
            Some(channel) => channel.inbound.recv().await,
            None => None,
        };
        match msg {
            Some(msg) => {
                self.handle_message(msg);
                true
            }
            None => {
                self.handle_disconnect();
                false
            }
        }
    }

    /// Drain every already-queued inbound message. Returns how many were
    /// processed.
    pub fn process_pending(&mut self) -> usize {
        let mut handled = 0;
        loop {
            let msg = match self.channel.as_mut() {
                Some(channel) => channel.inbound.try_recv(),
                None => break,
            };
            match msg {
                Ok(msg) => {
                    self.handle_message(msg);
                    handled += 1;
                }
                Err(tokio::sync::mpsc::error::TryRecvError::Empty) => break,
                Err(tokio::sync::mpsc::error::TryRecvError::Disconnected) => {
                    self.handle_disconnect();
                    break;
                }
            }
        }
        handled
    }

    fn handle_message(&mut self, msg: ServerMessage) {
        match msg {
            ServerMessage::Handshake { id } => self.handle_handshake(id),
            ServerMessage::Subscribe { c, d, data, error } => {
                if let Some(error) = error {
                    log::warn!("subscribe {c}/{d} failed: {}", error.code);
                    return;
                }
                let doc = self.get_doc(&c, &d);
                doc.subscribed = true;
                doc.subscribe_pending = false;
                if let Some(snapshot) = data {
                    doc.ingest_snapshot(snapshot);
                }
                self.flush(&c, &d);
            }
            ServerMessage::Unsubscribe { c, d, .. } => {
                log::debug!("unsubscribed from {c}/{d}");
            }
            ServerMessage::Fetch { c, d, data, error } => {
                if let Some(error) = error {
                    log::warn!("fetch {c}/{d} failed: {}", error.code);
                    return;
                }
                if let Some(snapshot) = data {
                    self.get_doc(&c, &d).ingest_snapshot(snapshot);
                }
            }
            ServerMessage::Op { c, d, op, error } => self.handle_op(c, d, op, error),
        }
    }

    fn handle_handshake(&mut self, id: String) {
        log::info!("handshake: client id {id}");
        self.id = Some(id);
        self.state = ConnectionState::Connected;
        self.events.emit(&ConnectionEvent::Connected);

        // Resubscribe everything that wants it (and has no request already on
        // this transport), then restart the pipelines.
        let keys: Vec<(String, String)> = self.docs.keys().cloned().collect();
        for (c, d) in &keys {
            let needs_subscribe = self
                .docs
                .get(&(c.clone(), d.clone()))
                .map(|doc| doc.wants_subscribe && !doc.subscribed && !doc.subscribe_pending)
                .unwrap_or(false);
            if needs_subscribe {
                self.subscribe(c, d);
            }
        }
        for (c, d) in keys {
            self.flush(&c, &d);
        }
    }

    fn handle_op(
        &mut self,
        c: String,
        d: String,
        op: Operation,
        error: Option<ErrorEnvelope>,
    ) {
        let needs_resubscribe;
        {
            let doc = self.get_doc(&c, &d);
            if let Some(envelope) = error {
                needs_resubscribe = doc.handle_rejection(&op, envelope.to_error());
            } else if doc
                .inflight
                .as_ref()
                .map(|inflight| inflight.op.same_identity(&op))
                .unwrap_or(false)
            {
                // Ack: the message v is the committed snapshot version.
                let v = op.v.unwrap_or(doc.version + 1);
                doc.handle_ack(v);
                needs_resubscribe = false;
            } else {
                needs_resubscribe = doc.handle_remote_op(op).is_err();
            }
        }

        if needs_resubscribe {
            self.subscribe(&c, &d);
        } else {
            self.flush(&c, &d);
        }
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Drop the transport. In-flight work returns to the pending queues and
    /// every doc unsubscribes; `attach` restores service.
    pub fn handle_disconnect(&mut self) {
        if self.state == ConnectionState::Disconnected {
            return;
        }
        log::info!("disconnected");
        self.state = ConnectionState::Disconnected;
        self.channel = None;
        for doc in self.docs.values_mut() {
            doc.handle_disconnect();
        }
        self.events.emit(&ConnectionEvent::Disconnected);
    }

    /// Attach a fresh transport after a disconnect. Docs resubscribe and
    /// resend once the new handshake arrives.
    pub fn attach(&mut self, channel: ClientChannel) {
        self.channel = Some(channel);
        self.state = ConnectionState::Connecting;
        self.id = None;
    }

    /// Permanently close the connection.
    pub fn close(&mut self) {
        self.handle_disconnect();
        self.events.emit(&ConnectionEvent::Closed);
    }
}
