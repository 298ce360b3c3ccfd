//! The per-document client replica.
//!
//! Each `(collection, id)` a client touches gets a `Doc`: an optimistic local
//! copy plus the op pipeline that keeps it convergent with the authority.
//!
//! ```text
//! submit ──▶ pending[n] ──flush──▶ inflight ──ack──▶ (version advances)
//!                  ▲                  │
//!                  │    remote op     │ rebased via pairwise transform
//!                  └──────────────────┘
//! ```
//!
//! `version` is always the last server-acknowledged version; optimistic
//! applies mutate `{type, data}` without advancing it. At most one op is in
//! flight at a time, which is what keeps same-client ops committing in
//! submission order.
//!
//! Reference: Kleppmann, Chapter 5 — Replication

use std::collections::VecDeque;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::oneshot;

use crate::error::OtError;
use crate::events::Events;
use crate::kernel::transform_x;
use crate::op::Operation;
use crate::snapshot::Snapshot;
use crate::types::TypeRegistry;

/// Resolves to the server-acknowledged version, or the error that dropped
/// the op from the pipeline.
pub type SubmitAck = oneshot::Receiver<Result<u64, OtError>>;

/// Where a state change originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpSource {
    Local,
    Remote,
}

/// Document lifecycle events, fired synchronously.
#[derive(Debug)]
pub enum DocEvent {
    /// A snapshot was ingested (subscribe or fetch reply).
    Load,
    /// The document came into existence.
    Create { source: OpSource },
    /// An edit was applied.
    Op { source: OpSource, payload: Value },
    /// The document was deleted.
    Del { source: OpSource },
    /// The in-flight op was acknowledged at this version.
    Ack { v: u64 },
    /// The pipeline failed and was hard-rolled-back.
    Error { error: OtError },
}

pub(crate) struct PendingOp {
    pub(crate) op: Operation,
    pub(crate) acks: Vec<oneshot::Sender<Result<u64, OtError>>>,
}

/// A client-side document replica.
pub struct Doc {
    collection: String,
    id: String,
    pub(crate) version: u64,
    pub(crate) type_uri: Option<String>,
    pub(crate) data: Option<Value>,
    pub(crate) subscribed: bool,
    pub(crate) wants_subscribe: bool,
    /// A subscribe request is on the wire, reply not yet seen.
    pub(crate) subscribe_pending: bool,
    pub(crate) inflight: Option<PendingOp>,
    pub(crate) pending: VecDeque<PendingOp>,
    pub events: Events<DocEvent>,
    registry: Arc<TypeRegistry>,
}

impl Doc {
    pub(crate) fn new(
        collection: impl Into<String>,
        id: impl Into<String>,
        registry: Arc<TypeRegistry>,
    ) -> Self {
        Self {
            collection: collection.into(),
            id: id.into(),
            version: 0,
            type_uri: None,
            data: None,
            subscribed: false,
            wants_subscribe: false,
            subscribe_pending: false,
            inflight: None,
            pending: VecDeque::new(),
            events: Events::new(),
            registry,
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Last server-acknowledged version.
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn type_uri(&self) -> Option<&str> {
        self.type_uri.as_deref()
    }

    /// The optimistic local payload.
    pub fn data(&self) -> Option<&Value> {
        self.data.as_ref()
    }

    pub fn exists(&self) -> bool {
        self.type_uri.is_some()
    }

    pub fn subscribed(&self) -> bool {
        self.subscribed
    }

    /// Whether any local op is still unacknowledged.
    pub fn has_unacked(&self) -> bool {
        self.inflight.is_some() || !self.pending.is_empty()
    }

    // ------------------------------------------------------------------
    // Submission
    // ------------------------------------------------------------------

    pub(crate) fn submit_create(
        &mut self,
        type_name: &str,
        data: Option<Value>,
    ) -> Result<SubmitAck, OtError> {
        if self.exists() {
            return Err(OtError::AlreadyCreated);
        }
        let ty = self.registry.resolve(type_name)?;
        self.data = Some(ty.create(data.as_ref())?);
        self.type_uri = Some(ty.uri().to_string());
        self.events.emit(&DocEvent::Create {
            source: OpSource::Local,
        });

        Ok(self.enqueue(Operation::create(type_name, data)))
    }

    pub(crate) fn submit_edit(
        &mut self,
        payload: Value,
        compose: bool,
    ) -> Result<SubmitAck, OtError> {
        if payload.is_null() {
            return Err(OtError::OpNotProvided);
        }
        let type_uri = self.type_uri.clone().ok_or(OtError::DoesNotExist)?;
        let ty = self.registry.resolve(&type_uri)?;
        let data = self.data.as_ref().ok_or(OtError::DoesNotExist)?;
        self.data = Some(ty.apply(data, &payload)?);
        self.events.emit(&DocEvent::Op {
            source: OpSource::Local,
            payload: payload.clone(),
        });

        // Fold into the last unsent edit when the type supports composition;
        // a stamped op may already have reached the server and stays as-is.
        if compose {
            if let Some(last) = self.pending.back_mut() {
                if last.op.src.is_none() {
                    if let Some(prev) = last.op.op.clone() {
                        if let Some(composed) = ty.compose(&prev, &payload) {
                            let (tx, rx) = oneshot::channel();
                            last.op.op = Some(composed?);
                            last.acks.push(tx);
                            return Ok(rx);
                        }
                    }
                }
            }
        }

        Ok(self.enqueue(Operation::edit(payload)))
    }

    pub(crate) fn submit_delete(&mut self) -> Result<SubmitAck, OtError> {
        if !self.exists() {
            return Err(OtError::DoesNotExist);
        }
        self.type_uri = None;
        self.data = None;
        self.events.emit(&DocEvent::Del {
            source: OpSource::Local,
        });

        Ok(self.enqueue(Operation::delete()))
    }

    fn enqueue(&mut self, op: Operation) -> SubmitAck {
        let (tx, rx) = oneshot::channel();
        self.pending.push_back(PendingOp {
            op: op.with_v(self.version),
            acks: vec![tx],
        });
        rx
    }

    // ------------------------------------------------------------------
    // Inbound
    // ------------------------------------------------------------------

    /// Ingest a snapshot from a subscribe or fetch reply.
    ///
    /// Skipped while local ops are unacknowledged: the optimistic state is
    /// ahead of the snapshot and the pipeline will reconcile through acks.
    pub(crate) fn ingest_snapshot(&mut self, snapshot: Snapshot) {
        if self.has_unacked() {
            log::debug!(
                "{}/{}: snapshot v{} ignored, local ops in flight",
                self.collection,
                self.id,
                snapshot.v
            );
            return;
        }
        self.version = snapshot.v;
        self.type_uri = snapshot.type_uri;
        self.data = snapshot.data;
        self.events.emit(&DocEvent::Load);
    }

    /// The in-flight op was acknowledged at server version `v`.
    pub(crate) fn handle_ack(&mut self, v: u64) {
        self.version = v;
        // Queued ops were authored on optimistic state that already included
        // the acked op; their base advances with it.
        for pending in &mut self.pending {
            pending.op.v = Some(v);
        }
        if let Some(inflight) = self.inflight.take() {
            for ack in inflight.acks {
                let _ = ack.send(Ok(v));
            }
        }
        self.events.emit(&DocEvent::Ack { v });
    }

    /// A committed op from another client arrived.
    ///
    /// On a pipeline failure the replica is hard-rolled-back and the error
    /// returned; the connection reacts by resubscribing.
    pub(crate) fn handle_remote_op(&mut self, op: Operation) -> Result<(), OtError> {
        let v = op.v.unwrap_or(self.version);
        if v < self.version {
            log::debug!(
                "{}/{}: duplicate remote op v{v} (at v{})",
                self.collection,
                self.id,
                self.version
            );
            return Ok(());
        }
        if v > self.version {
            // A gap in delivery; a production client would fetch the
            // intervening ops and replay.
            log::warn!(
                "{}/{}: out-of-order remote op v{v} (at v{}), dropped",
                self.collection,
                self.id,
                self.version
            );
            return Ok(());
        }

        match self.rebase_and_apply(op) {
            Ok(()) => Ok(()),
            Err(err) => {
                self.rollback(err.clone());
                Err(err)
            }
        }
    }

    fn rebase_and_apply(&mut self, mut remote: Operation) -> Result<(), OtError> {
        let type_uri = self.type_uri.clone();
        if let Some(inflight) = self.inflight.as_mut() {
            transform_x(
                &self.registry,
                type_uri.as_deref(),
                &mut inflight.op,
                &mut remote,
            )?;
        }
        for pending in &mut self.pending {
            transform_x(
                &self.registry,
                type_uri.as_deref(),
                &mut pending.op,
                &mut remote,
            )?;
        }

        self.version += 1;
        self.apply_remote(&remote)
    }

    fn apply_remote(&mut self, op: &Operation) -> Result<(), OtError> {
        if let Some(create) = &op.create {
            let ty = self.registry.resolve(&create.type_name)?;
            self.data = Some(ty.create(create.data.as_ref())?);
            self.type_uri = Some(ty.uri().to_string());
            self.events.emit(&DocEvent::Create {
                source: OpSource::Remote,
            });
        } else if op.is_delete() {
            self.type_uri = None;
            self.data = None;
            self.events.emit(&DocEvent::Del {
                source: OpSource::Remote,
            });
        } else if let Some(payload) = &op.op {
            let type_uri = self.type_uri.as_deref().ok_or(OtError::DoesNotExist)?;
            let ty = self.registry.resolve(type_uri)?;
            let data = self.data.as_ref().ok_or(OtError::DoesNotExist)?;
            self.data = Some(ty.apply(data, payload)?);
            self.events.emit(&DocEvent::Op {
                source: OpSource::Remote,
                payload: payload.clone(),
            });
        }
        // A zeroed op changes nothing; the version bump already happened.
        Ok(())
    }

    /// The server rejected the op with this `(src, seq)` identity.
    pub(crate) fn handle_rejection(&mut self, rejected: &Operation, err: OtError) -> bool {
        let matches = self
            .inflight
            .as_ref()
            .map(|inflight| inflight.op.same_identity(rejected))
            .unwrap_or(false);
        if !matches {
            log::warn!(
                "{}/{}: rejection for unknown op {:?} ignored",
                self.collection,
                self.id,
                rejected.id()
            );
            return false;
        }
        self.rollback(err);
        true
    }

    /// Hard rollback: drop the whole pipeline, fail every waiting caller,
    /// and reset to nonexistent. The connection follows up with a
    /// resubscribe to fetch fresh truth.
    pub(crate) fn rollback(&mut self, err: OtError) {
        log::warn!(
            "{}/{}: hard rollback ({})",
            self.collection,
            self.id,
            err.code()
        );
        let dropped = self.inflight.take().into_iter().chain(self.pending.drain(..));
        for record in dropped {
            for ack in record.acks {
                let _ = ack.send(Err(err.clone()));
            }
        }
        self.type_uri = None;
        self.data = None;
        self.subscribed = false;
        self.events.emit(&DocEvent::Error { error: err });
    }

    /// Connection dropped: the in-flight op is returned to the head of the
    /// queue so it is resent (the server dedupes replays by `(src, seq)`).
    pub(crate) fn handle_disconnect(&mut self) {
        if let Some(inflight) = self.inflight.take() {
            self.pending.push_front(inflight);
        }
        self.subscribed = false;
        self.subscribe_pending = false;
    }
}
