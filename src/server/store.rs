//! Storage: snapshots plus an append-only per-document op log.
//!
//! The authority reads and writes documents through the small `Storage`
//! interface; `MemoryStore` is the in-process reference implementation.
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │                MemoryStore                    │
//! │                                              │
//! │  collection → id → ┌ snapshot (v = N)        │
//! │                    └ ops[0..N]  (op i has    │
//! │                         base version v = i)  │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! Reads hand out defensive clones; the only mutation path is `commit`,
//! whose version compare-and-swap happens inside a single lock acquisition,
//! so concurrent commits on the same document serialize correctly on any
//! runtime flavor.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::OtError;
use crate::op::{OpMeta, Operation, StoredOp};
use crate::snapshot::{Snapshot, SnapshotMeta};

/// The commit/fetch interface the commit loop runs against.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Current snapshot; a never-created document yields the empty snapshot
    /// with `v = 0`.
    async fn get_snapshot(&self, collection: &str, id: &str) -> Result<Snapshot, OtError>;

    /// Log entries in `[from, to)` (`to = None` means to the head), in
    /// version order.
    async fn get_ops(
        &self,
        collection: &str,
        id: &str,
        from: u64,
        to: Option<u64>,
    ) -> Result<Vec<StoredOp>, OtError>;

    /// Compare-and-swap commit: succeeds iff the stored version equals
    /// `op.v`; on success appends the stamped op and replaces the snapshot.
    /// Returns `false` on a version conflict, never a partial write.
    async fn commit(
        &self,
        collection: &str,
        id: &str,
        op: &Operation,
        snapshot: &Snapshot,
    ) -> Result<bool, OtError>;
}

#[derive(Debug, Default)]
struct DocRecord {
    snapshot: Option<Snapshot>,
    ops: Vec<StoredOp>,
}

/// In-memory reference store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    collections: Mutex<HashMap<String, HashMap<String, DocRecord>>>,
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of documents that have at least one committed op.
    pub async fn doc_count(&self) -> usize {
        self.collections
            .lock()
            .await
            .values()
            .map(|docs| docs.len())
            .sum()
    }
}

#[async_trait]
impl Storage for MemoryStore {
    async fn get_snapshot(&self, collection: &str, id: &str) -> Result<Snapshot, OtError> {
        let collections = self.collections.lock().await;
        let snapshot = collections
            .get(collection)
            .and_then(|docs| docs.get(id))
            .and_then(|record| record.snapshot.clone())
            .unwrap_or_else(|| Snapshot::empty(id));
        Ok(snapshot)
    }

    async fn get_ops(
        &self,
        collection: &str,
        id: &str,
        from: u64,
        to: Option<u64>,
    ) -> Result<Vec<StoredOp>, OtError> {
        let collections = self.collections.lock().await;
        let ops = match collections.get(collection).and_then(|docs| docs.get(id)) {
            Some(record) => &record.ops,
            None => return Ok(Vec::new()),
        };
        let end = to.map(|t| t as usize).unwrap_or(ops.len()).min(ops.len());
        let start = (from as usize).min(end);
        Ok(ops[start..end].to_vec())
    }

    async fn commit(
        &self,
        collection: &str,
        id: &str,
        op: &Operation,
        snapshot: &Snapshot,
    ) -> Result<bool, OtError> {
        let base = op
            .v
            .ok_or_else(|| OtError::BadlyFormed("commit requires an op version".into()))?;

        let mut collections = self.collections.lock().await;
        let record = collections
            .entry(collection.to_string())
            .or_default()
            .entry(id.to_string())
            .or_default();

        let current = record.snapshot.as_ref().map(|s| s.v).unwrap_or(0);
        if current != base {
            return Ok(false);
        }

        let ts = now_millis();
        record.ops.push(StoredOp {
            collection: collection.to_string(),
            id: id.to_string(),
            meta: OpMeta { ts },
            op: op.clone(),
        });

        let mut stored = snapshot.clone();
        let meta = stored.meta.get_or_insert_with(SnapshotMeta::default);
        meta.ctime.get_or_insert(ts);
        meta.mtime = Some(ts);
        record.snapshot = Some(stored);
        Ok(true)
    }
}
