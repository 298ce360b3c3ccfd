//! The operation model.
//!
//! An operation is a caller-owned buffer with exactly one of three shapes
//! (create, edit, or delete), plus the base version it was authored against
//! and an optional `(src, seq)` identity. The kernel mutates operations in
//! place when transforming them forward; callers that need the original must
//! clone first.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The `create` component of an operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateFields {
    /// Registered type name or URI.
    #[serde(rename = "type")]
    pub type_name: String,
    /// Optional initial data passed to the type's `create`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// A create, edit, or delete request against a base version.
///
/// `src` and `seq` are set together or both absent; together they form the
/// globally unique identity used for ack matching and duplicate detection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub create: Option<CreateFields>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub op: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub del: Option<bool>,
    /// Base version: the snapshot version this op was authored against.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub v: Option<u64>,
    /// Originating client identifier.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub src: Option<String>,
    /// The originating client's monotone per-connection counter.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seq: Option<u64>,
}

impl Operation {
    /// A create op transitioning nonexistent → existing.
    pub fn create(type_name: impl Into<String>, data: Option<Value>) -> Self {
        Self {
            create: Some(CreateFields {
                type_name: type_name.into(),
                data,
            }),
            ..Default::default()
        }
    }

    /// An edit op carrying a type-specific payload.
    pub fn edit(payload: Value) -> Self {
        Self {
            op: Some(payload),
            ..Default::default()
        }
    }

    /// A delete op transitioning existing → nonexistent.
    pub fn delete() -> Self {
        Self {
            del: Some(true),
            ..Default::default()
        }
    }

    pub fn with_v(mut self, v: u64) -> Self {
        self.v = Some(v);
        self
    }

    pub fn is_create(&self) -> bool {
        self.create.is_some()
    }

    pub fn is_edit(&self) -> bool {
        self.op.is_some()
    }

    pub fn is_delete(&self) -> bool {
        self.del == Some(true)
    }

    /// Whether the op has none of the three shapes, i.e. a structural no-op.
    ///
    /// Zeroed ops arise in the client pipeline when a local delete wins over
    /// a remote edit; they still advance the version when applied.
    pub fn is_noop(&self) -> bool {
        !self.is_create() && !self.is_edit() && !self.is_delete()
    }

    /// The `(src, seq)` identity, if stamped.
    pub fn id(&self) -> Option<(&str, u64)> {
        match (&self.src, self.seq) {
            (Some(src), Some(seq)) => Some((src.as_str(), seq)),
            _ => None,
        }
    }

    /// Whether this op and `other` carry the same `(src, seq)` identity.
    pub fn same_identity(&self, other: &Operation) -> bool {
        match (self.id(), other.id()) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }

    /// Strip the shape, leaving a structural no-op that preserves
    /// version and identity.
    pub fn zero(&mut self) {
        self.create = None;
        self.op = None;
        self.del = None;
    }
}

/// Metadata stamped onto an op at commit time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OpMeta {
    /// Commit wall-clock time, milliseconds since the epoch.
    pub ts: u64,
}

/// A committed op as it sits in the server's per-document log.
///
/// Entry `i` of a document's log has base version `v = i`; the log is
/// contiguous and append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredOp {
    pub collection: String,
    pub id: String,
    #[serde(rename = "m")]
    pub meta: OpMeta,
    #[serde(flatten)]
    pub op: Operation,
}
