//! Error taxonomy for the engine.
//!
//! Every error carries a stable machine-readable code (the wire form) and a
//! human message. The server packages errors into `{code, message}` envelopes
//! for the submitting client; the client treats a rejected in-flight op as
//! fatal to its local pipeline and hard-rolls-back.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// All errors the engine can signal.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OtError {
    /// Structurally malformed operation, or an op version ahead of the server.
    #[error("operation is badly formed: {0}")]
    BadlyFormed(String),

    /// Operation names a type the registry does not know.
    #[error("type not recognized: {0}")]
    TypeNotRecognized(String),

    /// Create issued against a document that already exists.
    #[error("document was already created")]
    AlreadyCreated,

    /// Edit or delete issued against a nonexistent document.
    #[error("document does not exist")]
    DoesNotExist,

    /// A concurrent delete invalidated this operation.
    #[error("document was deleted")]
    WasDeleted,

    /// Edit operation carries no payload.
    #[error("no operation provided")]
    OpNotProvided,

    /// Snapshot and op versions disagree at apply time.
    #[error("version mismatch on apply: snapshot v{snapshot}, op v{op}")]
    VersionMismatchOnApply { snapshot: u64, op: u64 },

    /// The two ops being transformed do not share a base version.
    #[error("version mismatch on transform: op v{op}, applied v{applied}")]
    VersionMismatchOnTransform { op: u64, applied: u64 },

    /// An op with the same `(src, seq)` identity is already in the log.
    #[error("operation was already submitted")]
    OpAlreadySubmitted,

    /// The log lacks the entries needed to rebase a stale op.
    #[error("transform ops not found: requested [{from}, {to}), got {got}")]
    TransformOpsNotFound { from: u64, to: u64, got: usize },

    /// The commit compare-and-swap loop ran out of retries.
    #[error("maximum submit retries exceeded ({0})")]
    MaxSubmitRetriesExceeded(u32),

    /// Send attempted while the transport is down.
    #[error("connection closed")]
    ConnectionClosed,
}

impl OtError {
    /// Stable machine-readable code, as carried on the wire.
    pub fn code(&self) -> &'static str {
        match self {
            OtError::BadlyFormed(_) => "BadlyFormed",
            OtError::TypeNotRecognized(_) => "TypeNotRecognized",
            OtError::AlreadyCreated => "AlreadyCreated",
            OtError::DoesNotExist => "DoesNotExist",
            OtError::WasDeleted => "WasDeleted",
            OtError::OpNotProvided => "OpNotProvided",
            OtError::VersionMismatchOnApply { .. } => "VersionMismatchOnApply",
            OtError::VersionMismatchOnTransform { .. } => "VersionMismatchOnTransform",
            OtError::OpAlreadySubmitted => "OpAlreadySubmitted",
            OtError::TransformOpsNotFound { .. } => "TransformOpsNotFound",
            OtError::MaxSubmitRetriesExceeded(_) => "MaxSubmitRetriesExceeded",
            OtError::ConnectionClosed => "ConnectionClosed",
        }
    }

    /// Package into the wire envelope.
    pub fn to_envelope(&self) -> ErrorEnvelope {
        ErrorEnvelope {
            code: self.code().to_string(),
            message: self.to_string(),
        }
    }
}

/// The `{code, message}` error shape carried in protocol replies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub code: String,
    pub message: String,
}

impl ErrorEnvelope {
    /// Reconstruct an `OtError` from a received envelope.
    ///
    /// Codes minted by a newer peer fall back to `BadlyFormed` so the local
    /// pipeline still fails closed.
    pub fn to_error(&self) -> OtError {
        match self.code.as_str() {
            "TypeNotRecognized" => OtError::TypeNotRecognized(self.message.clone()),
            "AlreadyCreated" => OtError::AlreadyCreated,
            "DoesNotExist" => OtError::DoesNotExist,
            "WasDeleted" => OtError::WasDeleted,
            "OpNotProvided" => OtError::OpNotProvided,
            "OpAlreadySubmitted" => OtError::OpAlreadySubmitted,
            "MaxSubmitRetriesExceeded" => OtError::MaxSubmitRetriesExceeded(0),
            "ConnectionClosed" => OtError::ConnectionClosed,
            _ => OtError::BadlyFormed(self.message.clone()),
        }
    }
}
