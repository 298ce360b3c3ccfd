//! # tandem — an operational-transformation engine for collaborative documents
//!
//! Convergent concurrent editing of versioned documents across many clients
//! connected to a central authority.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   in-process channel   ┌──────────────┐
//! │  Connection  │ ◄────────────────────► │    Agent     │
//! │  Doc replica │   {hs, s, us, f, op}   │  (per client)│
//! └──────┬───────┘                        └──────┬───────┘
//!        │ optimistic apply                      │ submit
//!        ▼                                       ▼
//! ┌──────────────┐                        ┌──────────────┐
//! │ inflight (≤1)│                        │ commit loop  │
//! │ pending queue│                        │ (CAS + retry)│
//! └──────────────┘                        └──────┬───────┘
//!                                                │
//!                                         ┌──────┴───────┐
//!                                         │   Storage    │
//!                                         │ snapshots +  │
//!                                         │ op log per   │
//!                                         │ document     │
//!                                         └──────────────┘
//! ```
//!
//! A client submits an op, applies it locally at once, and sends at most one
//! op per document to the server. The server rebases the op over any log
//! entries committed since the op's base version, applies it, commits with a
//! compare-and-swap, then ACKs the submitter and fans the committed op out
//! to every other subscriber. Remote ops arriving at a client rebase the
//! in-flight op and the whole pending queue before applying.
//!
//! Convergence rests on each registered type's one-step transform property;
//! the two reference types (an additive counter and a single-operation text
//! type) are the built-in vehicles.
//!
//! ## Modules
//!
//! - [`kernel`] — validate / apply / transform on versioned snapshots
//! - [`types`] — the [`types::OtType`] trait, registry, and reference types
//! - [`client`] — [`client::Doc`] replicas and the [`client::Connection`]
//! - [`server`] — [`server::Backend`], the commit loop, and [`server::MemoryStore`]
//! - [`protocol`] — the `a`-tagged message set and JSON codec
//! - [`transport`] — the in-process bidirectional channel pair

pub mod client;
pub mod error;
pub mod events;
pub mod kernel;
pub mod op;
pub mod protocol;
pub mod server;
pub mod snapshot;
pub mod transport;
pub mod types;

pub use client::{
    Connection, ConnectionConfig, ConnectionEvent, ConnectionState, Doc, DocEvent, OpSource,
};
pub use error::{ErrorEnvelope, OtError};
pub use op::{CreateFields, OpMeta, Operation, StoredOp};
pub use protocol::{ClientMessage, ServerMessage};
pub use server::{Backend, BackendConfig, BackendStats, MemoryStore, Storage, SubmitResult};
pub use snapshot::{Snapshot, SnapshotMeta};
pub use types::{OtType, Side, TypeRegistry};
