//! The client side: per-document replicas and the connection that drives them.

pub mod connection;
pub mod doc;

pub use connection::{Connection, ConnectionConfig, ConnectionEvent, ConnectionState};
pub use doc::{Doc, DocEvent, OpSource, SubmitAck};
