//! Wire protocol between clients and the authority.
//!
//! Messages are JSON objects tagged by an `a` (action) field:
//!
//! ```text
//! ┌────┬───────────┬──────────────────────────────────────────────┐
//! │ a  │ direction │ payload                                      │
//! ├────┼───────────┼──────────────────────────────────────────────┤
//! │ hs │ S→C once  │ {id} — assigns the client id                 │
//! │ s  │ C↔S       │ subscribe; reply carries {data} or {error}   │
//! │ us │ C↔S       │ unsubscribe; ack-only                        │
//! │ f  │ C↔S       │ fetch; reply carries {data}                  │
//! │ op │ C↔S       │ op shape + {v, src, seq}; {error} on reject  │
//! └────┴───────────┴──────────────────────────────────────────────┘
//! ```
//!
//! The transport guarantees in-order, at-most-once delivery per direction
//! while connected; loss across a reconnect is expected and handled by
//! resubscribing.

use serde::{Deserialize, Serialize};

use crate::error::{ErrorEnvelope, OtError};
use crate::op::Operation;
use crate::snapshot::Snapshot;

/// Messages sent from a client to the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "a")]
pub enum ClientMessage {
    /// Subscribe to a document.
    #[serde(rename = "s")]
    Subscribe { c: String, d: String },

    /// Unsubscribe from a document.
    #[serde(rename = "us")]
    Unsubscribe { c: String, d: String },

    /// Fetch the current snapshot once.
    #[serde(rename = "f")]
    Fetch { c: String, d: String },

    /// Submit an operation.
    #[serde(rename = "op")]
    Op {
        c: String,
        d: String,
        #[serde(flatten)]
        op: Operation,
    },
}

/// Messages sent from the server to a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "a")]
pub enum ServerMessage {
    /// Handshake, sent exactly once at connect; assigns the client id.
    #[serde(rename = "hs")]
    Handshake { id: String },

    /// Subscribe reply.
    #[serde(rename = "s")]
    Subscribe {
        c: String,
        d: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        data: Option<Snapshot>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<ErrorEnvelope>,
    },

    /// Unsubscribe ack.
    #[serde(rename = "us")]
    Unsubscribe {
        c: String,
        d: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<ErrorEnvelope>,
    },

    /// Fetch reply.
    #[serde(rename = "f")]
    Fetch {
        c: String,
        d: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        data: Option<Snapshot>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<ErrorEnvelope>,
    },

    /// Op ack (to the submitter, `v` = committed snapshot version), op
    /// broadcast (to other subscribers, `v` = stored base version), or op
    /// rejection (`error` set, `src`/`seq` identify the rejected op).
    #[serde(rename = "op")]
    Op {
        c: String,
        d: String,
        #[serde(flatten)]
        op: Operation,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<ErrorEnvelope>,
    },
}

impl ServerMessage {
    /// Ack for a committed op: bare `{v, src, seq}`, no shape.
    pub fn op_ack(c: &str, d: &str, v: u64, src: Option<String>, seq: Option<u64>) -> Self {
        ServerMessage::Op {
            c: c.to_string(),
            d: d.to_string(),
            op: Operation {
                v: Some(v),
                src,
                seq,
                ..Default::default()
            },
            error: None,
        }
    }

    /// Rejection reply for a submitted op.
    pub fn op_error(c: &str, d: &str, err: &OtError, src: Option<String>, seq: Option<u64>) -> Self {
        ServerMessage::Op {
            c: c.to_string(),
            d: d.to_string(),
            op: Operation {
                src,
                seq,
                ..Default::default()
            },
            error: Some(err.to_envelope()),
        }
    }
}

/// Serialize a message for the wire.
pub fn encode<T: Serialize>(msg: &T) -> Result<Vec<u8>, OtError> {
    serde_json::to_vec(msg).map_err(|e| OtError::BadlyFormed(e.to_string()))
}

/// Deserialize a message from the wire.
pub fn decode<T: for<'de> Deserialize<'de>>(bytes: &[u8]) -> Result<T, OtError> {
    serde_json::from_slice(bytes).map_err(|e| OtError::BadlyFormed(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_subscribe_roundtrip() {
        let msg = ClientMessage::Subscribe {
            c: "notes".into(),
            d: "doc1".into(),
        };
        let bytes = encode(&msg).unwrap();
        let back: ClientMessage = decode(&bytes).unwrap();
        assert_eq!(back, msg);

        let v: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(v, json!({"a": "s", "c": "notes", "d": "doc1"}));
    }

    #[test]
    fn test_op_message_flattens_shape() {
        let mut op = Operation::edit(json!({"insert": true, "pos": 0, "text": "x"}));
        op.v = Some(3);
        op.src = Some("c1".into());
        op.seq = Some(7);
        let msg = ClientMessage::Op {
            c: "notes".into(),
            d: "doc1".into(),
            op,
        };
        let v: serde_json::Value = serde_json::from_slice(&encode(&msg).unwrap()).unwrap();
        assert_eq!(v["a"], "op");
        assert_eq!(v["op"]["text"], "x");
        assert_eq!(v["v"], 3);
        assert_eq!(v["src"], "c1");
        assert_eq!(v["seq"], 7);

        let back: ClientMessage = decode(&encode(&msg).unwrap()).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn test_handshake_roundtrip() {
        let msg = ServerMessage::Handshake { id: "a1".into() };
        let back: ServerMessage = decode(&encode(&msg).unwrap()).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn test_subscribe_reply_with_snapshot() {
        let msg = ServerMessage::Subscribe {
            c: "notes".into(),
            d: "doc1".into(),
            data: Some(Snapshot {
                id: "doc1".into(),
                v: 2,
                type_uri: Some("https://tandem.rs/types/counter".into()),
                data: Some(json!(5)),
                meta: None,
            }),
            error: None,
        };
        let v: serde_json::Value = serde_json::from_slice(&encode(&msg).unwrap()).unwrap();
        assert_eq!(v["data"]["v"], 2);
        assert!(v.get("error").is_none());

        let back: ServerMessage = decode(&encode(&msg).unwrap()).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn test_op_ack_shape() {
        let msg = ServerMessage::op_ack("notes", "doc1", 4, Some("c1".into()), Some(2));
        let v: serde_json::Value = serde_json::from_slice(&encode(&msg).unwrap()).unwrap();
        assert_eq!(v, json!({"a": "op", "c": "notes", "d": "doc1", "v": 4, "src": "c1", "seq": 2}));
    }

    #[test]
    fn test_op_error_carries_identity_and_envelope() {
        let msg = ServerMessage::op_error(
            "notes",
            "doc1",
            &OtError::AlreadyCreated,
            Some("c1".into()),
            Some(9),
        );
        let v: serde_json::Value = serde_json::from_slice(&encode(&msg).unwrap()).unwrap();
        assert_eq!(v["error"]["code"], "AlreadyCreated");
        assert_eq!(v["src"], "c1");
        assert_eq!(v["seq"], 9);
    }

    #[test]
    fn test_decode_garbage_is_badly_formed() {
        let err = decode::<ClientMessage>(b"{nope").unwrap_err();
        assert_eq!(err.code(), "BadlyFormed");

        let err = decode::<ClientMessage>(br#"{"a": "zz"}"#).unwrap_err();
        assert_eq!(err.code(), "BadlyFormed");
    }
}
