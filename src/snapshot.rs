//! Versioned document state container.
//!
//! A snapshot is the unit the server stores and the unit a subscribe/fetch
//! reply carries. `v` is the monotone version, starting at 0 and advancing by
//! exactly 1 per applied operation. A document that was never created is the
//! empty snapshot (`v = 0`, no type, no data) and is still a legitimate
//! subscribable entity.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Metadata attached to a snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SnapshotMeta {
    /// Wall-clock creation time, milliseconds since the epoch.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ctime: Option<u64>,
    /// Wall-clock time of the last committed op, milliseconds since the epoch.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mtime: Option<u64>,
}

/// Versioned document state.
///
/// Invariant: `type_uri` and `data` are set together or absent together;
/// both absent denotes a nonexistent document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Document identifier.
    pub id: String,
    /// Monotone version; the number of ops applied so far.
    pub v: u64,
    /// Registered type URI, absent for a nonexistent document.
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub type_uri: Option<String>,
    /// Type-specific payload, absent iff the document is nonexistent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<SnapshotMeta>,
}

impl Snapshot {
    /// The empty snapshot for a never-created document.
    pub fn empty(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            v: 0,
            type_uri: None,
            data: None,
            meta: None,
        }
    }

    /// Whether the document currently exists.
    pub fn exists(&self) -> bool {
        self.type_uri.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_empty_snapshot() {
        let s = Snapshot::empty("doc1");
        assert_eq!(s.id, "doc1");
        assert_eq!(s.v, 0);
        assert!(!s.exists());
        assert!(s.data.is_none());
    }

    #[test]
    fn test_existing_snapshot_serializes_type_field() {
        let s = Snapshot {
            id: "doc1".into(),
            v: 3,
            type_uri: Some("https://tandem.rs/types/counter".into()),
            data: Some(json!(8)),
            meta: None,
        };
        let v = serde_json::to_value(&s).unwrap();
        assert_eq!(v["type"], "https://tandem.rs/types/counter");
        assert_eq!(v["v"], 3);
        assert_eq!(v["data"], 8);
        assert!(v.get("meta").is_none());
    }

    #[test]
    fn test_nonexistent_omits_type_and_data() {
        let v = serde_json::to_value(Snapshot::empty("d")).unwrap();
        assert!(v.get("type").is_none());
        assert!(v.get("data").is_none());
    }
}
