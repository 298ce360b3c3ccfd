//! Pluggable OT types.
//!
//! A type owns the payload algebra for one kind of document: how payloads are
//! created, how edit ops mutate them, and how two concurrent edits transform
//! past one another. The kernel is generic over types; convergence rests on
//! each type satisfying the one-step transform property
//!
//! ```text
//! apply(apply(s, a), transform(b, a, Right))
//!     == apply(apply(s, b), transform(a, b, Left))
//! ```
//!
//! for any payload `s` and concurrent edits `a`, `b`.

mod counter;
mod text;

pub use counter::Counter;
pub use text::{delete_op, insert_op, SimpleText};

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use crate::error::OtError;

/// Tie-break side for transforming two ops at the same position.
///
/// `Left` means "do not shift on an equal insert position"; `Right` means
/// "shift". The server transforms a submitted op with `Left` against every
/// already-committed op; the client's pairwise rebase uses `Left` for its
/// own op and `Right` for the incoming server op.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Left,
    Right,
}

/// A registered OT type.
///
/// `apply` and `transform` are pure: they never mutate their inputs.
pub trait OtType: Send + Sync {
    /// Short registration name, e.g. `"counter"`.
    fn name(&self) -> &'static str;

    /// Canonical type URI. Snapshots record this form.
    fn uri(&self) -> &'static str;

    /// Build the initial payload from optional creation data.
    fn create(&self, data: Option<&Value>) -> Result<Value, OtError>;

    /// Apply an edit op to a payload, returning the new payload.
    fn apply(&self, payload: &Value, op: &Value) -> Result<Value, OtError>;

    /// Rewrite `op` to account for `applied` having been applied first.
    fn transform(&self, op: &Value, applied: &Value, side: Side) -> Result<Value, OtError>;

    /// Compose two sequential ops into one, if the type supports it.
    fn compose(&self, _a: &Value, _b: &Value) -> Option<Result<Value, OtError>> {
        None
    }

    /// The op that undoes `op`, if the type supports inversion.
    fn invert(&self, _op: &Value) -> Option<Result<Value, OtError>> {
        None
    }

    /// Canonicalize an op. The default is the identity.
    fn normalize(&self, op: Value) -> Value {
        op
    }
}

impl std::fmt::Debug for dyn OtType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OtType").field("name", &self.name()).finish()
    }
}

/// The process-wide registry of OT types.
///
/// Each type is resolvable under both its short name and its URI. Components
/// receive the registry by reference (`Arc`); there is no global instance.
pub struct TypeRegistry {
    handlers: HashMap<String, Arc<dyn OtType>>,
}

impl TypeRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// A registry seeded with the reference types (counter, simple-text).
    pub fn with_defaults() -> Arc<Self> {
        let mut registry = Self::new();
        registry.register(Arc::new(Counter));
        registry.register(Arc::new(SimpleText));
        Arc::new(registry)
    }

    /// Register a type under both its name and its URI.
    pub fn register(&mut self, ty: Arc<dyn OtType>) {
        self.handlers.insert(ty.name().to_string(), ty.clone());
        self.handlers.insert(ty.uri().to_string(), ty);
    }

    /// Resolve a name or URI to its handler.
    pub fn get(&self, name_or_uri: &str) -> Option<Arc<dyn OtType>> {
        self.handlers.get(name_or_uri).cloned()
    }

    /// Resolve, surfacing `TypeNotRecognized` on a miss.
    pub fn resolve(&self, name_or_uri: &str) -> Result<Arc<dyn OtType>, OtError> {
        self.get(name_or_uri)
            .ok_or_else(|| OtError::TypeNotRecognized(name_or_uri.to_string()))
    }
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&str> = self.handlers.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        f.debug_struct("TypeRegistry").field("types", &names).finish()
    }
}
