//! The authoritative commit path: fetch, transform, apply, commit.
//!
//! A submitted op authored against an old version is rebased forward over
//! the log tail, one committed op at a time, then applied to a copy of the
//! snapshot and committed with a compare-and-swap. A CAS conflict restarts
//! the whole turn from a fresh deep copy of the input, bounded by
//! `max_retries`.

use crate::error::OtError;
use crate::kernel::{apply, check_op, transform};
use crate::op::{Operation, StoredOp};
use crate::server::store::Storage;
use crate::snapshot::Snapshot;
use crate::types::TypeRegistry;

/// Default bound on CAS retries.
pub const DEFAULT_MAX_RETRIES: u32 = 10;

/// The outcome of a successful submission.
#[derive(Debug, Clone)]
pub struct SubmitResult {
    /// The committed op, rebased to the version it was applied at.
    pub op: Operation,
    /// The snapshot after the commit.
    pub snapshot: Snapshot,
    /// The historical ops the submission was transformed against.
    pub ops: Vec<StoredOp>,
}

/// Validate, rebase, apply, and commit one operation.
pub async fn submit_op(
    store: &dyn Storage,
    registry: &TypeRegistry,
    collection: &str,
    id: &str,
    op: &Operation,
    max_retries: u32,
) -> Result<SubmitResult, OtError> {
    check_op(op, registry)?;

    for attempt_no in 0..max_retries {
        let snapshot = store.get_snapshot(collection, id).await?;

        // Retries must start from the caller's op, not a half-transformed one.
        let mut attempt = op.clone();
        let base = *attempt.v.get_or_insert(snapshot.v);

        if base > snapshot.v {
            return Err(OtError::BadlyFormed(format!(
                "op version {base} is ahead of the document ({})",
                snapshot.v
            )));
        }

        let mut historical = Vec::new();
        if base < snapshot.v {
            historical = store.get_ops(collection, id, base, Some(snapshot.v)).await?;
            let expected = (snapshot.v - base) as usize;
            if historical.len() < expected {
                return Err(OtError::TransformOpsNotFound {
                    from: base,
                    to: snapshot.v,
                    got: historical.len(),
                });
            }
            for stored in &historical {
                if attempt.same_identity(&stored.op) {
                    return Err(OtError::OpAlreadySubmitted);
                }
                transform(registry, snapshot.type_uri.as_deref(), &mut attempt, &stored.op)?;
            }
        }

        let mut next = snapshot.clone();
        apply(&mut next, &attempt, registry)?;

        if store.commit(collection, id, &attempt, &next).await? {
            log::debug!(
                "committed {collection}/{id} v{} -> v{}",
                attempt.v.unwrap_or(0),
                next.v
            );
            return Ok(SubmitResult {
                op: attempt,
                snapshot: next,
                ops: historical,
            });
        }

        log::debug!(
            "commit conflict on {collection}/{id} at v{} (attempt {})",
            next.v,
            attempt_no + 1
        );
    }

    Err(OtError::MaxSubmitRetriesExceeded(max_retries))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::store::MemoryStore;
    use serde_json::json;
    use std::sync::Arc;

    fn registry() -> Arc<TypeRegistry> {
        TypeRegistry::with_defaults()
    }

    #[tokio::test]
    async fn test_create_then_edit() {
        let store = MemoryStore::new();
        let r = registry();

        let res = submit_op(
            &store,
            &r,
            "notes",
            "d1",
            &Operation::create("counter", Some(json!(0))),
            DEFAULT_MAX_RETRIES,
        )
        .await
        .unwrap();
        assert_eq!(res.snapshot.v, 1);
        assert_eq!(res.op.v, Some(0));
        assert!(res.ops.is_empty());

        let res = submit_op(
            &store,
            &r,
            "notes",
            "d1",
            &Operation::edit(json!(10)).with_v(1),
            DEFAULT_MAX_RETRIES,
        )
        .await
        .unwrap();
        assert_eq!(res.snapshot.v, 2);
        assert_eq!(res.snapshot.data, Some(json!(10)));
    }

    #[tokio::test]
    async fn test_op_without_version_is_accepted_at_head() {
        let store = MemoryStore::new();
        let r = registry();
        submit_op(&store, &r, "notes", "d1", &Operation::create("counter", None), 10)
            .await
            .unwrap();

        let res = submit_op(&store, &r, "notes", "d1", &Operation::edit(json!(4)), 10)
            .await
            .unwrap();
        assert_eq!(res.op.v, Some(1));
        assert_eq!(res.snapshot.data, Some(json!(4)));
    }

    #[tokio::test]
    async fn test_stale_op_is_rebased_over_the_log() {
        let store = MemoryStore::new();
        let r = registry();
        submit_op(&store, &r, "notes", "d1", &Operation::create("counter", Some(json!(0))), 10)
            .await
            .unwrap();
        submit_op(&store, &r, "notes", "d1", &Operation::edit(json!(10)).with_v(1), 10)
            .await
            .unwrap();

        // Authored against v1, submitted when the head is v2.
        let res = submit_op(&store, &r, "notes", "d1", &Operation::edit(json!(5)).with_v(1), 10)
            .await
            .unwrap();
        assert_eq!(res.op.v, Some(2));
        assert_eq!(res.ops.len(), 1);
        assert_eq!(res.snapshot.v, 3);
        assert_eq!(res.snapshot.data, Some(json!(15)));
    }

    #[tokio::test]
    async fn test_op_ahead_of_server_is_badly_formed() {
        let store = MemoryStore::new();
        let r = registry();
        let err = submit_op(
            &store,
            &r,
            "notes",
            "d1",
            &Operation::create("counter", None).with_v(5),
            10,
        )
        .await
        .unwrap_err();
        assert_eq!(err.code(), "BadlyFormed");
    }

    #[tokio::test]
    async fn test_duplicate_identity_is_rejected() {
        let store = MemoryStore::new();
        let r = registry();
        submit_op(&store, &r, "notes", "d1", &Operation::create("counter", None), 10)
            .await
            .unwrap();

        let mut op = Operation::edit(json!(3)).with_v(1);
        op.src = Some("c1".into());
        op.seq = Some(1);
        submit_op(&store, &r, "notes", "d1", &op, 10).await.unwrap();

        // The same (src, seq) replayed against its original base version.
        let err = submit_op(&store, &r, "notes", "d1", &op, 10).await.unwrap_err();
        assert_eq!(err, OtError::OpAlreadySubmitted);

        // The first commit stands alone in the log.
        let matching = store
            .get_ops("notes", "d1", 0, None)
            .await
            .unwrap()
            .into_iter()
            .filter(|stored| stored.op.same_identity(&op))
            .count();
        assert_eq!(matching, 1);
    }

    #[tokio::test]
    async fn test_edit_on_nonexistent_doc_fails() {
        let store = MemoryStore::new();
        let r = registry();
        let err = submit_op(&store, &r, "notes", "ghost", &Operation::edit(json!(1)), 10)
            .await
            .unwrap_err();
        assert_eq!(err, OtError::DoesNotExist);
    }

    #[tokio::test]
    async fn test_create_on_existing_doc_fails() {
        let store = MemoryStore::new();
        let r = registry();
        submit_op(&store, &r, "notes", "d1", &Operation::create("counter", None), 10)
            .await
            .unwrap();
        let err = submit_op(
            &store,
            &r,
            "notes",
            "d1",
            &Operation::create("counter", None).with_v(1),
            10,
        )
        .await
        .unwrap_err();
        assert_eq!(err, OtError::AlreadyCreated);
    }

    #[tokio::test]
    async fn test_malformed_op_rejected_before_touching_the_store() {
        let store = MemoryStore::new();
        let r = registry();
        let err = submit_op(&store, &r, "notes", "d1", &Operation::default(), 10)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "BadlyFormed");
        assert_eq!(store.doc_count().await, 0);
    }

    #[tokio::test]
    async fn test_delete_then_edit_fails_with_was_deleted() {
        let store = MemoryStore::new();
        let r = registry();
        submit_op(&store, &r, "notes", "d1", &Operation::create("counter", None), 10)
            .await
            .unwrap();
        submit_op(&store, &r, "notes", "d1", &Operation::delete().with_v(1), 10)
            .await
            .unwrap();

        // An edit authored before the delete rebases into WasDeleted.
        let err = submit_op(&store, &r, "notes", "d1", &Operation::edit(json!(1)).with_v(1), 10)
            .await
            .unwrap_err();
        assert_eq!(err, OtError::WasDeleted);
    }

    #[tokio::test]
    async fn test_text_rebase_at_server() {
        use crate::types::insert_op;

        let store = MemoryStore::new();
        let r = registry();
        submit_op(
            &store,
            &r,
            "notes",
            "d1",
            &Operation::create("simple-text", Some(json!("hello"))),
            10,
        )
        .await
        .unwrap();

        // A commits first at v1; B's op at the same base gets rebased.
        submit_op(&store, &r, "notes", "d1", &Operation::edit(insert_op(1, "X")).with_v(1), 10)
            .await
            .unwrap();
        let res = submit_op(
            &store,
            &r,
            "notes",
            "d1",
            &Operation::edit(insert_op(4, "Y")).with_v(1),
            10,
        )
        .await
        .unwrap();

        assert_eq!(res.snapshot.data, Some(json!("hXellYo")));
        assert_eq!(res.snapshot.v, 3);
    }
}
