//! Document-level operation algebra: validate, apply, transform.
//!
//! The kernel works on caller-owned buffers: `apply` mutates the snapshot in
//! place, `transform` and `transform_x` mutate the op(s) in place. Callers
//! that need the original clone first; the server's commit loop does exactly
//! that on every retry.

use crate::error::OtError;
use crate::op::Operation;
use crate::snapshot::Snapshot;
use crate::types::{Side, TypeRegistry};

/// Validate the structural well-formedness of an operation.
///
/// Requires exactly one of create/op/del, a registry-resolvable type on
/// create, the literal `true` on delete, and `src`/`seq` set together or not
/// at all.
pub fn check_op(op: &Operation, registry: &TypeRegistry) -> Result<(), OtError> {
    let shapes =
        usize::from(op.create.is_some()) + usize::from(op.op.is_some()) + usize::from(op.del.is_some());
    if shapes != 1 {
        return Err(OtError::BadlyFormed(format!(
            "operation must have exactly one of create/op/del, found {shapes}"
        )));
    }

    if let Some(create) = &op.create {
        if create.type_name.is_empty() {
            return Err(OtError::BadlyFormed("create is missing a type".into()));
        }
        registry.resolve(&create.type_name)?;
    }

    if let Some(del) = op.del {
        if !del {
            return Err(OtError::BadlyFormed("del must be the literal true".into()));
        }
    }

    if op.src.is_some() != op.seq.is_some() {
        return Err(OtError::BadlyFormed(
            "src and seq must be set together".into(),
        ));
    }

    Ok(())
}

/// Apply `op` to `snapshot` in place.
///
/// The version advances by exactly 1 on every successful outcome, including
/// a structural no-op. If both versions are present they must agree.
pub fn apply(snapshot: &mut Snapshot, op: &Operation, registry: &TypeRegistry) -> Result<(), OtError> {
    if let Some(op_v) = op.v {
        if op_v != snapshot.v {
            return Err(OtError::VersionMismatchOnApply {
                snapshot: snapshot.v,
                op: op_v,
            });
        }
    }

    if let Some(create) = &op.create {
        if snapshot.exists() {
            return Err(OtError::AlreadyCreated);
        }
        let ty = registry.resolve(&create.type_name)?;
        snapshot.data = Some(ty.create(create.data.as_ref())?);
        snapshot.type_uri = Some(ty.uri().to_string());
    } else if op.is_delete() {
        snapshot.type_uri = None;
        snapshot.data = None;
    } else if let Some(payload) = &op.op {
        let type_uri = snapshot.type_uri.as_deref().ok_or(OtError::DoesNotExist)?;
        if payload.is_null() {
            return Err(OtError::OpNotProvided);
        }
        let ty = registry.resolve(type_uri)?;
        let data = snapshot.data.as_ref().ok_or(OtError::DoesNotExist)?;
        snapshot.data = Some(ty.apply(data, payload)?);
    }
    // A zeroed op falls through all three arms and still bumps the version.

    snapshot.v += 1;
    Ok(())
}

/// Transform `op` in place to reflect that `applied` was applied first.
///
/// `type_uri` is the document's type, consulted only when both ops are
/// edits. The tie-break side is hard-coded `Left`: the server rebases a
/// submitted op forward over the log with this function, and the submitted
/// op ranks below the already-committed one. On success `op.v` is
/// incremented when present.
pub fn transform(
    registry: &TypeRegistry,
    type_uri: Option<&str>,
    op: &mut Operation,
    applied: &Operation,
) -> Result<(), OtError> {
    if let (Some(a), Some(b)) = (op.v, applied.v) {
        if a != b {
            return Err(OtError::VersionMismatchOnTransform { op: a, applied: b });
        }
    }

    if applied.is_noop() || op.is_noop() || op.is_delete() {
        // Nothing to rewrite; the version still advances below.
    } else if op.is_create() {
        if applied.is_delete() {
            return Err(OtError::WasDeleted);
        }
        return Err(OtError::AlreadyCreated);
    } else {
        // op is an edit.
        if applied.is_delete() {
            return Err(OtError::WasDeleted);
        }
        if applied.is_create() {
            return Err(OtError::AlreadyCreated);
        }
        let uri = type_uri.ok_or(OtError::DoesNotExist)?;
        let ty = registry.resolve(uri)?;
        let ours = op.op.as_ref().ok_or(OtError::OpNotProvided)?;
        let theirs = applied.op.as_ref().ok_or(OtError::OpNotProvided)?;
        op.op = Some(ty.transform(ours, theirs, Side::Left)?);
    }

    if let Some(v) = op.v.as_mut() {
        *v += 1;
    }
    Ok(())
}

/// The client's pairwise rebase: rewrite a local pending/inflight op and an
/// incoming server op, which share a base version, to their transforms.
///
/// A local delete wins locally: the server op is zeroed so later pending
/// ops see a clean base. A server-side delete or create fails the client
/// pipeline; the caller responds with a hard rollback.
pub fn transform_x(
    registry: &TypeRegistry,
    type_uri: Option<&str>,
    client: &mut Operation,
    server: &mut Operation,
) -> Result<(), OtError> {
    if client.is_delete() {
        server.zero();
        return Ok(());
    }
    if server.is_delete() {
        return Err(OtError::WasDeleted);
    }
    if server.is_create() {
        return Err(OtError::AlreadyCreated);
    }
    if server.is_noop() {
        return Ok(());
    }
    if client.is_create() {
        return Err(OtError::AlreadyCreated);
    }

    // Both are edits: the symmetric double transform. The rewritten server
    // op is what gets applied locally on top of the rebased client queue.
    let uri = type_uri.ok_or(OtError::DoesNotExist)?;
    let ty = registry.resolve(uri)?;
    let client_payload = client.op.as_ref().ok_or(OtError::OpNotProvided)?.clone();
    let server_payload = server.op.as_ref().ok_or(OtError::OpNotProvided)?.clone();

    client.op = Some(ty.transform(&client_payload, &server_payload, Side::Left)?);
    server.op = Some(ty.transform(&server_payload, &client_payload, Side::Right)?);
    if let Some(v) = client.v.as_mut() {
        *v += 1;
    }
    Ok(())
}
