//! Submission of one queued operation to the remote record store.
//!
//! Each [`OperationKind`] maps to exactly one remote call. Creates insert a
//! row whose `id` is the operation id, so a replay after a crash between the
//! remote confirmation and the local `remove` finds the row already there.

use offline_queue::{OperationKind, PendingOperation};
use remote::{Filter, InsertOutcome, RecordStore, RemoteError, RemoteResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Remote collection names per record family.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Collections {
    pub observations: String,
    pub media: String,
    pub evaluation_sets: String,
    pub players: String,
}

impl Default for Collections {
    fn default() -> Self {
        Self {
            observations: "observations".to_string(),
            media: "observation_media".to_string(),
            evaluation_sets: "evaluation_sets".to_string(),
            players: "players".to_string(),
        }
    }
}

impl Collections {
    /// Collection a given kind writes to.
    pub fn for_kind(&self, kind: OperationKind) -> &str {
        match kind {
            OperationKind::CreateObservation | OperationKind::UpdateObservation => {
                &self.observations
            }
            OperationKind::DeleteMedia => &self.media,
            OperationKind::CreateEvaluationSet => &self.evaluation_sets,
            OperationKind::UpdatePlayerStatus => &self.players,
        }
    }
}

/// How the remote store accepted a submission.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Submission {
    /// The write took effect now.
    Applied,
    /// An earlier delivery of the same operation already took effect.
    AlreadyApplied,
}

/// Check that an operation carries what its kind needs.
///
/// Runs at enqueue time so malformed writes are refused up front instead of
/// burning their attempt budget later.
pub fn validate(operation: &PendingOperation) -> Result<(), String> {
    if operation.kind.is_create() {
        if !operation.payload.is_object() {
            return Err(format!("{} payload must be an object", operation.kind));
        }
        if let Some(id) = operation.payload.get("id") {
            if id.as_str() != Some(operation.id.to_string().as_str()) {
                return Err(format!(
                    "{} payload id {} does not match operation id {}",
                    operation.kind, id, operation.id
                ));
            }
        }
        return Ok(());
    }

    if operation.target_id().is_none() {
        return Err(format!("{} requires a target_id", operation.kind));
    }
    if operation.kind != OperationKind::DeleteMedia
        && !operation.changes().is_some_and(Value::is_object)
    {
        return Err(format!("{} requires an object of changes", operation.kind));
    }
    Ok(())
}

/// Issue the remote call for `operation`.
pub async fn submit<R>(
    remote: &R,
    collections: &Collections,
    operation: &PendingOperation,
) -> RemoteResult<Submission>
where
    R: RecordStore,
{
    let collection = collections.for_kind(operation.kind);

    if operation.kind.is_create() {
        let mut record = operation.payload.clone();
        let Some(fields) = record.as_object_mut() else {
            return Err(RemoteError::InvalidPayload(format!(
                "{} payload must be an object",
                operation.kind
            )));
        };
        fields.insert("id".to_string(), Value::String(operation.id.idempotency_key()));

        return match remote.insert(collection, record).await {
            Ok(InsertOutcome::Created(_)) => Ok(Submission::Applied),
            Ok(InsertOutcome::AlreadyExists) => Ok(Submission::AlreadyApplied),
            Err(e) => Err(e),
        };
    }

    let target = operation.target_id().ok_or_else(|| {
        RemoteError::InvalidPayload(format!("{} without target_id", operation.kind))
    })?;
    let filters = [Filter::eq("id", target)];

    if operation.kind == OperationKind::DeleteMedia {
        let deleted = remote.delete(collection, &filters).await?;
        if deleted == 0 {
            tracing::debug!(operation_id = %operation.id, media_id = target, "Media already deleted");
            return Ok(Submission::AlreadyApplied);
        }
        return Ok(Submission::Applied);
    }

    let changes = operation
        .changes()
        .filter(|c| c.is_object())
        .cloned()
        .ok_or_else(|| {
            RemoteError::InvalidPayload(format!("{} without an object of changes", operation.kind))
        })?;
    let updated = remote.update(collection, &filters, changes).await?;
    if updated.is_empty() {
        return Err(RemoteError::NotFound {
            collection: collection.to_string(),
            id: target.to_string(),
        });
    }
    Ok(Submission::Applied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use remote::{ErrorClass, MemoryRecordStore};
    use serde_json::json;

    #[tokio::test]
    async fn test_create_uses_operation_id_as_record_id() {
        let remote = MemoryRecordStore::new();
        let op = PendingOperation::create_observation(json!({ "player_id": "p-1", "rating": 4 }));

        let outcome = submit(&remote, &Collections::default(), &op).await.unwrap();
        assert_eq!(outcome, Submission::Applied);

        let rows = remote.rows("observations");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["id"], op.id.to_string());
        assert_eq!(rows[0]["rating"], 4);
    }

    #[tokio::test]
    async fn test_replayed_create_is_already_applied() {
        let remote = MemoryRecordStore::new();
        let op = PendingOperation::create_evaluation_set(json!({ "scores": [3, 4] }));
        let collections = Collections::default();

        submit(&remote, &collections, &op).await.unwrap();
        let again = submit(&remote, &collections, &op).await.unwrap();

        assert_eq!(again, Submission::AlreadyApplied);
        assert_eq!(remote.rows("evaluation_sets").len(), 1);
    }

    #[tokio::test]
    async fn test_conflict_on_create_is_an_error() {
        let remote = MemoryRecordStore::new();
        remote.fail_next(RemoteError::Http {
            status: 409,
            body: "23503 insert violates foreign key constraint".into(),
        });
        let op = PendingOperation::create_evaluation_set(json!({ "observation_id": "o-gone" }));

        let err = submit(&remote, &Collections::default(), &op).await.unwrap_err();
        assert!(err.is_conflict());
        assert!(remote.rows("evaluation_sets").is_empty());
    }

    #[tokio::test]
    async fn test_update_of_missing_record_is_permanent() {
        let remote = MemoryRecordStore::new();
        let op = PendingOperation::update_observation("gone", json!({ "rating": 2 }));

        let err = submit(&remote, &Collections::default(), &op).await.unwrap_err();
        assert!(matches!(err, RemoteError::NotFound { .. }));
        assert_eq!(err.class(), ErrorClass::Permanent);
    }

    #[tokio::test]
    async fn test_update_player_status_patches_row() {
        let remote = MemoryRecordStore::new();
        remote.seed("players", [json!({ "id": "p-9", "status": "watch" })]);
        let op = PendingOperation::update_player_status("p-9", "trial");

        submit(&remote, &Collections::default(), &op).await.unwrap();
        assert_eq!(remote.rows("players")[0]["status"], "trial");
    }

    #[tokio::test]
    async fn test_delete_media_is_idempotent() {
        let remote = MemoryRecordStore::new();
        remote.seed("observation_media", [json!({ "id": "m-1" })]);
        let op = PendingOperation::delete_media("m-1");
        let collections = Collections::default();

        assert_eq!(submit(&remote, &collections, &op).await.unwrap(), Submission::Applied);
        assert_eq!(
            submit(&remote, &collections, &op).await.unwrap(),
            Submission::AlreadyApplied
        );
    }

    #[test]
    fn test_validate_rejects_malformed_operations() {
        assert!(validate(&PendingOperation::create_observation(json!([1, 2]))).is_err());
        assert!(validate(&PendingOperation::create_observation(json!({ "id": "other" }))).is_err());
        assert!(validate(&PendingOperation::update_observation("o-1", json!("x"))).is_err());
        assert!(validate(&PendingOperation::new(OperationKind::DeleteMedia, json!({}))).is_err());

        assert!(validate(&PendingOperation::create_observation(json!({}))).is_ok());
        assert!(validate(&PendingOperation::delete_media("m-1")).is_ok());
        assert!(validate(&PendingOperation::update_player_status("p-1", "signed")).is_ok());
    }
}
