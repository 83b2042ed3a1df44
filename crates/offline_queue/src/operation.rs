//! Pending write operations.
//!
//! A `PendingOperation` is one observation-side write captured while the
//! remote store may be unreachable. Its `id` is generated on the client at
//! enqueue time and doubles as the idempotency key presented to the remote
//! store, so replaying an entry after a partial failure never creates a
//! second record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Client-generated identifier for a queued operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationId(Uuid);

impl OperationId {
    /// Generate a fresh random id.
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Build an id from a fixed value (deterministic ids for tests and fixtures).
    pub fn from_u128(value: u128) -> Self {
        Self(Uuid::from_u128(value))
    }

    /// The underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// The id as the string sent to the remote store.
    pub fn idempotency_key(&self) -> String {
        self.0.to_string()
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for OperationId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// The kind of remote write an operation performs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OperationKind {
    CreateObservation,
    UpdateObservation,
    DeleteMedia,
    CreateEvaluationSet,
    UpdatePlayerStatus,
}

impl OperationKind {
    /// All kinds, in declaration order.
    pub const ALL: [OperationKind; 5] = [
        OperationKind::CreateObservation,
        OperationKind::UpdateObservation,
        OperationKind::DeleteMedia,
        OperationKind::CreateEvaluationSet,
        OperationKind::UpdatePlayerStatus,
    ];

    /// Stable name used in logs and on disk.
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::CreateObservation => "create-observation",
            OperationKind::UpdateObservation => "update-observation",
            OperationKind::DeleteMedia => "delete-media",
            OperationKind::CreateEvaluationSet => "create-evaluation-set",
            OperationKind::UpdatePlayerStatus => "update-player-status",
        }
    }

    /// Whether the operation inserts a new record keyed by the operation id.
    pub fn is_create(&self) -> bool {
        matches!(
            self,
            OperationKind::CreateObservation | OperationKind::CreateEvaluationSet
        )
    }

    /// Whether the payload must name an existing target record.
    pub fn requires_target(&self) -> bool {
        !self.is_create()
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of a queued entry.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    /// Waiting to be submitted (or retried).
    #[default]
    Pending,
    /// Retry budget exhausted; held for manual resolution.
    Abandoned,
}

/// Why a submission attempt failed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AttemptFailure {
    /// Human-readable reason, kept as `last_error`.
    pub message: String,
    /// Permanent failures count toward abandonment; transient ones never do.
    pub permanent: bool,
}

impl AttemptFailure {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            permanent: false,
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            permanent: true,
        }
    }
}

/// A queued write waiting for confirmation from the remote store.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PendingOperation {
    pub id: OperationId,
    pub kind: OperationKind,
    pub payload: Value,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub attempts: u32,
    #[serde(default)]
    pub last_error: Option<String>,
    #[serde(default)]
    pub status: EntryStatus,
    #[serde(default)]
    pub abandoned_at: Option<DateTime<Utc>>,
    /// An earlier operation that must be confirmed before this one runs.
    #[serde(default)]
    pub depends_on: Option<OperationId>,
}

impl PendingOperation {
    /// Create a new operation with a fresh client-generated id.
    pub fn new(kind: OperationKind, payload: Value) -> Self {
        Self {
            id: OperationId::generate(),
            kind,
            payload,
            created_at: Utc::now(),
            attempts: 0,
            last_error: None,
            status: EntryStatus::Pending,
            abandoned_at: None,
            depends_on: None,
        }
    }

    /// Record a new observation. The operation id becomes the record id.
    pub fn create_observation(record: Value) -> Self {
        Self::new(OperationKind::CreateObservation, record)
    }

    /// Patch fields of an existing observation.
    pub fn update_observation(observation_id: impl Into<String>, changes: Value) -> Self {
        Self::new(
            OperationKind::UpdateObservation,
            json!({ "target_id": observation_id.into(), "changes": changes }),
        )
    }

    /// Delete a media attachment of an observation.
    pub fn delete_media(media_id: impl Into<String>) -> Self {
        Self::new(
            OperationKind::DeleteMedia,
            json!({ "target_id": media_id.into() }),
        )
    }

    /// Record a set of evaluation scores. The operation id becomes the record id.
    pub fn create_evaluation_set(record: Value) -> Self {
        Self::new(OperationKind::CreateEvaluationSet, record)
    }

    /// Move a player to another pipeline status.
    pub fn update_player_status(player_id: impl Into<String>, status: impl Into<String>) -> Self {
        Self::new(
            OperationKind::UpdatePlayerStatus,
            json!({ "target_id": player_id.into(), "changes": { "status": status.into() } }),
        )
    }

    /// Use a caller-supplied id instead of the generated one.
    pub fn with_id(mut self, id: OperationId) -> Self {
        self.id = id;
        self
    }

    /// Declare that this operation must not run before `id` is confirmed.
    pub fn depending_on(mut self, id: OperationId) -> Self {
        self.depends_on = Some(id);
        self
    }

    /// Id of the record an update/delete targets.
    pub fn target_id(&self) -> Option<&str> {
        self.payload.get("target_id").and_then(Value::as_str)
    }

    /// Field changes of an update.
    pub fn changes(&self) -> Option<&Value> {
        self.payload.get("changes")
    }

    pub fn is_pending(&self) -> bool {
        self.status == EntryStatus::Pending
    }

    pub fn is_abandoned(&self) -> bool {
        self.status == EntryStatus::Abandoned
    }
}
