//! Remote capabilities consumed by the scout sync engine.
//!
//! The engine never talks to the network directly. It goes through the
//! capability traits defined here:
//!
//! - [`RecordStore`]: select/insert/update/delete on named collections, with
//!   filter predicates, ordering and a clamped row limit. Inserts are
//!   idempotent on the client-supplied `id`.
//! - [`AuthCapability`]: sign in/out and password changes, feeding the
//!   explicitly constructed [`SessionContext`].
//! - [`ObjectStorage`]: list/download/upload of binary attachments.
//! - [`PrivilegedFunctions`]: admin-only server procedures.
//!
//! Each capability has an HTTP binding under [`http`] and, where useful for
//! tests and offline demos, an in-memory binding under [`memory`].
//!
//! Every error maps to an [`ErrorClass`] (transient, permanent or conflict)
//! through one table, [`RemoteError::class`].

pub mod auth;
pub mod config;
pub mod error;
pub mod functions;
pub mod http;
pub mod memory;
pub mod migration;
pub mod query;
pub mod record_store;
pub mod session;
pub mod storage;
pub mod subscription;

pub use auth::AuthCapability;
pub use config::{MigrationConfig, RemoteConfig, DEFAULT_BUCKET, DEFAULT_TIMEOUT};
pub use error::{classify_status, ConfigError, ConfigResult, ErrorClass, RemoteError, RemoteResult};
pub use functions::{Invitation, NewUser, PrivilegedFunctions, UserUpdate};
pub use http::{HttpAuth, HttpFunctions, HttpObjectStorage, HttpRecordStore, RestClient};
pub use memory::{MemoryObjectStorage, MemoryRecordStore, RecordCall, RecordMethod};
pub use migration::{BucketMigration, MigrationFailure, MigrationReport};
pub use query::{Filter, Order, Query, MAX_LIMIT};
pub use record_store::{row_id, InsertOutcome, RecordStore, Row};
pub use session::{Session, SessionContext, SessionEvent, UserIdentity};
pub use storage::{ObjectEntry, ObjectStorage, UploadOptions};
pub use subscription::{Subscribers, Subscription};
