// Backend collaborator - every read, write and subscription goes through here
pub mod memory;
pub mod models;
pub mod realtime;
pub mod sqlite;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

pub use memory::{Fault, MemoryBackend};
pub use models::*;
pub use realtime::{Delivery, MessageInserted, RealtimeHub, Subscription};
pub use sqlite::SqliteBackend;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("Pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("SQL error: {0}")]
    Sql(#[from] rusqlite::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Backend unavailable: {0}")]
    Unavailable(String),
}

pub type BackendResult<T> = Result<T, BackendError>;

/// Table-level access to profiles, pods, memberships and messages, plus
/// identity storage and insert notifications.
///
/// The backend is authoritative. Callers never cache across calls what the
/// backend can answer.
#[async_trait]
pub trait Backend: Send + Sync {
    // -- profiles --

    async fn profile_by_user(&self, user_id: &UserId) -> BackendResult<Option<Profile>>;

    async fn profile_by_id(&self, id: &ProfileId) -> BackendResult<Option<Profile>>;

    async fn insert_profile(&self, user_id: &UserId, fields: ProfileFields)
        -> BackendResult<Profile>;

    /// Replace the mutable attributes of the profile owned by `user_id`.
    async fn update_profile(&self, user_id: &UserId, fields: ProfileFields)
        -> BackendResult<Profile>;

    // -- pods --

    async fn pod(&self, id: &PodId) -> BackendResult<Option<Pod>>;

    /// Every pod, oldest first, with member profiles in join order.
    async fn pods_with_members(&self) -> BackendResult<Vec<PodWithMembers>>;

    async fn insert_pod(&self, new: NewPod) -> BackendResult<Pod>;

    /// Returns whether a row was deleted.
    async fn delete_pod(&self, id: &PodId) -> BackendResult<bool>;

    /// Fails with `Conflict` when the profile already belongs to the pod.
    async fn insert_member(&self, pod_id: &PodId, profile_id: &ProfileId)
        -> BackendResult<PodMember>;

    // -- messages --

    /// Messages of a pod ascending by creation time, senders joined.
    async fn messages_with_senders(&self, pod_id: &PodId)
        -> BackendResult<Vec<MessageWithSender>>;

    /// Insert a message and notify subscribers of the pod.
    async fn insert_message(&self, new: NewMessage) -> BackendResult<Message>;

    async fn subscribe_messages(&self, pod_id: &PodId) -> BackendResult<Subscription>;

    // -- identity --

    async fn insert_user(&self, email: &str, password_hash: &str) -> BackendResult<UserRecord>;

    async fn user_by_email(&self, email: &str) -> BackendResult<Option<UserRecord>>;

    async fn create_session(
        &self,
        user_id: &UserId,
        token: &str,
        expires_at: DateTime<Utc>,
    ) -> BackendResult<()>;

    /// Identity behind a session token that has not expired.
    async fn session_user(&self, token: &str) -> BackendResult<Option<UserId>>;

    async fn delete_session(&self, token: &str) -> BackendResult<()>;
}

/// Shared handle used by every component and by the router state.
pub type DynBackend = Arc<dyn Backend>;
