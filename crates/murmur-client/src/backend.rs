//! The document backend port.
//!
//! Everything the engine needs from the hosted store, expressed as one async
//! trait so the engine stays testable against [`murmur-memdb`] and agnostic
//! about the real transport. The backend owns query/index enforcement,
//! security rules, and reconnection policy — none of that is re-specified
//! here.
//!
//! Subscription contract: a [`LiveQuery`] re-delivers its **full** matching
//! result set on every relevant backend change, newest creation first.
//! Dropping its [`SubscriptionGuard`] cancels the subscription and closes the
//! snapshot channel; after the drop no further snapshots are delivered.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use murmur_types::{ProfileRecord, Thought, ThoughtId, ThoughtPatch, UserId};

/// Which live result set to open.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ThoughtQuery {
    /// Every record with public visibility (a record without the field counts
    /// as public), any owner.
    Public,
    /// Every record owned by the user, any visibility.
    OwnedBy(UserId),
    /// Every record — the moderation view. The backend admits admins only.
    All,
}

impl std::fmt::Display for ThoughtQuery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ThoughtQuery::Public => write!(f, "public"),
            ThoughtQuery::OwnedBy(user) => write!(f, "owned-by:{}", user.short()),
            ThoughtQuery::All => write!(f, "all"),
        }
    }
}

/// Errors from the backend collaborator.
#[derive(Debug, Error)]
pub enum BackendError {
    /// Transient network/backend failure — retryable, surfaced to the user.
    #[error("backend unavailable: {0}")]
    Unavailable(String),
    /// Security-rule rejection. Intent handlers pre-check locally, so seeing
    /// this means the local check and the rules disagree.
    #[error("permission denied: {0}")]
    Denied(String),
    #[error("no document with ID {0}")]
    NotFound(ThoughtId),
    /// Another user already holds the requested display name.
    #[error("display name \"{0}\" is taken")]
    NameTaken(String),
}

pub type BackendResult<T> = Result<T, BackendError>;

/// Cancels a subscription when dropped.
pub struct SubscriptionGuard {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl SubscriptionGuard {
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self { cancel: Some(Box::new(cancel)) }
    }

    /// A guard with nothing to cancel (already-closed sources).
    pub fn noop() -> Self {
        Self { cancel: None }
    }
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl std::fmt::Debug for SubscriptionGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionGuard").finish_non_exhaustive()
    }
}

/// A live thought query: full snapshots plus the teardown guard.
#[derive(Debug)]
pub struct LiveQuery {
    pub snapshots: mpsc::UnboundedReceiver<Vec<Thought>>,
    pub guard: SubscriptionGuard,
}

/// A live per-document watch on one user's profile.
#[derive(Debug)]
pub struct ProfileWatch {
    pub updates: mpsc::UnboundedReceiver<ProfileRecord>,
    pub guard: SubscriptionGuard,
}

/// The document store the engine talks to.
///
/// Point writes resolve asynchronously; the authoritative record state always
/// arrives through the live queries, never through a write's return value.
/// The server assigns `created_at`/`updated_at` with its own clock at write
/// time — local stamps on submitted records are ignored.
#[async_trait]
pub trait DocumentBackend: Send + Sync {
    /// Open a live result set. Delivery starts with the current matching set.
    fn subscribe_thoughts(&self, query: ThoughtQuery) -> BackendResult<LiveQuery>;

    /// Watch one user's profile document for role/display-name changes.
    fn watch_profile(&self, user: UserId) -> BackendResult<ProfileWatch>;

    async fn create_thought(&self, thought: Thought) -> BackendResult<()>;

    async fn update_thought(&self, id: ThoughtId, patch: ThoughtPatch) -> BackendResult<()>;

    async fn delete_thought(&self, id: ThoughtId) -> BackendResult<()>;

    /// Field-level atomic set-add on `liked_by` — no read-modify-write race
    /// server-side.
    async fn like_add(&self, id: ThoughtId, user: UserId) -> BackendResult<()>;

    /// Field-level atomic set-remove on `liked_by`.
    async fn like_remove(&self, id: ThoughtId, user: UserId) -> BackendResult<()>;

    /// Uniqueness-checked display-name claim plus profile write.
    async fn claim_display_name(&self, user: UserId, name: &str) -> BackendResult<()>;
}
