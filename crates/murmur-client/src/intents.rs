//! User intents: the callable surface the UI sees.
//!
//! Each intent validates locally, applies whatever optimistic store edit the
//! operation calls for, then issues the remote call. Outcomes are for toast
//! display only — nothing downstream consumes a return value. Ownership and
//! admin checks run locally before any round-trip, so a backend `Denied` is
//! the exception, not the flow.
//!
//! The like toggle is the one operation with a rollback path, and the one
//! with a serialization requirement: overlapping toggles on the same record
//! would let a late failure revert the wrong flip, so a per-`(thought, user)`
//! in-flight guard rejects the second press until the first call resolves.

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, warn};

use murmur_types::{
    NameError, Thought, ThoughtId, ThoughtPatch, UserId, UserProfile, Visibility,
    validate_display_name,
};

use crate::backend::{BackendError, DocumentBackend};
use crate::store::{LikeState, ThoughtStore};

/// Attribution fallback for owners who never claimed a display name.
const FALLBACK_OWNER_NAME: &str = "Unknown";

/// Why an intent was rejected or failed.
#[derive(Debug, Error)]
pub enum IntentError {
    #[error("not signed in")]
    SignedOut,
    #[error("invalid input: {0}")]
    Invalid(String),
    #[error("not allowed: {0}")]
    Forbidden(&'static str),
    #[error("no thought with ID {0}")]
    UnknownThought(ThoughtId),
    /// A like for this record is still in flight — the press is dropped, not
    /// queued.
    #[error("like already in flight for this thought")]
    LikeInFlight,
    #[error(transparent)]
    Backend(#[from] BackendError),
}

impl From<NameError> for IntentError {
    fn from(err: NameError) -> Self {
        IntentError::Invalid(err.to_string())
    }
}

/// The intent handlers, bound to one backend, one store, and the session's
/// identity channel.
pub struct Intents<B> {
    backend: Arc<B>,
    store: Arc<ThoughtStore>,
    profiles: watch::Receiver<Option<UserProfile>>,
    likes_in_flight: DashMap<(ThoughtId, UserId), ()>,
}

impl<B: DocumentBackend> Intents<B> {
    pub fn new(
        backend: Arc<B>,
        store: Arc<ThoughtStore>,
        profiles: watch::Receiver<Option<UserProfile>>,
    ) -> Self {
        Self { backend, store, profiles, likes_in_flight: DashMap::new() }
    }

    fn viewer(&self) -> Result<UserProfile, IntentError> {
        self.profiles.borrow().clone().ok_or(IntentError::SignedOut)
    }

    /// Compose and publish a new thought. The record is visible locally
    /// before the remote create resolves; a failed create is surfaced but the
    /// optimistic copy stays — the next authoritative snapshot reconciles.
    pub async fn create(
        &self,
        title: &str,
        description: &str,
        visibility: Visibility,
    ) -> Result<ThoughtId, IntentError> {
        let viewer = self.viewer()?;
        let title = non_empty(title, "title")?;
        let description = non_empty(description, "description")?;

        let thought = Thought::compose(
            ThoughtId::new(),
            title,
            description,
            visibility,
            viewer.id,
            viewer.display_name.as_deref().unwrap_or(FALLBACK_OWNER_NAME),
        );
        let id = thought.id;
        debug!(thought = %id.short(), %visibility, "creating");

        self.store.insert_newest(thought.clone());
        self.backend.create_thought(thought).await?;
        Ok(id)
    }

    /// Edit title/description/visibility. Owner or admin only.
    pub async fn edit(&self, id: ThoughtId, patch: ThoughtPatch) -> Result<(), IntentError> {
        let viewer = self.viewer()?;
        let thought = self.store.get(id).ok_or(IntentError::UnknownThought(id))?;
        if !thought.editable_by(&viewer) {
            return Err(IntentError::Forbidden("only the owner or an admin may edit"));
        }
        if patch.is_empty() {
            return Err(IntentError::Invalid("nothing to change".into()));
        }
        if let Some(title) = &patch.title {
            non_empty(title, "title")?;
        }
        if let Some(description) = &patch.description {
            non_empty(description, "description")?;
        }

        debug!(thought = %id.short(), "editing");
        self.store.apply_patch(id, &patch);
        self.backend.update_thought(id, patch).await?;
        Ok(())
    }

    /// Delete a thought. Owner always; admin only when the record is public.
    pub async fn delete(&self, id: ThoughtId) -> Result<(), IntentError> {
        let viewer = self.viewer()?;
        let thought = self.store.get(id).ok_or(IntentError::UnknownThought(id))?;
        if !thought.deletable_by(&viewer) {
            return Err(IntentError::Forbidden("not deletable by this user"));
        }

        debug!(thought = %id.short(), "deleting");
        self.store.remove(id);
        self.backend.delete_thought(id).await?;
        Ok(())
    }

    /// Flip the viewer's like, optimistically, and confirm remotely with the
    /// matching atomic set primitive. On remote failure the local flip is
    /// reverted exactly once.
    pub async fn toggle_like(&self, id: ThoughtId) -> Result<LikeState, IntentError> {
        let viewer = self.viewer()?;
        let key = (id, viewer.id);

        // Single confirmed like state per (thought, user): a second press
        // while the first remote call is outstanding is rejected outright.
        match self.likes_in_flight.entry(key) {
            Entry::Occupied(_) => return Err(IntentError::LikeInFlight),
            Entry::Vacant(slot) => {
                slot.insert(());
            }
        }

        let result = self.toggle_like_inner(id, viewer.id).await;
        self.likes_in_flight.remove(&key);
        result
    }

    async fn toggle_like_inner(
        &self,
        id: ThoughtId,
        user: UserId,
    ) -> Result<LikeState, IntentError> {
        let state = self
            .store
            .toggle_like(id, user)
            .ok_or(IntentError::UnknownThought(id))?;

        let outcome = match state {
            LikeState::Liked => self.backend.like_add(id, user).await,
            LikeState::Unliked => self.backend.like_remove(id, user).await,
        };
        if let Err(err) = outcome {
            warn!(thought = %id.short(), %err, "like failed remotely, rolling back");
            self.store.revert_like(id, user);
            return Err(err.into());
        }
        Ok(state)
    }

    /// Claim a display name: trimmed, length-checked locally, uniqueness
    /// enforced by the backend. The session's profile watch pushes the new
    /// name back once written.
    pub async fn claim_display_name(&self, name: &str) -> Result<(), IntentError> {
        let viewer = self.viewer()?;
        let name = validate_display_name(name)?;
        self.backend.claim_display_name(viewer.id, name).await?;
        Ok(())
    }
}

fn non_empty<'a>(value: &'a str, field: &str) -> Result<&'a str, IntentError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(IntentError::Invalid(format!("{field} must not be empty")));
    }
    Ok(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    use async_trait::async_trait;
    use murmur_types::{AuthUser, Stamp};
    use tokio::sync::Notify;

    use crate::backend::{BackendResult, LiveQuery, ProfileWatch, ThoughtQuery};

    /// Backend double for intent-layer tests: point ops succeed unless told
    /// otherwise, likes can be held open to exercise the in-flight guard.
    #[derive(Default)]
    struct StubBackend {
        fail_likes: AtomicBool,
        hold_likes: AtomicBool,
        release: Notify,
    }

    #[async_trait]
    impl DocumentBackend for StubBackend {
        fn subscribe_thoughts(&self, _query: ThoughtQuery) -> BackendResult<LiveQuery> {
            Err(BackendError::Unavailable("stub".into()))
        }

        fn watch_profile(&self, _user: UserId) -> BackendResult<ProfileWatch> {
            Err(BackendError::Unavailable("stub".into()))
        }

        async fn create_thought(&self, _thought: Thought) -> BackendResult<()> {
            Ok(())
        }

        async fn update_thought(&self, _id: ThoughtId, _patch: ThoughtPatch) -> BackendResult<()> {
            Ok(())
        }

        async fn delete_thought(&self, _id: ThoughtId) -> BackendResult<()> {
            Ok(())
        }

        async fn like_add(&self, _id: ThoughtId, _user: UserId) -> BackendResult<()> {
            if self.hold_likes.load(Ordering::SeqCst) {
                self.release.notified().await;
            }
            if self.fail_likes.load(Ordering::SeqCst) {
                return Err(BackendError::Unavailable("injected".into()));
            }
            Ok(())
        }

        async fn like_remove(&self, id: ThoughtId, user: UserId) -> BackendResult<()> {
            self.like_add(id, user).await
        }

        async fn claim_display_name(&self, _user: UserId, _name: &str) -> BackendResult<()> {
            Ok(())
        }
    }

    type Rig = (
        Arc<StubBackend>,
        Arc<ThoughtStore>,
        Intents<StubBackend>,
        // Held by the caller so the identity channel stays open.
        watch::Sender<Option<UserProfile>>,
    );

    fn signed_in(viewer: UserProfile) -> Rig {
        let backend = Arc::new(StubBackend::default());
        let store = Arc::new(ThoughtStore::new());
        let (tx, rx) = watch::channel(Some(viewer));
        let intents = Intents::new(backend.clone(), store.clone(), rx);
        (backend, store, intents, tx)
    }

    fn member(id: UserId) -> UserProfile {
        UserProfile::from_parts(
            AuthUser { id, email_confirmed: true },
            murmur_types::ProfileRecord { display_name: Some("maya".into()), is_admin: false },
        )
    }

    fn seeded(store: &ThoughtStore, owner: UserId, visibility: Visibility) -> ThoughtId {
        let mut t = Thought::compose(ThoughtId::new(), "t", "d", visibility, owner, "someone");
        t.created_at = Stamp::Millis(100);
        let id = t.id;
        store.replace_all(vec![t]);
        id
    }

    #[tokio::test]
    async fn create_rejects_blank_input_before_any_remote_call() {
        let (_backend, store, intents, _identity) = signed_in(member(UserId::new()));
        let err = intents.create("   ", "body", Visibility::Public).await.unwrap_err();
        assert!(matches!(err, IntentError::Invalid(_)));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn create_is_visible_locally_with_pending_stamp() {
        let viewer = member(UserId::new());
        let (_backend, store, intents, _identity) = signed_in(viewer.clone());
        let id = intents.create("hello", "world", Visibility::Private).await.unwrap();

        let local = store.get(id).expect("optimistic copy present");
        assert_eq!(local.owner_id, viewer.id);
        assert_eq!(local.owner_name, "maya");
        assert!(!local.created_at.is_set(), "server clock fills the stamp");
    }

    #[tokio::test]
    async fn signed_out_viewer_cannot_act() {
        let backend = Arc::new(StubBackend::default());
        let store = Arc::new(ThoughtStore::new());
        let (tx, rx) = watch::channel(None);
        let intents = Intents::new(backend, store, rx);
        let err = intents.create("a", "b", Visibility::Public).await.unwrap_err();
        assert!(matches!(err, IntentError::SignedOut));
        drop(tx);
    }

    #[tokio::test]
    async fn edit_by_non_owner_is_forbidden_locally() {
        let (_backend, store, intents, _identity) = signed_in(member(UserId::new()));
        let id = seeded(&store, UserId::new(), Visibility::Public);
        let patch = ThoughtPatch { title: Some("x".into()), ..Default::default() };
        let err = intents.edit(id, patch).await.unwrap_err();
        assert!(matches!(err, IntentError::Forbidden(_)));
        assert_eq!(store.get(id).unwrap().title, "t");
    }

    #[tokio::test]
    async fn admin_delete_of_foreign_private_record_is_forbidden() {
        let admin = UserProfile::from_parts(
            AuthUser { id: UserId::new(), email_confirmed: true },
            murmur_types::ProfileRecord { display_name: None, is_admin: true },
        );
        let (_backend, store, intents, _identity) = signed_in(admin);
        let id = seeded(&store, UserId::new(), Visibility::Private);
        let err = intents.delete(id).await.unwrap_err();
        assert!(matches!(err, IntentError::Forbidden(_)));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn failed_like_rolls_back_exactly_once() {
        let viewer = member(UserId::new());
        let (backend, store, intents, _identity) = signed_in(viewer.clone());
        let id = seeded(&store, UserId::new(), Visibility::Public);
        backend.fail_likes.store(true, Ordering::SeqCst);

        let err = intents.toggle_like(id).await.unwrap_err();
        assert!(matches!(err, IntentError::Backend(_)));
        assert!(!store.get(id).unwrap().is_liked_by(viewer.id), "flip reverted");

        // The guard is released again — the next press goes through.
        backend.fail_likes.store(false, Ordering::SeqCst);
        assert_eq!(intents.toggle_like(id).await.unwrap(), LikeState::Liked);
    }

    #[tokio::test]
    async fn overlapping_toggle_on_same_record_is_rejected() {
        let viewer = member(UserId::new());
        let (backend, store, intents, _identity) = signed_in(viewer);
        let id = seeded(&store, UserId::new(), Visibility::Public);
        backend.hold_likes.store(true, Ordering::SeqCst);

        let intents = Arc::new(intents);
        let first = {
            let intents = intents.clone();
            tokio::spawn(async move { intents.toggle_like(id).await })
        };
        tokio::task::yield_now().await;

        let err = intents.toggle_like(id).await.unwrap_err();
        assert!(matches!(err, IntentError::LikeInFlight));

        backend.release.notify_one();
        assert_eq!(first.await.unwrap().unwrap(), LikeState::Liked);
    }

    #[tokio::test]
    async fn display_name_is_validated_locally() {
        let (_backend, _store, intents, _identity) = signed_in(member(UserId::new()));
        let err = intents.claim_display_name(" ab ").await.unwrap_err();
        assert!(matches!(err, IntentError::Invalid(_)));
        intents.claim_display_name("  maya  ").await.unwrap();
    }
}
