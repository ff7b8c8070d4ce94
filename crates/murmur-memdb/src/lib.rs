//! In-memory push-based document backend.
//!
//! A complete [`DocumentBackend`] for local runs and tests: documents and
//! profiles live in interior-locked maps, and every mutation re-delivers the
//! full matching, sorted result set to each open live query — the same
//! redelivery contract the hosted store honors. Security rules are enforced
//! against an ambient signed-in identity ([`MemBackend::sign_in`]), the way
//! a hosted SDK carries its auth context.
//!
//! Test affordances: injectable single-shot faults ([`MemBackend::fail_next`])
//! to drive rollback paths, and a delivery counter so teardown can be
//! asserted (no pushes after a guard drops).

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tracing::{debug, trace};

use murmur_client::{
    BackendError, BackendResult, DocumentBackend, LiveQuery, ProfileWatch, SubscriptionGuard,
    ThoughtQuery,
};
use murmur_types::{ProfileRecord, Stamp, Thought, ThoughtId, ThoughtPatch, UserId, Visibility};

/// Which operation the next injected fault should hit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Fault {
    Create,
    Update,
    Delete,
    LikeAdd,
    LikeRemove,
    ClaimName,
}

struct ThoughtSub {
    id: u64,
    query: ThoughtQuery,
    tx: mpsc::UnboundedSender<Vec<Thought>>,
}

struct ProfileSub {
    id: u64,
    user: UserId,
    tx: mpsc::UnboundedSender<ProfileRecord>,
}

struct Inner {
    thoughts: RwLock<BTreeMap<ThoughtId, Thought>>,
    profiles: RwLock<HashMap<UserId, ProfileRecord>>,
    thought_subs: RwLock<Vec<ThoughtSub>>,
    profile_subs: RwLock<Vec<ProfileSub>>,
    auth: RwLock<Option<UserId>>,
    next_sub_id: AtomicU64,
    /// Server clock: starts at wall time, advances 1ms per stamp so writes in
    /// the same instant still order deterministically.
    clock: AtomicI64,
    fault: Mutex<Option<Fault>>,
    deliveries: AtomicU64,
}

/// The in-memory backend. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct MemBackend {
    inner: Arc<Inner>,
}

impl Default for MemBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemBackend {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                thoughts: RwLock::new(BTreeMap::new()),
                profiles: RwLock::new(HashMap::new()),
                thought_subs: RwLock::new(Vec::new()),
                profile_subs: RwLock::new(Vec::new()),
                auth: RwLock::new(None),
                next_sub_id: AtomicU64::new(0),
                clock: AtomicI64::new(Stamp::Unset.millis()),
                fault: Mutex::new(None),
                deliveries: AtomicU64::new(0),
            }),
        }
    }

    // ── Test / host controls ───────────────────────────────────────────────

    /// Set the ambient signed-in identity the security rules evaluate.
    pub fn sign_in(&self, user: Option<UserId>) {
        *self.inner.auth.write() = user;
    }

    /// Create or replace a profile document and notify its watchers.
    pub fn upsert_profile(&self, user: UserId, record: ProfileRecord) {
        self.inner.profiles.write().insert(user, record.clone());
        let subs = self.inner.profile_subs.read();
        for sub in subs.iter().filter(|s| s.user == user) {
            let _ = sub.tx.send(record.clone());
        }
    }

    /// Insert a record as-is (stamping it if unset) and push to live queries.
    /// Bypasses rules — for seeding fixtures.
    pub fn seed_thought(&self, mut thought: Thought) {
        if !thought.created_at.is_set() {
            thought.created_at = Stamp::Millis(self.tick());
        }
        self.inner.thoughts.write().insert(thought.id, thought);
        self.push_thoughts();
    }

    /// Arrange for the next matching operation to fail with `Unavailable`.
    pub fn fail_next(&self, fault: Fault) {
        *self.inner.fault.lock() = Some(fault);
    }

    /// Total snapshot pushes so far, across all live queries.
    pub fn delivery_count(&self) -> u64 {
        self.inner.deliveries.load(Ordering::SeqCst)
    }

    /// Direct read of one record — for test assertions.
    pub fn thought(&self, id: ThoughtId) -> Option<Thought> {
        self.inner.thoughts.read().get(&id).cloned()
    }

    // ── Internals ──────────────────────────────────────────────────────────

    fn tick(&self) -> i64 {
        self.inner.clock.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn take_fault(&self, op: Fault) -> BackendResult<()> {
        let mut slot = self.inner.fault.lock();
        if *slot == Some(op) {
            *slot = None;
            return Err(BackendError::Unavailable(format!("injected fault on {op:?}")));
        }
        Ok(())
    }

    fn authed(&self) -> BackendResult<UserId> {
        (*self.inner.auth.read()).ok_or_else(|| BackendError::Denied("not signed in".into()))
    }

    fn is_admin(&self, user: UserId) -> bool {
        self.inner
            .profiles
            .read()
            .get(&user)
            .is_some_and(|p| p.is_admin)
    }

    fn matches(query: ThoughtQuery, thought: &Thought) -> bool {
        match query {
            // A record without the field deserialized to the default, so
            // legacy records land in the public set here too.
            ThoughtQuery::Public => thought.visibility == Visibility::Public,
            ThoughtQuery::OwnedBy(owner) => thought.owner_id == owner,
            ThoughtQuery::All => true,
        }
    }

    /// Current matching result set, newest creation first.
    fn snapshot_for(&self, query: ThoughtQuery) -> Vec<Thought> {
        let mut matching: Vec<Thought> = self
            .inner
            .thoughts
            .read()
            .values()
            .filter(|t| Self::matches(query, t))
            .cloned()
            .collect();
        matching.sort_by(|a, b| {
            b.created_at
                .millis()
                .cmp(&a.created_at.millis())
                .then_with(|| b.id.cmp(&a.id))
        });
        matching
    }

    /// Re-deliver full result sets to every open live query.
    fn push_thoughts(&self) {
        let mut subs = self.inner.thought_subs.write();
        subs.retain(|sub| !sub.tx.is_closed());
        for sub in subs.iter() {
            let snapshot = self.snapshot_for(sub.query);
            trace!(sub = sub.id, query = %sub.query, records = snapshot.len(), "push");
            if sub.tx.send(snapshot).is_ok() {
                self.inner.deliveries.fetch_add(1, Ordering::SeqCst);
            }
        }
    }
}

#[async_trait]
impl DocumentBackend for MemBackend {
    fn subscribe_thoughts(&self, query: ThoughtQuery) -> BackendResult<LiveQuery> {
        let viewer = self.authed()?;
        if query == ThoughtQuery::All && !self.is_admin(viewer) {
            return Err(BackendError::Denied("moderation view is admin-only".into()));
        }

        let id = self.inner.next_sub_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::unbounded_channel();
        debug!(sub = id, %query, "live query opened");

        // Live queries start with the current matching set.
        let initial = self.snapshot_for(query);
        let _ = tx.send(initial);
        self.inner.deliveries.fetch_add(1, Ordering::SeqCst);

        self.inner.thought_subs.write().push(ThoughtSub { id, query, tx });

        let inner = self.inner.clone();
        let guard = SubscriptionGuard::new(move || {
            inner.thought_subs.write().retain(|s| s.id != id);
            debug!(sub = id, "live query cancelled");
        });
        Ok(LiveQuery { snapshots: rx, guard })
    }

    fn watch_profile(&self, user: UserId) -> BackendResult<ProfileWatch> {
        self.authed()?;
        let id = self.inner.next_sub_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::unbounded_channel();

        // A missing document watches as the empty record, like a snapshot
        // listener firing on a non-existent doc.
        let current = self.inner.profiles.read().get(&user).cloned().unwrap_or_default();
        let _ = tx.send(current);

        self.inner.profile_subs.write().push(ProfileSub { id, user, tx });

        let inner = self.inner.clone();
        let guard = SubscriptionGuard::new(move || {
            inner.profile_subs.write().retain(|s| s.id != id);
        });
        Ok(ProfileWatch { updates: rx, guard })
    }

    async fn create_thought(&self, mut thought: Thought) -> BackendResult<()> {
        let viewer = self.authed()?;
        self.take_fault(Fault::Create)?;
        if thought.owner_id != viewer {
            return Err(BackendError::Denied("owner must be the signed-in user".into()));
        }
        // Server clock overrides whatever the client put in the stamps.
        thought.created_at = Stamp::Millis(self.tick());
        thought.updated_at = Stamp::Unset;
        self.inner.thoughts.write().insert(thought.id, thought);
        self.push_thoughts();
        Ok(())
    }

    async fn update_thought(&self, id: ThoughtId, patch: ThoughtPatch) -> BackendResult<()> {
        let viewer = self.authed()?;
        self.take_fault(Fault::Update)?;
        let stamp = Stamp::Millis(self.tick());
        {
            let mut thoughts = self.inner.thoughts.write();
            let thought = thoughts.get_mut(&id).ok_or(BackendError::NotFound(id))?;
            if thought.owner_id != viewer && !self.is_admin(viewer) {
                return Err(BackendError::Denied("only the owner or an admin may edit".into()));
            }
            patch.apply_to(thought);
            thought.updated_at = stamp;
        }
        self.push_thoughts();
        Ok(())
    }

    async fn delete_thought(&self, id: ThoughtId) -> BackendResult<()> {
        let viewer = self.authed()?;
        self.take_fault(Fault::Delete)?;
        {
            let mut thoughts = self.inner.thoughts.write();
            let thought = thoughts.get(&id).ok_or(BackendError::NotFound(id))?;
            let allowed = thought.owner_id == viewer
                || (self.is_admin(viewer) && thought.visibility == Visibility::Public);
            if !allowed {
                return Err(BackendError::Denied("record is not deletable by this user".into()));
            }
            thoughts.remove(&id);
        }
        self.push_thoughts();
        Ok(())
    }

    async fn like_add(&self, id: ThoughtId, user: UserId) -> BackendResult<()> {
        self.authed()?;
        self.take_fault(Fault::LikeAdd)?;
        {
            let mut thoughts = self.inner.thoughts.write();
            let thought = thoughts.get_mut(&id).ok_or(BackendError::NotFound(id))?;
            // Atomic set-add: already-present membership is a no-op, not an
            // error.
            thought.liked_by.insert(user);
        }
        self.push_thoughts();
        Ok(())
    }

    async fn like_remove(&self, id: ThoughtId, user: UserId) -> BackendResult<()> {
        self.authed()?;
        self.take_fault(Fault::LikeRemove)?;
        {
            let mut thoughts = self.inner.thoughts.write();
            let thought = thoughts.get_mut(&id).ok_or(BackendError::NotFound(id))?;
            thought.liked_by.remove(&user);
        }
        self.push_thoughts();
        Ok(())
    }

    async fn claim_display_name(&self, user: UserId, name: &str) -> BackendResult<()> {
        let viewer = self.authed()?;
        self.take_fault(Fault::ClaimName)?;
        if viewer != user {
            return Err(BackendError::Denied("may only claim a name for yourself".into()));
        }
        let taken = self
            .inner
            .profiles
            .read()
            .iter()
            .any(|(id, p)| *id != user && p.display_name.as_deref() == Some(name));
        if taken {
            return Err(BackendError::NameTaken(name.to_string()));
        }
        let mut record = self.inner.profiles.read().get(&user).cloned().unwrap_or_default();
        record.display_name = Some(name.to_string());
        self.upsert_profile(user, record);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn public_thought(owner: UserId, title: &str) -> Thought {
        Thought::compose(ThoughtId::new(), title, "body", Visibility::Public, owner, "author")
    }

    fn private_thought(owner: UserId, title: &str) -> Thought {
        Thought::compose(ThoughtId::new(), title, "body", Visibility::Private, owner, "author")
    }

    #[tokio::test]
    async fn live_query_starts_with_current_set_and_redelivers_on_change() {
        let db = MemBackend::new();
        let user = UserId::new();
        db.sign_in(Some(user));
        db.seed_thought(public_thought(UserId::new(), "first"));

        let mut query = db.subscribe_thoughts(ThoughtQuery::Public).expect("subscribe");
        let initial = query.snapshots.recv().await.expect("initial snapshot");
        assert_eq!(initial.len(), 1);

        db.create_thought(public_thought(user, "second")).await.expect("create");
        let next = query.snapshots.recv().await.expect("redelivery");
        assert_eq!(next.len(), 2);
        assert_eq!(next[0].title, "second", "newest creation first");
    }

    #[tokio::test]
    async fn owned_query_sees_private_records_public_query_does_not() {
        let db = MemBackend::new();
        let owner = UserId::new();
        db.sign_in(Some(owner));
        db.seed_thought(private_thought(owner, "secret"));

        let mut public = db.subscribe_thoughts(ThoughtQuery::Public).expect("subscribe");
        assert!(public.snapshots.recv().await.expect("snapshot").is_empty());

        let mut owned = db.subscribe_thoughts(ThoughtQuery::OwnedBy(owner)).expect("subscribe");
        let snapshot = owned.snapshots.recv().await.expect("snapshot");
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].title, "secret");
    }

    #[tokio::test]
    async fn dropping_the_guard_stops_deliveries() {
        let db = MemBackend::new();
        let user = UserId::new();
        db.sign_in(Some(user));

        let query = db.subscribe_thoughts(ThoughtQuery::Public).expect("subscribe");
        drop(query);
        let before = db.delivery_count();

        db.seed_thought(public_thought(user, "after cancel"));
        assert_eq!(db.delivery_count(), before, "no push after cancellation");
    }

    #[tokio::test]
    async fn moderation_view_is_admin_only() {
        let db = MemBackend::new();
        let member = UserId::new();
        db.sign_in(Some(member));
        assert!(matches!(
            db.subscribe_thoughts(ThoughtQuery::All),
            Err(BackendError::Denied(_))
        ));

        let admin = UserId::new();
        db.upsert_profile(admin, ProfileRecord { display_name: None, is_admin: true });
        db.sign_in(Some(admin));
        db.seed_thought(private_thought(member, "hidden"));
        let mut all = db.subscribe_thoughts(ThoughtQuery::All).expect("admin subscribes");
        assert_eq!(all.snapshots.recv().await.expect("snapshot").len(), 1);
    }

    #[tokio::test]
    async fn admin_cannot_delete_foreign_private_record() {
        let db = MemBackend::new();
        let owner = UserId::new();
        let admin = UserId::new();
        db.upsert_profile(admin, ProfileRecord { display_name: None, is_admin: true });

        let secret = private_thought(owner, "secret");
        let id = secret.id;
        db.seed_thought(secret);

        db.sign_in(Some(admin));
        assert!(matches!(
            db.delete_thought(id).await,
            Err(BackendError::Denied(_))
        ));

        db.sign_in(Some(owner));
        db.delete_thought(id).await.expect("owner deletes own private record");
    }

    #[tokio::test]
    async fn injected_fault_fails_exactly_one_operation() {
        let db = MemBackend::new();
        let user = UserId::new();
        db.sign_in(Some(user));
        let thought = public_thought(user, "t");
        let id = thought.id;
        db.seed_thought(thought);

        db.fail_next(Fault::LikeAdd);
        assert!(matches!(
            db.like_add(id, user).await,
            Err(BackendError::Unavailable(_))
        ));
        db.like_add(id, user).await.expect("second attempt succeeds");
        assert!(db.thought(id).expect("present").is_liked_by(user));
    }

    #[tokio::test]
    async fn display_names_are_unique_across_users() {
        let db = MemBackend::new();
        let first = UserId::new();
        let second = UserId::new();

        db.sign_in(Some(first));
        db.claim_display_name(first, "maya").await.expect("first claim");

        db.sign_in(Some(second));
        assert!(matches!(
            db.claim_display_name(second, "maya").await,
            Err(BackendError::NameTaken(_))
        ));
        db.claim_display_name(second, "noor").await.expect("distinct name");
    }

    #[tokio::test]
    async fn profile_watch_pushes_the_claim() {
        let db = MemBackend::new();
        let user = UserId::new();
        db.sign_in(Some(user));

        let mut watch = db.watch_profile(user).expect("watch");
        let initial = watch.updates.recv().await.expect("initial");
        assert_eq!(initial, ProfileRecord::default());

        db.claim_display_name(user, "maya").await.expect("claim");
        let updated = watch.updates.recv().await.expect("update");
        assert_eq!(updated.display_name.as_deref(), Some("maya"));
    }
}
