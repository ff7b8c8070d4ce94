//! The optimistic mutation store.
//!
//! One in-memory, ordered list of thought records: the feed worker replaces
//! it wholesale with each merged snapshot, and local user actions mutate it
//! ahead of remote confirmation. Every operation is a pure structure edit —
//! nothing in here fails; failure belongs to the remote calls around the
//! edits. A `watch` version counter lets the UI re-render without polling.

use parking_lot::RwLock;
use tokio::sync::watch;
use tracing::{trace, warn};

use murmur_types::{Thought, ThoughtId, ThoughtPatch, UserId};

/// Like membership after a toggle, so the caller knows which remote set
/// primitive to issue.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LikeState {
    Liked,
    Unliked,
}

/// The current combined, ordered view of thought records.
pub struct ThoughtStore {
    items: RwLock<Vec<Thought>>,
    version: watch::Sender<u64>,
}

impl Default for ThoughtStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ThoughtStore {
    pub fn new() -> Self {
        let (version, _) = watch::channel(0);
        Self { items: RwLock::new(Vec::new()), version }
    }

    /// Observe the mutation counter. Bumped once per store edit.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.version.subscribe()
    }

    fn bump(&self) {
        self.version.send_modify(|v| *v = v.wrapping_add(1));
    }

    // ── Reads ───────────────────────────────────────────────────────────────

    /// A full copy of the current list. Sees either the pre- or post-state of
    /// any concurrent edit, never a partial mix.
    pub fn snapshot(&self) -> Vec<Thought> {
        self.items.read().clone()
    }

    pub fn get(&self, id: ThoughtId) -> Option<Thought> {
        self.items.read().iter().find(|t| t.id == id).cloned()
    }

    pub fn len(&self) -> usize {
        self.items.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.read().is_empty()
    }

    // ── Mutations ───────────────────────────────────────────────────────────

    /// Atomically replace the whole list with a fresh merged snapshot.
    pub fn replace_all(&self, list: Vec<Thought>) {
        *self.items.write() = list;
        self.bump();
    }

    /// Prepend a locally-created record before remote confirmation arrives.
    pub fn insert_newest(&self, thought: Thought) {
        self.items.write().insert(0, thought);
        self.bump();
    }

    /// Shallow-merge fields into the record matching `id`. Unknown ids log
    /// and do nothing — the record may have been deleted under us.
    pub fn apply_patch(&self, id: ThoughtId, patch: &ThoughtPatch) {
        let mut items = self.items.write();
        match items.iter_mut().find(|t| t.id == id) {
            Some(thought) => patch.apply_to(thought),
            None => {
                warn!(thought = %id.short(), "patch for unknown record, skipping");
                return;
            }
        }
        drop(items);
        self.bump();
    }

    /// Delete the record matching `id`; no-op if absent.
    pub fn remove(&self, id: ThoughtId) {
        let mut items = self.items.write();
        let before = items.len();
        items.retain(|t| t.id != id);
        let removed = items.len() != before;
        drop(items);
        if removed {
            self.bump();
        }
    }

    /// Flip `user`'s membership in the record's `liked_by` set and report the
    /// new state. `None` if the record is unknown.
    ///
    /// Two immediate calls restore the original membership; calls racing an
    /// in-flight remote confirmation are the caller's problem to serialize
    /// (see the intents layer's per-record guard).
    pub fn toggle_like(&self, id: ThoughtId, user: UserId) -> Option<LikeState> {
        let mut items = self.items.write();
        let thought = items.iter_mut().find(|t| t.id == id)?;
        let state = if thought.liked_by.remove(&user) {
            LikeState::Unliked
        } else {
            thought.liked_by.insert(user);
            LikeState::Liked
        };
        drop(items);
        trace!(thought = %id.short(), ?state, "optimistic like toggle");
        self.bump();
        Some(state)
    }

    /// Rollback for a failed remote like call: re-apply the flip. Composes to
    /// a true inverse only when invoked at most once per failed remote call —
    /// the intents layer guarantees that pairing.
    pub fn revert_like(&self, id: ThoughtId, user: UserId) {
        if self.toggle_like(id, user).is_none() {
            warn!(thought = %id.short(), "like rollback for unknown record, skipping");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use murmur_types::{Stamp, Visibility};

    fn record(title: &str) -> Thought {
        let mut t = Thought::compose(
            ThoughtId::new(), title, "body", Visibility::Public, UserId::new(), "author",
        );
        t.created_at = Stamp::Millis(1_000);
        t
    }

    #[test]
    fn replace_all_swaps_the_whole_list() {
        let store = ThoughtStore::new();
        store.replace_all(vec![record("a"), record("b")]);
        assert_eq!(store.len(), 2);
        store.replace_all(vec![record("c")]);
        let snap = store.snapshot();
        assert_eq!(snap.len(), 1);
        assert_eq!(snap[0].title, "c");
    }

    #[test]
    fn insert_newest_prepends() {
        let store = ThoughtStore::new();
        store.replace_all(vec![record("old")]);
        store.insert_newest(record("new"));
        assert_eq!(store.snapshot()[0].title, "new");
    }

    #[test]
    fn patch_unknown_id_is_a_logged_noop() {
        let store = ThoughtStore::new();
        store.replace_all(vec![record("a")]);
        let mut version = store.subscribe();
        version.mark_unchanged();
        store.apply_patch(
            ThoughtId::new(),
            &ThoughtPatch { title: Some("x".into()), ..Default::default() },
        );
        assert!(!version.has_changed().unwrap());
        assert_eq!(store.snapshot()[0].title, "a");
    }

    #[test]
    fn remove_absent_id_is_a_noop() {
        let store = ThoughtStore::new();
        store.replace_all(vec![record("a")]);
        store.remove(ThoughtId::new());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn toggle_is_an_involution() {
        let store = ThoughtStore::new();
        let t = record("a");
        let id = t.id;
        let user = UserId::new();
        store.replace_all(vec![t]);

        assert_eq!(store.toggle_like(id, user), Some(LikeState::Liked));
        assert!(store.get(id).unwrap().is_liked_by(user));
        assert_eq!(store.toggle_like(id, user), Some(LikeState::Unliked));
        assert!(!store.get(id).unwrap().is_liked_by(user));
        assert_eq!(store.get(id).unwrap().like_count(), 0);
    }

    #[test]
    fn toggle_unknown_record_reports_none() {
        let store = ThoughtStore::new();
        assert_eq!(store.toggle_like(ThoughtId::new(), UserId::new()), None);
    }

    #[test]
    fn revert_undoes_one_optimistic_toggle() {
        let store = ThoughtStore::new();
        let t = record("a");
        let id = t.id;
        let user = UserId::new();
        store.replace_all(vec![t]);

        store.toggle_like(id, user);
        store.revert_like(id, user);
        assert!(!store.get(id).unwrap().is_liked_by(user));
    }

    #[test]
    fn every_edit_bumps_the_version() {
        let store = ThoughtStore::new();
        let mut version = store.subscribe();
        store.replace_all(vec![record("a")]);
        assert!(version.has_changed().unwrap());
        version.mark_unchanged();
        store.insert_newest(record("b"));
        assert!(version.has_changed().unwrap());
    }
}
