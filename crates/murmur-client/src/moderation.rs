//! The moderation feed: every record, for admin eyes.
//!
//! A single-stream sibling of the main feed — no merge, just the `All` query
//! normalized and republished in creation order (the backend already sorts
//! newest first). Only opened when the signed-in viewer is an admin; any
//! identity change tears it down first, under the same generation fence the
//! dual-stream worker uses. Deleting from this view goes through the regular
//! intent rules, so an admin still cannot remove another user's private
//! record.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tracing::{debug, info, trace, warn};

use murmur_types::{Thought, UserId, UserProfile};

use crate::backend::{DocumentBackend, LiveQuery, SubscriptionGuard, ThoughtQuery};
use crate::feed::FeedHandle;
use crate::store::ThoughtStore;

/// Spawn the moderation worker. Publishes into its own `store`, distinct
/// from the main feed's.
pub fn spawn_moderation_feed<B: DocumentBackend + 'static>(
    backend: Arc<B>,
    store: Arc<ThoughtStore>,
    identity: watch::Receiver<Option<UserProfile>>,
) -> FeedHandle {
    FeedHandle::from_task(tokio::spawn(moderation_worker(backend, store, identity)))
}

async fn moderation_worker<B: DocumentBackend>(
    backend: Arc<B>,
    store: Arc<ThoughtStore>,
    mut identity: watch::Receiver<Option<UserProfile>>,
) {
    let (snapshot_tx, mut snapshot_rx) = mpsc::unbounded_channel::<(u64, Vec<Thought>)>();
    let mut generation: u64 = 0;
    // The admin the open stream belongs to, and the guard keeping it alive.
    let mut active: Option<(UserId, SubscriptionGuard)> = None;

    identity.mark_changed();

    loop {
        tokio::select! {
            changed = identity.changed() => {
                if changed.is_err() {
                    debug!("identity channel closed, moderation worker exiting");
                    return;
                }
                let viewer = identity.borrow_and_update().clone();
                let admin_id = viewer.as_ref().filter(|v| v.is_admin).map(|v| v.id);
                if admin_id == active.as_ref().map(|(id, _)| *id) {
                    // Same admin (or still nobody) — profile refresh only.
                    continue;
                }

                // Teardown first, for sign-out, user switch, and demotion
                // alike.
                active = None;
                generation += 1;
                store.replace_all(Vec::new());

                let Some(viewer) = viewer else { continue };
                if !viewer.is_admin {
                    continue;
                }
                match backend.subscribe_thoughts(ThoughtQuery::All) {
                    Ok(LiveQuery { mut snapshots, guard }) => {
                        let tx = snapshot_tx.clone();
                        let tag = generation;
                        active = Some((viewer.id, guard));
                        tokio::spawn(async move {
                            while let Some(snapshot) = snapshots.recv().await {
                                if tx.send((tag, snapshot)).is_err() {
                                    break;
                                }
                            }
                        });
                        info!(viewer = %viewer.id.short(), "moderation stream opened");
                    }
                    Err(err) => warn!(%err, "could not open moderation stream"),
                }
            }
            Some((tag, mut snapshot)) = snapshot_rx.recv() => {
                if tag != generation {
                    trace!("dropping stale moderation delivery");
                    continue;
                }
                for thought in &mut snapshot {
                    thought.normalize_stamps();
                }
                debug!(records = snapshot.len(), "moderation snapshot");
                store.replace_all(snapshot);
            }
        }
    }
}
