//! The dual-stream feed: two live result sets merged into one ordered view.
//!
//! Stream A is every public record; stream B is every record the signed-in
//! user owns (which is how their private records reach the view). The two
//! streams are independent and unordered relative to each other, so the
//! merge always recomputes from "latest A + latest B" — re-delivery and
//! out-of-order delivery are idempotent by construction.
//!
//! # Subscription lifecycle
//!
//! ```text
//! +-------+  identity arrives   +---------------+  first A snapshot  +------------+
//! | Idle  | ──────────────────▶ | PublicPending | ─────────────────▶ | OwnedPending |
//! +-------+                     +---------------+   (opens stream B) +------------+
//!     ▲                                                                    │
//!     │ identity change / sign-out (tears down BOTH streams)   first B snapshot
//!     └──────────────────────────────────────────────────────────────┐     ▼
//!                                                                  +------+
//!                                                                  | Live |
//!                                                                  +------+
//! ```
//!
//! Teardown before resubscription is a privacy invariant: a previous user's
//! owned-stream data must never arrive after a new user signed in. Stale
//! deliveries are additionally fenced by a subscription generation tag.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use murmur_types::{Thought, UserProfile};

use crate::backend::{DocumentBackend, LiveQuery, SubscriptionGuard, ThoughtQuery};
use crate::store::ThoughtStore;

/// Where the worker is in the subscription lifecycle. Logged on every
/// transition; the merge itself only needs the latest snapshots.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
enum FeedPhase {
    #[default]
    Idle,
    /// Stream A open, nothing delivered yet.
    PublicPending,
    /// Stream A live, stream B open, B not delivered yet.
    OwnedPending,
    /// Both streams delivering.
    Live,
}

/// One delivery from either stream, tagged with the subscription generation
/// that produced it so deliveries racing a teardown are dropped.
enum Delivery {
    Public { generation: u64, snapshot: Vec<Thought> },
    Owned { generation: u64, snapshot: Vec<Thought> },
}

/// Merge the two latest snapshots into the published view.
///
/// Union by `id` — when a record appears in both (a public record the viewer
/// owns), the owned-stream copy wins, since it is the fresher one for the
/// viewer's own writes. Sorted descending by effective timestamp, ties broken
/// by `id` so equal-stamp records keep a stable order.
pub fn merge_snapshots(public: &[Thought], owned: &[Thought]) -> Vec<Thought> {
    let mut by_id: HashMap<_, &Thought> = HashMap::with_capacity(public.len() + owned.len());
    for thought in public.iter().chain(owned.iter()) {
        by_id.insert(thought.id, thought);
    }
    let mut merged: Vec<Thought> = by_id.into_values().cloned().collect();
    merged.sort_by(|a, b| {
        b.effective_millis()
            .cmp(&a.effective_millis())
            .then_with(|| b.id.cmp(&a.id))
    });
    merged
}

/// Handle to a running feed worker. Aborts the worker on drop.
#[derive(Debug)]
pub struct FeedHandle {
    task: JoinHandle<()>,
}

impl FeedHandle {
    pub(crate) fn from_task(task: JoinHandle<()>) -> Self {
        Self { task }
    }

    pub fn shutdown(self) {
        self.task.abort();
    }
}

impl Drop for FeedHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Spawn the feed worker: follow the session's identity channel, keep the
/// two subscriptions in lockstep with it, and publish every recomputed merge
/// into `store`.
pub fn spawn_feed<B: DocumentBackend + 'static>(
    backend: Arc<B>,
    store: Arc<ThoughtStore>,
    identity: watch::Receiver<Option<UserProfile>>,
) -> FeedHandle {
    let task = tokio::spawn(feed_worker(backend, store, identity));
    FeedHandle { task }
}

struct FeedState {
    phase: FeedPhase,
    generation: u64,
    viewer: Option<UserProfile>,
    public_guard: Option<SubscriptionGuard>,
    owned_guard: Option<SubscriptionGuard>,
    latest_public: Option<Vec<Thought>>,
    latest_owned: Option<Vec<Thought>>,
}

impl FeedState {
    fn new() -> Self {
        Self {
            phase: FeedPhase::Idle,
            generation: 0,
            viewer: None,
            public_guard: None,
            owned_guard: None,
            latest_public: None,
            latest_owned: None,
        }
    }

    /// Cancel both subscriptions (guards drop in here) and fence out any
    /// deliveries still in flight by bumping the generation.
    fn teardown(&mut self) {
        self.public_guard = None;
        self.owned_guard = None;
        self.latest_public = None;
        self.latest_owned = None;
        self.viewer = None;
        self.generation += 1;
        self.phase = FeedPhase::Idle;
    }
}

async fn feed_worker<B: DocumentBackend>(
    backend: Arc<B>,
    store: Arc<ThoughtStore>,
    mut identity: watch::Receiver<Option<UserProfile>>,
) {
    let (delivery_tx, mut delivery_rx) = mpsc::unbounded_channel::<Delivery>();
    let mut state = FeedState::new();

    // Pick up an identity that was already present before the worker started.
    identity.mark_changed();

    loop {
        tokio::select! {
            changed = identity.changed() => {
                if changed.is_err() {
                    // Session dropped — tear down and stop publishing.
                    state.teardown();
                    debug!("identity channel closed, feed worker exiting");
                    return;
                }
                let viewer = identity.borrow_and_update().clone();
                // Profile refreshes (display name, role) republish the same
                // identity; only a real user change moves the subscriptions.
                if viewer.as_ref().map(|v| v.id) == state.viewer.as_ref().map(|v| v.id)
                    && state.phase != FeedPhase::Idle
                {
                    state.viewer = viewer;
                    continue;
                }
                if viewer.is_none() && state.phase == FeedPhase::Idle {
                    continue;
                }
                on_identity_change(&backend, &store, &mut state, &delivery_tx, viewer);
            }
            Some(delivery) = delivery_rx.recv() => {
                on_delivery(&backend, &store, &mut state, &delivery_tx, delivery);
            }
        }
    }
}

fn on_identity_change<B: DocumentBackend>(
    backend: &Arc<B>,
    store: &Arc<ThoughtStore>,
    state: &mut FeedState,
    delivery_tx: &mpsc::UnboundedSender<Delivery>,
    viewer: Option<UserProfile>,
) {
    // Always cancel the old streams before anything else happens for the new
    // identity — both on sign-out and on a direct user switch.
    state.teardown();
    store.replace_all(Vec::new());

    let Some(viewer) = viewer else {
        info!("signed out, feed idle");
        return;
    };

    match backend.subscribe_thoughts(ThoughtQuery::Public) {
        Ok(query) => {
            state.public_guard = Some(forward(
                query,
                state.generation,
                delivery_tx.clone(),
                |generation, snapshot| Delivery::Public { generation, snapshot },
            ));
            state.phase = FeedPhase::PublicPending;
            info!(viewer = %viewer.id.short(), "public stream opened");
            state.viewer = Some(viewer);
        }
        Err(err) => {
            // The backend's own reconnection policy is the retry path; an
            // empty view is the correct rendering until then.
            warn!(%err, "could not open public stream");
        }
    }
}

fn on_delivery<B: DocumentBackend>(
    backend: &Arc<B>,
    store: &Arc<ThoughtStore>,
    state: &mut FeedState,
    delivery_tx: &mpsc::UnboundedSender<Delivery>,
    delivery: Delivery,
) {
    match delivery {
        Delivery::Public { generation, mut snapshot } => {
            if generation != state.generation {
                trace!("dropping stale public delivery");
                return;
            }
            for thought in &mut snapshot {
                thought.normalize_stamps();
            }
            debug!(records = snapshot.len(), "public snapshot");
            state.latest_public = Some(snapshot);

            // The owned stream is layered on once the public stream is live,
            // and reused on every later public delivery.
            if state.owned_guard.is_none() {
                open_owned_stream(backend, state, delivery_tx);
            }
            publish(store, state);
        }
        Delivery::Owned { generation, mut snapshot } => {
            if generation != state.generation {
                trace!("dropping stale owned delivery");
                return;
            }
            for thought in &mut snapshot {
                thought.normalize_stamps();
            }
            debug!(records = snapshot.len(), "owned snapshot");
            state.latest_owned = Some(snapshot);
            if state.phase == FeedPhase::OwnedPending {
                state.phase = FeedPhase::Live;
            }
            publish(store, state);
        }
    }
}

fn open_owned_stream<B: DocumentBackend>(
    backend: &Arc<B>,
    state: &mut FeedState,
    delivery_tx: &mpsc::UnboundedSender<Delivery>,
) {
    let Some(viewer) = &state.viewer else {
        return;
    };
    match backend.subscribe_thoughts(ThoughtQuery::OwnedBy(viewer.id)) {
        Ok(query) => {
            state.owned_guard = Some(forward(
                query,
                state.generation,
                delivery_tx.clone(),
                |generation, snapshot| Delivery::Owned { generation, snapshot },
            ));
            state.phase = FeedPhase::OwnedPending;
            info!(viewer = %viewer.id.short(), "owned stream layered on");
        }
        Err(err) => {
            // The public half of the view still renders; the next public
            // delivery retries the layering.
            warn!(%err, "could not open owned stream");
        }
    }
}

/// Spawn a forwarder draining one live query into the worker's delivery
/// channel. Ends when the query's channel closes (guard dropped or backend
/// gone). Returns the guard that keeps the subscription alive.
fn forward(
    query: LiveQuery,
    generation: u64,
    delivery_tx: mpsc::UnboundedSender<Delivery>,
    wrap: fn(u64, Vec<Thought>) -> Delivery,
) -> SubscriptionGuard {
    let LiveQuery { mut snapshots, guard } = query;
    tokio::spawn(async move {
        while let Some(snapshot) = snapshots.recv().await {
            if delivery_tx.send(wrap(generation, snapshot)).is_err() {
                break;
            }
        }
        trace!("snapshot forwarder finished");
    });
    guard
}

fn publish(store: &Arc<ThoughtStore>, state: &FeedState) {
    // An empty snapshot (brand-new user, nothing public yet) is a valid
    // publish, not an error.
    let public = state.latest_public.as_deref().unwrap_or(&[]);
    let owned = state.latest_owned.as_deref().unwrap_or(&[]);
    let merged = merge_snapshots(public, owned);
    trace!(records = merged.len(), "publishing merged view");
    store.replace_all(merged);
}
