//! Murmur client engine
//!
//! The client-side data-synchronization and optimistic-update core of the
//! murmur thought-sharing app. Persistence, query, and real-time push belong
//! to a hosted document backend (the [`backend::DocumentBackend`] port); this
//! crate merges the backend's two live result streams into one ordered view
//! and applies local mutations optimistically, rolling back where the failed
//! remote call calls for it.
//!
//! ```text
//!   auth provider ──▶ Session ──watch──▶ feed worker ──replace_all──▶ ThoughtStore
//!                        │                  ▲   ▲                          ▲
//!                        │            public│   │owned                     │ patches
//!                        ▼                  └───┴── DocumentBackend ◀── Intents ◀── UI
//!                  profile watch
//! ```

pub mod backend;
pub mod feed;
pub mod intents;
pub mod moderation;
pub mod session;
pub mod store;

pub use backend::{
    BackendError, BackendResult, DocumentBackend, LiveQuery, ProfileWatch, SubscriptionGuard,
    ThoughtQuery,
};
pub use feed::{FeedHandle, merge_snapshots, spawn_feed};
pub use intents::{IntentError, Intents};
pub use moderation::spawn_moderation_feed;
pub use session::Session;
pub use store::{LikeState, ThoughtStore};
