//! Shared domain types for murmur.
//!
//! This crate is the relational foundation: typed IDs, the thought record,
//! user projections, and the timestamp shapes the backend emits. It has **no
//! internal murmur dependencies** — a pure leaf crate that other crates build
//! on.
//!
//! # Entity-Relationship Overview
//!
//! ```text
//! UserProfile (UserId) ← the signed-in viewer's projection
//!     └── authors Thought (owner_id, owner_name denormalized at write)
//!     └── likes Thought (membership in liked_by)
//!
//! Thought (ThoughtId) ← the single domain entity
//!     └── visibility: public (any viewer) or private (owner only)
//!     └── liked_by: set of UserId — like count is always derived, never stored
//!     └── created_at / updated_at: Stamp (server clock, heterogeneous shapes)
//! ```
//!
//! # Key Types
//!
//! |-----------------|---------------------------------------------------|
//! | Type            | Purpose                                           |
//! |-----------------|---------------------------------------------------|
//! | [`Thought`]     | The user-authored content record                  |
//! | [`ThoughtPatch`]| Shallow field merge for edits                     |
//! | [`Visibility`]  | Per-record access scope (public/private)          |
//! | [`Stamp`]       | Any server timestamp shape → canonical millis     |
//! | [`UserProfile`] | Viewer projection (display name, admin, verified) |
//! | [`AuthUser`]    | Raw identity edge from the auth provider          |
//! | [`ThoughtId`]   | Which thought (UUIDv7)                            |
//! | [`UserId`]      | Who (UUIDv7)                                      |
//! |-----------------|---------------------------------------------------|

pub mod ids;
pub mod stamp;
pub mod thought;
pub mod user;

// Re-export primary types at crate root for convenience.
pub use ids::{ThoughtId, UserId};
pub use stamp::Stamp;
pub use thought::{Thought, ThoughtPatch, Visibility};
pub use user::{AuthUser, NameError, ProfileRecord, UserProfile, validate_display_name};

/// Current time as Unix milliseconds. Used as the local placeholder for
/// server stamps that have not round-tripped yet.
pub(crate) fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
