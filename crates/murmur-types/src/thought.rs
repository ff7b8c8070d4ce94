//! The thought record — the single domain entity.
//!
//! Wire layout is camelCase to stay readable next to the backend console.
//! Two back-compatibility rules are encoded here rather than scattered at
//! call sites: a record that predates the `visibility` field counts as
//! public, and a legacy stored `likesCount` field is ignored — the like
//! count is always derived from `liked_by`, so the two can never drift.

use std::collections::BTreeSet;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use strum::EnumString;

use crate::ids::{ThoughtId, UserId};
use crate::stamp::Stamp;
use crate::user::UserProfile;

/// Per-record access scope.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(ascii_case_insensitive)]
pub enum Visibility {
    /// Visible to any authenticated viewer. The default for records written
    /// before the field existed.
    #[default]
    Public,
    /// Visible to the owner only.
    Private,
}

impl Visibility {
    /// Parse from string (case-insensitive).
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        <Self as FromStr>::from_str(s).ok()
    }

    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Visibility::Public => "public",
            Visibility::Private => "private",
        }
    }
}

impl std::fmt::Display for Visibility {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A user-authored thought.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Thought {
    pub id: ThoughtId,
    pub title: String,
    pub description: String,
    /// The creating user. Immutable; drives edit/delete/like eligibility.
    pub owner_id: UserId,
    /// Denormalized copy of the owner's display name at time of writing, so
    /// the combined view renders attribution without a join. Allowed to go
    /// stale if the owner renames later — one read beats N lookups.
    pub owner_name: String,
    #[serde(default)]
    pub visibility: Visibility,
    /// Set membership is "liked"; the display count is the set size.
    #[serde(default)]
    pub liked_by: BTreeSet<UserId>,
    /// Server-assigned at creation; `Unset` until the write round-trips.
    #[serde(default)]
    pub created_at: Stamp,
    /// Server-assigned on edit; `Unset` means never edited.
    #[serde(default)]
    pub updated_at: Stamp,
}

impl Thought {
    /// A fresh, unliked record as composed locally before the remote create.
    /// Both stamps stay `Unset` — the server clock fills them at write time.
    pub fn compose(
        id: ThoughtId,
        title: impl Into<String>,
        description: impl Into<String>,
        visibility: Visibility,
        owner_id: UserId,
        owner_name: impl Into<String>,
    ) -> Self {
        Self {
            id,
            title: title.into(),
            description: description.into(),
            owner_id,
            owner_name: owner_name.into(),
            visibility,
            liked_by: BTreeSet::new(),
            created_at: Stamp::Unset,
            updated_at: Stamp::Unset,
        }
    }

    /// Effective timestamp for ordering: update time if present, else
    /// creation time, as canonical millis.
    pub fn effective_millis(&self) -> i64 {
        if self.updated_at.is_set() {
            self.updated_at.millis()
        } else {
            self.created_at.millis()
        }
    }

    /// Pin both stamps to canonical millis. `updated_at` stays `Unset` for a
    /// never-edited record so it keeps deferring to `created_at`.
    pub fn normalize_stamps(&mut self) {
        self.created_at.resolve();
        if self.updated_at.is_set() {
            self.updated_at.resolve();
        }
    }

    pub fn is_owned_by(&self, user: UserId) -> bool {
        self.owner_id == user
    }

    pub fn is_liked_by(&self, user: UserId) -> bool {
        self.liked_by.contains(&user)
    }

    /// Always derived from the set — there is no stored counter to drift.
    pub fn like_count(&self) -> usize {
        self.liked_by.len()
    }

    /// Owner or admin may edit.
    pub fn editable_by(&self, viewer: &UserProfile) -> bool {
        self.is_owned_by(viewer.id) || viewer.is_admin
    }

    /// Owner always deletes; an admin deletes only public records — another
    /// user's private record stays out of reach even for moderation.
    pub fn deletable_by(&self, viewer: &UserProfile) -> bool {
        self.is_owned_by(viewer.id)
            || (viewer.is_admin && self.visibility == Visibility::Public)
    }
}

/// Shallow field merge for edits. Absent fields stay untouched.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThoughtPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub visibility: Option<Visibility>,
}

impl ThoughtPatch {
    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.description.is_none() && self.visibility.is_none()
    }

    /// Merge into a record. Does not touch `updated_at` — that is the server
    /// clock's job; the authoritative value arrives with the next push.
    pub fn apply_to(&self, thought: &mut Thought) {
        if let Some(title) = &self.title {
            thought.title = title.clone();
        }
        if let Some(description) = &self.description {
            thought.description = description.clone();
        }
        if let Some(visibility) = self.visibility {
            thought.visibility = visibility;
        }
    }
}
