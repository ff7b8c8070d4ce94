//! User projections consumed by the engine.
//!
//! The engine never owns user records — the auth provider and the profile
//! document do. [`AuthUser`] is the raw edge the auth provider hands over on
//! every state change; [`ProfileRecord`] is the live profile document; a
//! [`UserProfile`] is the fold of the two that the rest of the engine reads.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ids::UserId;

/// Minimum display-name length after trimming.
pub const MIN_DISPLAY_NAME_LEN: usize = 3;

/// Raw identity from the auth provider.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AuthUser {
    pub id: UserId,
    /// Unconfirmed addresses are gated out of all functionality.
    pub email_confirmed: bool,
}

/// The live profile document for one user.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileRecord {
    /// Unset until the user claims one.
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub is_admin: bool,
}

/// The signed-in viewer as the engine sees it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UserProfile {
    pub id: UserId,
    pub display_name: Option<String>,
    pub is_admin: bool,
    pub email_confirmed: bool,
}

impl UserProfile {
    /// Fold a confirmed identity with its profile document.
    pub fn from_parts(auth: AuthUser, record: ProfileRecord) -> Self {
        Self {
            id: auth.id,
            display_name: record.display_name,
            is_admin: record.is_admin,
            email_confirmed: auth.email_confirmed,
        }
    }

    /// Fallback when the profile watch errors: signed in, no privileges.
    pub fn minimal(auth: AuthUser) -> Self {
        Self {
            id: auth.id,
            display_name: None,
            is_admin: false,
            email_confirmed: auth.email_confirmed,
        }
    }
}

/// Local display-name rejection, surfaced before any remote call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NameError {
    #[error("display name must be at least {MIN_DISPLAY_NAME_LEN} characters")]
    TooShort,
}

/// Trim and validate a display name. Uniqueness is the backend's check; this
/// only rejects what can be rejected without a round-trip.
pub fn validate_display_name(raw: &str) -> Result<&str, NameError> {
    let trimmed = raw.trim();
    if trimmed.chars().count() < MIN_DISPLAY_NAME_LEN {
        return Err(NameError::TooShort);
    }
    Ok(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_trimmed_before_length_check() {
        assert_eq!(validate_display_name("  maya  "), Ok("maya"));
        assert_eq!(validate_display_name("  ab  "), Err(NameError::TooShort));
        assert_eq!(validate_display_name(""), Err(NameError::TooShort));
    }

    #[test]
    fn fold_keeps_auth_gate_and_profile_fields() {
        let auth = AuthUser { id: UserId::new(), email_confirmed: true };
        let record = ProfileRecord { display_name: Some("maya".into()), is_admin: true };
        let profile = UserProfile::from_parts(auth, record);
        assert!(profile.is_admin);
        assert!(profile.email_confirmed);
        assert_eq!(profile.display_name.as_deref(), Some("maya"));
    }

    #[test]
    fn minimal_profile_carries_no_privileges() {
        let auth = AuthUser { id: UserId::new(), email_confirmed: true };
        let profile = UserProfile::minimal(auth);
        assert!(!profile.is_admin);
        assert_eq!(profile.display_name, None);
    }

    #[test]
    fn missing_profile_document_parses_to_default() {
        let record: ProfileRecord = serde_json::from_str("{}").expect("empty doc");
        assert_eq!(record, ProfileRecord::default());
    }
}
