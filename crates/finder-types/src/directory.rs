//! Read-only views of posts and users supplied by neighbouring services.

use serde::{Deserialize, Serialize};

use crate::ids::{PostId, UserId};

wire_enum! {
    PostStatus as "post status" {
        Active => "active",
        Resolved => "resolved",
        Expired => "expired",
        Deleted => "deleted",
    }
}

wire_enum! {
    PostKind as "post kind" {
        Lost => "lost",
        Found => "found",
    }
}

/// What a contact request needs to know about its post.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostSummary {
    pub id: PostId,
    pub title: String,
    pub kind: PostKind,
    pub status: PostStatus,
    pub owner_id: UserId,
    pub created_at: u64,
}

/// Display preferences a notifier may honour.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserPreferences {
    pub timezone: String,
    pub language: String,
}

impl Default for UserPreferences {
    fn default() -> Self {
        Self {
            timezone: "UTC".into(),
            language: "en".into(),
        }
    }
}

/// A user as shown to the other party. Carries no email or phone.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrivacySafeUser {
    pub user_id: UserId,
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub preferences: UserPreferences,
}

impl PrivacySafeUser {
    /// Placeholder used when the directory has no profile for `user_id`.
    pub fn anonymous(user_id: UserId) -> Self {
        Self {
            user_id,
            display_name: "Anonymous".into(),
            avatar_url: None,
            preferences: UserPreferences::default(),
        }
    }
}
