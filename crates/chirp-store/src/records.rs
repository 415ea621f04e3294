//! Record types, collection constants, and storage path helpers.

use serde::{Deserialize, Serialize};

/// Collection holding tweet documents.
pub const TWEETS_COLLECTION: &str = "tweets";

/// Collection holding user profile documents (keyed by user id).
pub const USERS_COLLECTION: &str = "users";

/// Maximum tweet body length in characters.
pub const MAX_TWEET_CHARS: usize = 180;

/// Result-count limit for the main feed query.
pub const DEFAULT_FEED_LIMIT: usize = 25;

/// Storage path for a user's avatar blob.
pub fn avatar_blob_path(user_id: &str) -> String {
    format!("avatars/{}", user_id)
}

/// Storage path for a tweet's attached photo.
///
/// Edits reuse this path (no content addressing), so two clients editing
/// the same tweet concurrently can overwrite each other's in-flight
/// upload. Last write wins.
pub fn tweet_photo_path(user_id: &str, tweet_id: &str) -> String {
    format!("tweets/{}/{}", user_id, tweet_id)
}

/// A tweet document as stored in the backend.
///
/// `username` is denormalized at post time; the live profile
/// subscription supersedes it on render.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TweetRecord {
    pub tweet: String,
    pub user_id: String,
    pub username: String,
    /// Milliseconds since the Unix epoch.
    pub created_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub photo: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
}

/// A user profile document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfileRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    /// Public handle shown as `@displayId`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_tweet_record_wire_format() {
        let record = TweetRecord {
            tweet: "hello".to_string(),
            user_id: "u1".to_string(),
            username: "Alice".to_string(),
            created_at: 1_700_000_000_000,
            photo: None,
            avatar: None,
        };

        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(
            value,
            json!({
                "tweet": "hello",
                "userId": "u1",
                "username": "Alice",
                "createdAt": 1_700_000_000_000i64,
            })
        );
    }

    #[test]
    fn test_profile_record_tolerates_missing_fields() {
        let profile: UserProfileRecord = serde_json::from_value(json!({})).unwrap();
        assert_eq!(profile.display_name, None);
        assert_eq!(profile.display_id, None);
    }

    #[test]
    fn test_blob_paths() {
        assert_eq!(avatar_blob_path("u1"), "avatars/u1");
        assert_eq!(tweet_photo_path("u1", "t9"), "tweets/u1/t9");
    }
}
