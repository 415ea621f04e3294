//! Tweet write path: post, edit, delete.
//!
//! Write failures surface only to the initiating caller; the read-path
//! cache and synchronizer state are never touched from here (the live
//! feed subscription picks the change up on its own).

use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tracing::{debug, warn};

use chirp_store::{
    tweet_photo_path, AuthProvider, BlobRef, DocumentStore, StoreError, TweetRecord,
    UserProfileRecord, MAX_TWEET_CHARS, TWEETS_COLLECTION, USERS_COLLECTION,
};

use crate::profile::ANONYMOUS;
use crate::synchronizer::FeedEntry;
use crate::FeedError;

/// Creates and mutates tweet documents on behalf of the signed-in user.
pub struct TweetComposer {
    store: Arc<dyn DocumentStore>,
    auth: Arc<dyn AuthProvider>,
}

impl TweetComposer {
    pub fn new(store: Arc<dyn DocumentStore>, auth: Arc<dyn AuthProvider>) -> Self {
        Self { store, auth }
    }

    fn validate_body(body: &str) -> Result<(), FeedError> {
        let len = body.chars().count();
        if len == 0 || len > MAX_TWEET_CHARS {
            return Err(FeedError::InvalidBody { len });
        }
        Ok(())
    }

    fn signed_in_user(&self) -> Result<String, FeedError> {
        self.auth.current_user_id().ok_or(FeedError::NotSignedIn)
    }

    /// Post a new tweet, optionally with an attached photo.
    ///
    /// The author's display name is denormalized onto the document at
    /// post time; the live profile subscription supersedes it on
    /// render. Returns the new document id.
    pub async fn post(&self, body: &str, photo: Option<Vec<u8>>) -> Result<String, FeedError> {
        Self::validate_body(body)?;
        let user_id = self.signed_in_user()?;

        let username = match self.store.get_document(USERS_COLLECTION, &user_id).await? {
            Some(fields) => serde_json::from_value::<UserProfileRecord>(fields)
                .ok()
                .and_then(|profile| profile.display_name)
                .unwrap_or_else(|| ANONYMOUS.to_string()),
            None => ANONYMOUS.to_string(),
        };

        let record = TweetRecord {
            tweet: body.to_string(),
            user_id: user_id.clone(),
            username,
            created_at: Utc::now().timestamp_millis(),
            photo: None,
            avatar: None,
        };

        let id = self
            .store
            .create_document(
                TWEETS_COLLECTION,
                serde_json::to_value(&record).map_err(StoreError::from)?,
            )
            .await?;
        debug!(tweet = %id, user = %user_id, "tweet posted");

        if let Some(bytes) = photo {
            let path = tweet_photo_path(&user_id, &id);
            let blob = self.store.upload_blob(&path, bytes).await?;
            let url = self.store.blob_url(&blob).await?;
            self.store
                .update_document(TWEETS_COLLECTION, &id, json!({ "photo": url }))
                .await?;
        }

        Ok(id)
    }

    /// Edit a tweet's text and optionally replace its photo.
    ///
    /// Only the author may edit. The replacement photo reuses the
    /// tweet's storage path, so two clients editing concurrently can
    /// overwrite each other's in-flight upload; last write wins.
    pub async fn edit(
        &self,
        entry: &FeedEntry,
        new_body: &str,
        new_photo: Option<Vec<u8>>,
    ) -> Result<(), FeedError> {
        Self::validate_body(new_body)?;
        let user_id = self.signed_in_user()?;
        if user_id != entry.author_id {
            return Err(FeedError::NotAuthor);
        }

        self.store
            .update_document(TWEETS_COLLECTION, &entry.id, json!({ "tweet": new_body }))
            .await?;

        if let Some(bytes) = new_photo {
            let path = tweet_photo_path(&user_id, &entry.id);
            if entry.photo_url.is_some() {
                if let Err(e) = self.store.delete_blob(&BlobRef(path.clone())).await {
                    warn!(tweet = %entry.id, error = %e, "previous photo cleanup failed");
                }
            }
            let blob = self.store.upload_blob(&path, bytes).await?;
            let url = self.store.blob_url(&blob).await?;
            self.store
                .update_document(TWEETS_COLLECTION, &entry.id, json!({ "photo": url }))
                .await?;
        }

        debug!(tweet = %entry.id, "tweet edited");
        Ok(())
    }

    /// Delete a tweet and its photo blob, if any.
    ///
    /// Only the author may delete. A failed blob cleanup is logged, not
    /// surfaced: the document itself is already gone.
    pub async fn delete(&self, entry: &FeedEntry) -> Result<(), FeedError> {
        let user_id = self.signed_in_user()?;
        if user_id != entry.author_id {
            return Err(FeedError::NotAuthor);
        }

        self.store
            .delete_document(TWEETS_COLLECTION, &entry.id)
            .await?;

        if entry.photo_url.is_some() {
            let blob = BlobRef(tweet_photo_path(&user_id, &entry.id));
            if let Err(e) = self.store.delete_blob(&blob).await {
                warn!(tweet = %entry.id, error = %e, "photo cleanup failed");
            }
        }

        debug!(tweet = %entry.id, "tweet deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chirp_store::{MemoryStore, StaticAuth};
    use pretty_assertions::assert_eq;

    fn composer_for(store: Arc<MemoryStore>, user: &str) -> TweetComposer {
        TweetComposer::new(store, Arc::new(StaticAuth::signed_in(user)))
    }

    fn entry(id: &str, author: &str, photo: Option<&str>) -> FeedEntry {
        FeedEntry {
            id: id.to_string(),
            author_id: author.to_string(),
            body: "hello".to_string(),
            created_at: 0,
            photo_url: photo.map(String::from),
            author_name: "Alice".to_string(),
            author_handle: None,
            author_avatar: None,
        }
    }

    #[tokio::test]
    async fn test_post_creates_document() {
        let store = MemoryStore::new();
        store
            .set_document("users", "u1", serde_json::json!({"displayName": "Alice"}))
            .await
            .unwrap();
        let composer = composer_for(store.clone(), "u1");

        let id = composer.post("hello world", None).await.unwrap();
        let fields = store.get_document("tweets", &id).await.unwrap().unwrap();
        assert_eq!(fields["tweet"], "hello world");
        assert_eq!(fields["userId"], "u1");
        assert_eq!(fields["username"], "Alice");
    }

    #[tokio::test]
    async fn test_post_with_photo_patches_url() {
        let store = MemoryStore::new();
        let composer = composer_for(store.clone(), "u1");

        let id = composer.post("with photo", Some(vec![1, 2, 3])).await.unwrap();
        let fields = store.get_document("tweets", &id).await.unwrap().unwrap();
        assert_eq!(
            fields["photo"],
            format!("memory://tweets/u1/{}", id)
        );
    }

    #[tokio::test]
    async fn test_post_rejects_invalid_body() {
        let store = MemoryStore::new();
        let composer = composer_for(store, "u1");

        assert!(matches!(
            composer.post("", None).await.unwrap_err(),
            FeedError::InvalidBody { len: 0 }
        ));

        let long = "x".repeat(MAX_TWEET_CHARS + 1);
        assert!(matches!(
            composer.post(&long, None).await.unwrap_err(),
            FeedError::InvalidBody { .. }
        ));
    }

    #[tokio::test]
    async fn test_post_requires_signed_in_user() {
        let store = MemoryStore::new();
        let composer = TweetComposer::new(store, Arc::new(StaticAuth::signed_out()));

        assert!(matches!(
            composer.post("hello", None).await.unwrap_err(),
            FeedError::NotSignedIn
        ));
    }

    #[tokio::test]
    async fn test_edit_rejects_non_author() {
        let store = MemoryStore::new();
        let composer = composer_for(store, "u2");

        assert!(matches!(
            composer.edit(&entry("t1", "u1", None), "new", None).await.unwrap_err(),
            FeedError::NotAuthor
        ));
    }

    #[tokio::test]
    async fn test_edit_updates_text() {
        let store = MemoryStore::new();
        let composer = composer_for(store.clone(), "u1");
        let id = composer.post("old", None).await.unwrap();

        composer
            .edit(&entry(&id, "u1", None), "new", None)
            .await
            .unwrap();

        let fields = store.get_document("tweets", &id).await.unwrap().unwrap();
        assert_eq!(fields["tweet"], "new");
    }

    #[tokio::test]
    async fn test_delete_removes_document_and_photo() {
        let store = MemoryStore::new();
        let composer = composer_for(store.clone(), "u1");
        let id = composer.post("bye", Some(vec![9])).await.unwrap();
        assert!(store.has_blob(&tweet_photo_path("u1", &id)));

        let fields = store.get_document("tweets", &id).await.unwrap().unwrap();
        let photo = fields["photo"].as_str().map(String::from);
        composer.delete(&entry(&id, "u1", photo.as_deref())).await.unwrap();

        assert_eq!(store.get_document("tweets", &id).await.unwrap(), None);
        assert!(!store.has_blob(&tweet_photo_path("u1", &id)));
    }
}
