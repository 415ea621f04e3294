//! The `DocumentStore` seam over the hosted backend.

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::types::{BlobRef, QueryDescriptor, QuerySnapshot};
use crate::StoreError;

/// Identifies one live subscription on a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// A live subscription: the backend pushes the full current result set
/// on establishment and again after every relevant change.
///
/// Rapid changes may be coalesced into one delivery, but a delivered
/// snapshot is never older than the one before it.
pub struct SubscriptionStream {
    pub id: SubscriptionId,
    pub snapshots: mpsc::Receiver<QuerySnapshot>,
}

/// Remote document/blob backend operations.
///
/// Implemented by [`crate::HttpStore`] for the hosted service and by
/// [`crate::MemoryStore`] for tests and embedded use.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Open a live query. The initial snapshot arrives as the first
    /// delivery on the returned stream.
    async fn subscribe(&self, descriptor: QueryDescriptor)
        -> Result<SubscriptionStream, StoreError>;

    /// Tear down a live query. Idempotent; unknown ids are ignored.
    async fn unsubscribe(&self, id: SubscriptionId);

    /// Create a document with a server-assigned id.
    async fn create_document(&self, collection: &str, fields: Value)
        -> Result<String, StoreError>;

    /// Write a document at a caller-chosen id, replacing any existing
    /// fields. Used for documents keyed by external identity, such as
    /// the per-user profile document.
    async fn set_document(
        &self,
        collection: &str,
        id: &str,
        fields: Value,
    ) -> Result<(), StoreError>;

    /// Merge fields into an existing document. Blind last-write-wins:
    /// there is no version check.
    async fn update_document(
        &self,
        collection: &str,
        id: &str,
        fields: Value,
    ) -> Result<(), StoreError>;

    /// Delete a document.
    async fn delete_document(&self, collection: &str, id: &str) -> Result<(), StoreError>;

    /// One-shot fetch of a document's fields.
    async fn get_document(&self, collection: &str, id: &str)
        -> Result<Option<Value>, StoreError>;

    /// Upload a blob, overwriting any existing blob at `path`.
    async fn upload_blob(&self, path: &str, bytes: Vec<u8>) -> Result<BlobRef, StoreError>;

    /// Resolve a blob to a fetchable URL. `BlobNotFound` if absent.
    async fn blob_url(&self, blob: &BlobRef) -> Result<String, StoreError>;

    /// Delete a blob. `BlobNotFound` if absent.
    async fn delete_blob(&self, blob: &BlobRef) -> Result<(), StoreError>;
}

/// Narrow view of the authentication collaborator.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// The signed-in user's id, if any.
    fn current_user_id(&self) -> Option<String>;

    /// Resolves once the auth state has settled after process start.
    /// Used only to gate the initial render.
    async fn settled(&self);
}
