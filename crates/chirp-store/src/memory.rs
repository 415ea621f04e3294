//! In-process `DocumentStore` with full live-query semantics.
//!
//! Serves as the test double for the feed pipeline and as executable
//! reference semantics for subscriptions: every mutation re-evaluates
//! each live descriptor and pushes a fresh snapshot.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tracing::trace;
use uuid::Uuid;

use crate::store::{DocumentStore, SubscriptionId, SubscriptionStream};
use crate::types::{BlobRef, Document, QueryDescriptor, QuerySnapshot};
use crate::StoreError;

/// Per-subscriber delivery buffer. Small is fine: consumers drain
/// promptly and coalescing is permitted by the subscription contract.
const SNAPSHOT_CHANNEL_CAPACITY: usize = 64;

struct Subscriber {
    descriptor: QueryDescriptor,
    /// Latest-value slot feeding the forwarder task. A burst of
    /// mutations may coalesce in the slot, but the final delivered
    /// snapshot is always the newest state.
    latest: watch::Sender<QuerySnapshot>,
}

/// In-memory document and blob store.
pub struct MemoryStore {
    /// Collection name -> document id -> fields.
    collections: DashMap<String, DashMap<String, Value>>,
    /// Storage path -> bytes.
    blobs: DashMap<String, Vec<u8>>,
    /// Live subscribers by id.
    subscribers: DashMap<u64, Subscriber>,
    next_subscription: AtomicU64,
}

impl MemoryStore {
    /// Create a new empty store.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            collections: DashMap::new(),
            blobs: DashMap::new(),
            subscribers: DashMap::new(),
            next_subscription: AtomicU64::new(1),
        })
    }

    /// Number of currently registered live subscriptions.
    pub fn live_subscription_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Whether a blob exists at `path`.
    pub fn has_blob(&self, path: &str) -> bool {
        self.blobs.contains_key(path)
    }

    fn documents_in(&self, collection: &str) -> Vec<Document> {
        self.collections
            .get(collection)
            .map(|docs| {
                docs.iter()
                    .map(|entry| Document::new(entry.key().clone(), entry.value().clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn snapshot_for(&self, descriptor: &QueryDescriptor) -> QuerySnapshot {
        descriptor.evaluate(self.documents_in(&descriptor.collection))
    }

    /// Publish the current result set to every subscriber watching
    /// `collection`. Subscribers whose forwarder is gone are pruned.
    fn notify(&self, collection: &str) {
        let mut closed = Vec::new();

        for entry in self.subscribers.iter() {
            let subscriber = entry.value();
            if subscriber.descriptor.collection != collection {
                continue;
            }

            let snapshot = self.snapshot_for(&subscriber.descriptor);
            if subscriber.latest.send(snapshot).is_err() {
                closed.push(*entry.key());
            } else {
                trace!(subscription = *entry.key(), collection, "snapshot published");
            }
        }

        for id in closed {
            trace!(subscription = id, "pruning closed subscriber");
            self.subscribers.remove(&id);
        }
    }

    fn merge_fields(existing: &mut Value, incoming: Value) {
        match (existing, incoming) {
            (Value::Object(base), Value::Object(patch)) => {
                for (key, value) in patch {
                    base.insert(key, value);
                }
            }
            (existing, incoming) => *existing = incoming,
        }
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn subscribe(
        &self,
        descriptor: QueryDescriptor,
    ) -> Result<SubscriptionStream, StoreError> {
        let id = self.next_subscription.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::channel(SNAPSHOT_CHANNEL_CAPACITY);

        // Initial snapshot is delivered before the subscriber is
        // registered, so it always precedes change-driven deliveries.
        let initial = self.snapshot_for(&descriptor);
        tx.try_send(initial.clone())
            .map_err(|e| StoreError::Subscription(format!("initial delivery failed: {}", e)))?;

        // Change deliveries route through a latest-value slot: the
        // forwarder absorbs consumer backpressure so a mutating caller
        // never blocks, and a slow consumer may skip intermediate
        // snapshots but always ends on the newest state.
        let (latest_tx, mut latest_rx) = watch::channel(initial);
        tokio::spawn(async move {
            while latest_rx.changed().await.is_ok() {
                let snapshot = latest_rx.borrow_and_update().clone();
                if tx.send(snapshot).await.is_err() {
                    break;
                }
            }
        });

        self.subscribers.insert(
            id,
            Subscriber {
                descriptor,
                latest: latest_tx,
            },
        );
        trace!(subscription = id, "subscription opened");

        Ok(SubscriptionStream {
            id: SubscriptionId(id),
            snapshots: rx,
        })
    }

    async fn unsubscribe(&self, id: SubscriptionId) {
        if self.subscribers.remove(&id.0).is_some() {
            trace!(subscription = id.0, "subscription removed");
        }
    }

    async fn create_document(
        &self,
        collection: &str,
        fields: Value,
    ) -> Result<String, StoreError> {
        let id = Uuid::new_v4().to_string();
        self.collections
            .entry(collection.to_string())
            .or_default()
            .insert(id.clone(), fields);
        self.notify(collection);
        Ok(id)
    }

    async fn set_document(
        &self,
        collection: &str,
        id: &str,
        fields: Value,
    ) -> Result<(), StoreError> {
        self.collections
            .entry(collection.to_string())
            .or_default()
            .insert(id.to_string(), fields);
        self.notify(collection);
        Ok(())
    }

    async fn update_document(
        &self,
        collection: &str,
        id: &str,
        fields: Value,
    ) -> Result<(), StoreError> {
        let docs = self
            .collections
            .get(collection)
            .ok_or_else(|| StoreError::NotFound {
                collection: collection.to_string(),
                id: id.to_string(),
            })?;

        match docs.get_mut(id) {
            Some(mut existing) => Self::merge_fields(existing.value_mut(), fields),
            None => {
                return Err(StoreError::NotFound {
                    collection: collection.to_string(),
                    id: id.to_string(),
                })
            }
        }
        drop(docs);

        self.notify(collection);
        Ok(())
    }

    async fn delete_document(&self, collection: &str, id: &str) -> Result<(), StoreError> {
        let removed = self
            .collections
            .get(collection)
            .and_then(|docs| docs.remove(id));

        if removed.is_none() {
            return Err(StoreError::NotFound {
                collection: collection.to_string(),
                id: id.to_string(),
            });
        }

        self.notify(collection);
        Ok(())
    }

    async fn get_document(
        &self,
        collection: &str,
        id: &str,
    ) -> Result<Option<Value>, StoreError> {
        Ok(self
            .collections
            .get(collection)
            .and_then(|docs| docs.get(id).map(|doc| doc.value().clone())))
    }

    async fn upload_blob(&self, path: &str, bytes: Vec<u8>) -> Result<BlobRef, StoreError> {
        self.blobs.insert(path.to_string(), bytes);
        Ok(BlobRef(path.to_string()))
    }

    async fn blob_url(&self, blob: &BlobRef) -> Result<String, StoreError> {
        if self.blobs.contains_key(blob.path()) {
            Ok(format!("memory://{}", blob.path()))
        } else {
            Err(StoreError::BlobNotFound(blob.path().to_string()))
        }
    }

    async fn delete_blob(&self, blob: &BlobRef) -> Result<(), StoreError> {
        self.blobs
            .remove(blob.path())
            .map(|_| ())
            .ok_or_else(|| StoreError::BlobNotFound(blob.path().to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SortDirection;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[tokio::test]
    async fn test_subscribe_delivers_initial_snapshot() {
        let store = MemoryStore::new();
        store
            .create_document("tweets", json!({"tweet": "hi", "createdAt": 1}))
            .await
            .unwrap();

        let mut stream = store
            .subscribe(QueryDescriptor::collection("tweets"))
            .await
            .unwrap();

        let snapshot = stream.snapshots.recv().await.unwrap();
        assert_eq!(snapshot.len(), 1);
    }

    #[tokio::test]
    async fn test_mutation_delivers_fresh_snapshot() {
        let store = MemoryStore::new();
        let mut stream = store
            .subscribe(
                QueryDescriptor::collection("tweets")
                    .order_by("createdAt", SortDirection::Descending),
            )
            .await
            .unwrap();

        assert!(stream.snapshots.recv().await.unwrap().is_empty());

        store
            .create_document("tweets", json!({"tweet": "first", "createdAt": 1}))
            .await
            .unwrap();
        store
            .create_document("tweets", json!({"tweet": "second", "createdAt": 2}))
            .await
            .unwrap();

        // Rapid mutations may coalesce into one delivery; the final
        // observed snapshot reflects both documents, newest first.
        let mut snapshot = stream.snapshots.recv().await.unwrap();
        while snapshot.len() < 2 {
            snapshot = stream.snapshots.recv().await.unwrap();
        }
        assert_eq!(snapshot.documents[0].fields["tweet"], "second");
    }

    #[tokio::test]
    async fn test_filtered_subscription_ignores_other_documents() {
        let store = MemoryStore::new();
        let mut stream = store
            .subscribe(
                QueryDescriptor::collection("tweets").where_field("userId", "u1"),
            )
            .await
            .unwrap();
        stream.snapshots.recv().await.unwrap();

        store
            .create_document("tweets", json!({"userId": "u2", "tweet": "x"}))
            .await
            .unwrap();

        let snapshot = stream.snapshots.recv().await.unwrap();
        assert!(snapshot.is_empty());
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_deliveries() {
        let store = MemoryStore::new();
        let mut stream = store
            .subscribe(QueryDescriptor::collection("tweets"))
            .await
            .unwrap();
        stream.snapshots.recv().await.unwrap();

        store.unsubscribe(stream.id).await;
        assert_eq!(store.live_subscription_count(), 0);

        store
            .create_document("tweets", json!({"tweet": "late"}))
            .await
            .unwrap();
        assert!(stream.snapshots.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_dropped_receiver_is_pruned_on_next_notify() {
        let store = MemoryStore::new();
        let stream = store
            .subscribe(QueryDescriptor::collection("tweets"))
            .await
            .unwrap();
        drop(stream);

        // First mutation lets the forwarder observe the dropped
        // receiver and exit; the next one prunes the subscriber.
        store
            .create_document("tweets", json!({"tweet": "x"}))
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        store
            .create_document("tweets", json!({"tweet": "y"}))
            .await
            .unwrap();
        assert_eq!(store.live_subscription_count(), 0);
    }

    #[tokio::test]
    async fn test_slow_consumer_still_lands_on_latest_state() {
        let store = MemoryStore::new();
        let mut stream = store
            .subscribe(QueryDescriptor::collection("tweets"))
            .await
            .unwrap();

        // Burst well past the delivery buffer without consuming.
        let total = SNAPSHOT_CHANNEL_CAPACITY + 8;
        for i in 0..total {
            store
                .create_document("tweets", json!({"tweet": format!("t{}", i)}))
                .await
                .unwrap();
        }

        // Intermediate snapshots may be skipped; the final delivery
        // must reflect every mutation.
        let mut last = stream.snapshots.recv().await.unwrap();
        loop {
            match tokio::time::timeout(
                std::time::Duration::from_millis(100),
                stream.snapshots.recv(),
            )
            .await
            {
                Ok(Some(snapshot)) => last = snapshot,
                _ => break,
            }
        }
        assert_eq!(last.len(), total);
    }

    #[tokio::test]
    async fn test_update_merges_fields() {
        let store = MemoryStore::new();
        let id = store
            .create_document("tweets", json!({"tweet": "old", "createdAt": 5}))
            .await
            .unwrap();

        store
            .update_document("tweets", &id, json!({"tweet": "new"}))
            .await
            .unwrap();

        let fields = store.get_document("tweets", &id).await.unwrap().unwrap();
        assert_eq!(fields, json!({"tweet": "new", "createdAt": 5}));
    }

    #[tokio::test]
    async fn test_update_missing_document_is_not_found() {
        let store = MemoryStore::new();
        let err = store
            .update_document("tweets", "nope", json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_blob_roundtrip_and_not_found() {
        let store = MemoryStore::new();
        let blob = store.upload_blob("avatars/u1", vec![1, 2, 3]).await.unwrap();

        let url = store.blob_url(&blob).await.unwrap();
        assert_eq!(url, "memory://avatars/u1");

        store.delete_blob(&blob).await.unwrap();
        let err = store.blob_url(&blob).await.unwrap_err();
        assert!(matches!(err, StoreError::BlobNotFound(_)));
    }
}
