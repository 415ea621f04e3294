//! One live query with explicit lifecycle control.
//!
//! Wraps [`DocumentStore::subscribe`] so a consumer can tie the
//! subscription to its own active lifetime: deliveries stop the moment
//! the handle is cancelled, including deliveries already in flight.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, trace};

use chirp_store::{DocumentStore, QueryDescriptor, QuerySnapshot, StoreError, SubscriptionId};

/// Invoked with the full current ordered result set on initial load and
/// on every subsequent change affecting the result set.
pub type SnapshotCallback = Arc<dyn Fn(QuerySnapshot) + Send + Sync>;

/// Factory for live query handles.
pub struct LiveQuery;

impl LiveQuery {
    /// Open a live query and deliver snapshots to `on_snapshot`.
    ///
    /// Establishment failure surfaces here as
    /// [`StoreError::Subscription`]; there is no automatic retry — the
    /// consumer decides.
    pub async fn open(
        store: Arc<dyn DocumentStore>,
        descriptor: QueryDescriptor,
        on_snapshot: SnapshotCallback,
    ) -> Result<LiveQueryHandle, StoreError> {
        let stream = store.subscribe(descriptor).await?;
        let id = stream.id;
        let cancelled = Arc::new(AtomicBool::new(false));

        let task = tokio::spawn({
            let cancelled = Arc::clone(&cancelled);
            let mut snapshots = stream.snapshots;
            async move {
                while let Some(snapshot) = snapshots.recv().await {
                    // Checked per delivery: anything racing a close is
                    // dropped on arrival, never delivered.
                    if cancelled.load(Ordering::SeqCst) {
                        trace!(subscription = %id, "delivery after close, dropped");
                        break;
                    }
                    on_snapshot(snapshot);
                }
            }
        });

        debug!(subscription = %id, "live query opened");
        Ok(LiveQueryHandle {
            id,
            store,
            cancelled,
            unsubscribed: AtomicBool::new(false),
            task,
        })
    }
}

/// Handle to one live query. Terminated exactly once; after
/// cancellation the callback is guaranteed not to run again.
pub struct LiveQueryHandle {
    id: SubscriptionId,
    store: Arc<dyn DocumentStore>,
    cancelled: Arc<AtomicBool>,
    unsubscribed: AtomicBool,
    task: JoinHandle<()>,
}

impl LiveQueryHandle {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Synchronously stop deliveries. Idempotent. The remote side is
    /// released by [`LiveQueryHandle::close`]; cancel alone only
    /// guarantees the callback never runs again.
    pub fn cancel(&self) {
        if !self.cancelled.swap(true, Ordering::SeqCst) {
            self.task.abort();
            debug!(subscription = %self.id, "live query cancelled");
        }
    }

    /// Cancel and release the remote subscription. Idempotent: repeated
    /// closes produce no duplicate unsubscribe.
    pub async fn close(&self) {
        self.cancel();
        if !self.unsubscribed.swap(true, Ordering::SeqCst) {
            self.store.unsubscribe(self.id).await;
        }
    }
}
