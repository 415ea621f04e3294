//! Feed synchronizer: primary feed query plus per-author metadata
//! subscriptions, reconciled into render-ready entries.
//!
//! The primary subscription drives the visible entry list; one
//! secondary subscription per distinct visible author supplies display
//! metadata, patched into matching entries without waiting for the
//! primary query to re-fire. Cached metadata fills in immediately as a
//! placeholder while a fresh secondary delivery is pending.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use chirp_store::{
    avatar_blob_path, BlobRef, DocumentStore, QueryDescriptor, QuerySnapshot, SortDirection,
    StoreError, TweetRecord, UserProfileRecord, DEFAULT_FEED_LIMIT, TWEETS_COLLECTION,
    USERS_COLLECTION,
};

use crate::live::{LiveQuery, LiveQueryHandle, SnapshotCallback};
use crate::profile::{ProfileCache, ANONYMOUS};
use crate::FeedError;

/// Broadcast capacity for feed change notifications.
const UPDATE_CHANNEL_CAPACITY: usize = 256;

/// Lifecycle of a synchronizer instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FeedPhase {
    /// Not yet started.
    Idle = 0,
    /// Primary subscription opened, first delivery pending.
    Subscribing = 1,
    /// At least one primary delivery processed.
    Active = 2,
    /// Torn down; no further delivery may mutate state.
    Closed = 3,
}

impl From<u8> for FeedPhase {
    fn from(v: u8) -> Self {
        match v {
            0 => FeedPhase::Idle,
            1 => FeedPhase::Subscribing,
            2 => FeedPhase::Active,
            _ => FeedPhase::Closed,
        }
    }
}

/// A render-ready feed entry.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedEntry {
    pub id: String,
    pub author_id: String,
    pub body: String,
    /// Milliseconds since the Unix epoch.
    pub created_at: i64,
    pub photo_url: Option<String>,
    pub author_name: String,
    pub author_handle: Option<String>,
    pub author_avatar: Option<String>,
}

/// Change notification for feed consumers.
#[derive(Debug, Clone)]
pub enum FeedEvent {
    /// The entry list was replaced wholesale (primary delivery).
    Replaced,
    /// Entries by one author were patched in place (secondary delivery).
    Patched { author_id: String },
}

/// Freshest metadata seen for an author during this synchronizer's
/// lifetime. Outlives primary rebuilds so a new snapshot renders with
/// already-delivered names instead of regressing to the cache.
#[derive(Debug, Clone)]
struct AuthorProfile {
    name: String,
    handle: Option<String>,
    avatar: Option<String>,
}

/// Deliveries from all subscriptions, funneled into one serial stream.
enum Delivery {
    Feed(QuerySnapshot),
    Profile {
        author_id: String,
        snapshot: QuerySnapshot,
    },
}

#[derive(Default)]
struct Handles {
    primary: Option<LiveQueryHandle>,
    /// One live profile subscription per distinct visible author.
    secondaries: HashMap<String, LiveQueryHandle>,
}

/// Keeps a rendered feed consistent with the remote document stream.
pub struct FeedSynchronizer {
    store: Arc<dyn DocumentStore>,
    profiles: ProfileCache,
    limit: usize,
    phase: AtomicU8,
    entries: RwLock<Vec<FeedEntry>>,
    updates_tx: broadcast::Sender<FeedEvent>,
    handles: Mutex<Handles>,
    reconcile_task: Mutex<Option<JoinHandle<()>>>,
}

impl FeedSynchronizer {
    /// Create a synchronizer over the given store and metadata cache.
    pub fn new(store: Arc<dyn DocumentStore>, profiles: ProfileCache) -> Arc<Self> {
        Self::with_limit(store, profiles, DEFAULT_FEED_LIMIT)
    }

    /// Create a synchronizer with a custom visible-set limit.
    pub fn with_limit(
        store: Arc<dyn DocumentStore>,
        profiles: ProfileCache,
        limit: usize,
    ) -> Arc<Self> {
        let (updates_tx, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);
        Arc::new(Self {
            store,
            profiles,
            limit,
            phase: AtomicU8::new(FeedPhase::Idle as u8),
            entries: RwLock::new(Vec::new()),
            updates_tx,
            handles: Mutex::new(Handles::default()),
            reconcile_task: Mutex::new(None),
        })
    }

    /// Current lifecycle phase.
    pub fn phase(&self) -> FeedPhase {
        FeedPhase::from(self.phase.load(Ordering::SeqCst))
    }

    /// The current visible entry list, newest first.
    pub async fn entries(&self) -> Vec<FeedEntry> {
        self.entries.read().await.clone()
    }

    /// Subscribe to change notifications.
    pub fn updates(&self) -> broadcast::Receiver<FeedEvent> {
        self.updates_tx.subscribe()
    }

    /// Number of live per-author metadata subscriptions.
    pub async fn profile_subscription_count(&self) -> usize {
        self.handles.lock().await.secondaries.len()
    }

    /// Open the primary feed subscription and begin reconciling.
    ///
    /// `author_filter` scopes the feed to one author (profile view).
    /// A rejected subscribe surfaces here and leaves the synchronizer
    /// reusable (back in `Idle`); the caller decides whether to retry.
    pub async fn start(
        self: &Arc<Self>,
        author_filter: Option<&str>,
    ) -> Result<(), FeedError> {
        if self
            .phase
            .compare_exchange(
                FeedPhase::Idle as u8,
                FeedPhase::Subscribing as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_err()
        {
            return Err(FeedError::AlreadyStarted);
        }

        let mut descriptor = QueryDescriptor::collection(TWEETS_COLLECTION)
            .order_by("createdAt", SortDirection::Descending)
            .limit(self.limit);
        if let Some(author) = author_filter {
            descriptor = descriptor.where_field("userId", author);
        }

        let (tx, rx) = mpsc::unbounded_channel();

        let primary_callback: SnapshotCallback = {
            let tx = tx.clone();
            Arc::new(move |snapshot| {
                let _ = tx.send(Delivery::Feed(snapshot));
            })
        };

        let primary =
            match LiveQuery::open(Arc::clone(&self.store), descriptor, primary_callback).await {
                Ok(handle) => handle,
                Err(e) => {
                    self.phase.store(FeedPhase::Idle as u8, Ordering::SeqCst);
                    return Err(e.into());
                }
            };

        let mut handles = self.handles.lock().await;
        // stop() racing this call swaps the phase to Closed before
        // taking the lock; a subscription that finished opening after
        // that swap must not outlive the stop.
        if self.phase() == FeedPhase::Closed {
            primary.close().await;
            debug!("stopped during start, subscription released");
            return Ok(());
        }
        handles.primary = Some(primary);
        let task = tokio::spawn(Arc::clone(self).run_reconcile(rx, tx));
        *self.reconcile_task.lock().await = Some(task);
        drop(handles);

        info!(filter = ?author_filter, limit = self.limit, "feed synchronizer subscribing");
        Ok(())
    }

    /// Tear down every subscription. Idempotent.
    ///
    /// Handles are marked cancelled before any teardown work, so a
    /// delivery already queued when stop is called is dropped on
    /// arrival instead of mutating torn-down state.
    pub async fn stop(&self) {
        let previous = self.phase.swap(FeedPhase::Closed as u8, Ordering::SeqCst);
        if FeedPhase::from(previous) == FeedPhase::Closed {
            return;
        }

        let mut handles = self.handles.lock().await;

        if let Some(primary) = &handles.primary {
            primary.cancel();
        }
        for handle in handles.secondaries.values() {
            handle.cancel();
        }

        if let Some(primary) = handles.primary.take() {
            primary.close().await;
        }
        for (author, handle) in handles.secondaries.drain() {
            trace!(author, "profile subscription closed on stop");
            handle.close().await;
        }
        drop(handles);

        if let Some(task) = self.reconcile_task.lock().await.take() {
            task.abort();
        }

        info!("feed synchronizer closed");
    }

    fn notify(&self, event: FeedEvent) {
        if self.updates_tx.send(event).is_err() {
            trace!("no subscribers for feed update");
        }
    }

    /// Serially apply deliveries from the primary and all secondaries.
    async fn run_reconcile(
        self: Arc<Self>,
        mut rx: mpsc::UnboundedReceiver<Delivery>,
        tx: mpsc::UnboundedSender<Delivery>,
    ) {
        let mut seen_profiles: HashMap<String, AuthorProfile> = HashMap::new();

        while let Some(delivery) = rx.recv().await {
            if self.phase() == FeedPhase::Closed {
                trace!("delivery after stop, dropped");
                break;
            }

            match delivery {
                Delivery::Feed(snapshot) => {
                    self.apply_feed_snapshot(snapshot, &tx, &mut seen_profiles)
                        .await;
                }
                Delivery::Profile {
                    author_id,
                    snapshot,
                } => {
                    self.apply_profile_snapshot(&author_id, snapshot, &mut seen_profiles)
                        .await;
                }
            }
        }
    }

    /// Replace the visible entry list and reconcile the secondary
    /// subscription set against the new distinct-author set.
    async fn apply_feed_snapshot(
        &self,
        snapshot: QuerySnapshot,
        tx: &mpsc::UnboundedSender<Delivery>,
        seen_profiles: &mut HashMap<String, AuthorProfile>,
    ) {
        let mut handles = self.handles.lock().await;
        // stop() holds the same lock while tearing down; re-check so a
        // delivery racing it cannot resurrect subscriptions.
        if self.phase() == FeedPhase::Closed {
            return;
        }

        let mut next_entries = Vec::with_capacity(snapshot.len());
        for doc in snapshot.documents {
            let record: TweetRecord = match doc.decode() {
                Ok(record) => record,
                Err(e) => {
                    warn!(id = %doc.id, error = %e, "skipping undecodable tweet document");
                    continue;
                }
            };

            let seen = seen_profiles.get(&record.user_id);
            next_entries.push(FeedEntry {
                id: doc.id,
                author_name: seen
                    .map(|p| p.name.clone())
                    .unwrap_or_else(|| self.profiles.display_name(&record.user_id)),
                author_handle: seen.and_then(|p| p.handle.clone()),
                author_avatar: seen
                    .and_then(|p| p.avatar.clone())
                    .or_else(|| self.profiles.avatar_url(&record.user_id)),
                author_id: record.user_id,
                body: record.tweet,
                created_at: record.created_at,
                photo_url: record.photo,
            });
        }

        let authors: HashSet<String> = next_entries
            .iter()
            .map(|entry| entry.author_id.clone())
            .collect();

        debug!(
            entries = next_entries.len(),
            authors = authors.len(),
            "applying feed snapshot"
        );

        *self.entries.write().await = next_entries;

        // First delivery makes the feed live.
        let _ = self.phase.compare_exchange(
            FeedPhase::Subscribing as u8,
            FeedPhase::Active as u8,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );

        self.notify(FeedEvent::Replaced);

        // Close subscriptions for authors no longer visible, in the
        // same reconciliation step.
        let departed: Vec<String> = handles
            .secondaries
            .keys()
            .filter(|author| !authors.contains(*author))
            .cloned()
            .collect();
        for author in departed {
            if let Some(handle) = handles.secondaries.remove(&author) {
                handle.close().await;
                debug!(author, "profile subscription closed");
            }
            seen_profiles.remove(&author);
        }

        // Open one subscription per newly visible author; existing ones
        // are reused.
        for author in authors {
            if handles.secondaries.contains_key(&author) {
                continue;
            }

            let descriptor =
                QueryDescriptor::collection(USERS_COLLECTION).where_document(author.clone());
            let callback: SnapshotCallback = {
                let tx = tx.clone();
                let author = author.clone();
                Arc::new(move |snapshot| {
                    let _ = tx.send(Delivery::Profile {
                        author_id: author.clone(),
                        snapshot,
                    });
                })
            };

            match LiveQuery::open(Arc::clone(&self.store), descriptor, callback).await {
                Ok(handle) => {
                    debug!(author, "profile subscription opened");
                    handles.secondaries.insert(author, handle);
                }
                Err(e) => {
                    // Local failure: cached metadata keeps rendering,
                    // siblings and the feed itself stay up.
                    warn!(author, error = %e, "profile subscription failed");
                }
            }
        }
    }

    /// Patch fresh author metadata into matching visible entries and
    /// write it through to the cache.
    async fn apply_profile_snapshot(
        &self,
        author_id: &str,
        snapshot: QuerySnapshot,
        seen_profiles: &mut HashMap<String, AuthorProfile>,
    ) {
        let handles = self.handles.lock().await;
        if self.phase() == FeedPhase::Closed {
            return;
        }

        let Some(doc) = snapshot.documents.into_iter().next() else {
            trace!(author = author_id, "profile document absent");
            return;
        };

        let record: UserProfileRecord = match doc.decode() {
            Ok(record) => record,
            Err(e) => {
                warn!(author = author_id, error = %e, "undecodable profile document");
                return;
            }
        };

        let name = record
            .display_name
            .unwrap_or_else(|| ANONYMOUS.to_string());
        self.profiles.record_display_name(author_id, &name);

        // Avatar lookups are cache-first; a miss resolves the blob once
        // and memoizes the URL. Absent blob means no avatar.
        let avatar = match self.profiles.avatar_url(author_id) {
            Some(url) => Some(url),
            None => {
                match self
                    .store
                    .blob_url(&BlobRef(avatar_blob_path(author_id)))
                    .await
                {
                    Ok(url) => {
                        self.profiles.record_avatar_url(author_id, &url);
                        Some(url)
                    }
                    Err(StoreError::BlobNotFound(_)) => None,
                    Err(e) => {
                        warn!(author = author_id, error = %e, "avatar lookup failed");
                        None
                    }
                }
            }
        };

        seen_profiles.insert(
            author_id.to_string(),
            AuthorProfile {
                name: name.clone(),
                handle: record.display_id.clone(),
                avatar: avatar.clone(),
            },
        );

        let mut patched = false;
        {
            let mut entries = self.entries.write().await;
            for entry in entries
                .iter_mut()
                .filter(|entry| entry.author_id == author_id)
            {
                entry.author_name = name.clone();
                entry.author_handle = record.display_id.clone();
                entry.author_avatar = avatar.clone();
                patched = true;
            }
        }
        drop(handles);

        if patched {
            trace!(author = author_id, "entries patched");
            self.notify(FeedEvent::Patched {
                author_id: author_id.to_string(),
            });
        }
    }
}
