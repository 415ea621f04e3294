//! Read-path cache and live-subscription synchronizer for the chirp feed.
//!
//! The pipeline keeps a locally rendered feed consistent with a remotely
//! mutating document stream while hiding the latency of repeated author
//! metadata lookups:
//!
//! - **KeyValueCache**: persistent string key/value store
//! - **ProfileCache**: memoized display name / avatar URL per user id
//! - **LiveQuery**: one remote subscription with explicit lifecycle
//! - **FeedSynchronizer**: primary feed query plus per-author metadata
//!   subscriptions, reconciled into render-ready entries
//! - **TweetComposer**: post/edit/delete write path

mod composer;
mod error;
pub mod kv;
mod live;
mod profile;
mod synchronizer;
mod timefmt;

pub use composer::TweetComposer;
pub use error::FeedError;
pub use kv::{FileKv, KeyValueCache, MemoryKv, Theme};
pub use live::{LiveQuery, LiveQueryHandle, SnapshotCallback};
pub use profile::ProfileCache;
pub use synchronizer::{FeedEntry, FeedEvent, FeedPhase, FeedSynchronizer};
pub use timefmt::format_timestamp;
