//! Client for chirp's hosted document and blob backend.
//!
//! This crate provides the remote half of the feed pipeline:
//!
//! - **DocumentStore**: trait over the backend's document CRUD, blob storage,
//!   and live query subscriptions
//! - **HttpStore**: REST + WebSocket client against a hosted backend
//! - **MemoryStore**: in-process implementation with full live-query
//!   semantics, used by tests and embedded setups
//! - **AuthProvider**: narrow seam to the authentication collaborator

pub mod auth;
mod error;
pub mod http;
pub mod memory;
mod records;
mod store;
mod types;

pub use auth::StaticAuth;
pub use error::StoreError;
pub use http::HttpStore;
pub use memory::MemoryStore;
pub use records::{
    avatar_blob_path, tweet_photo_path, TweetRecord, UserProfileRecord, DEFAULT_FEED_LIMIT,
    MAX_TWEET_CHARS, TWEETS_COLLECTION, USERS_COLLECTION,
};
pub use store::{AuthProvider, DocumentStore, SubscriptionId, SubscriptionStream};
pub use types::{
    BlobRef, Document, OrderBy, QueryDescriptor, QueryFilter, QuerySnapshot, SortDirection,
};
