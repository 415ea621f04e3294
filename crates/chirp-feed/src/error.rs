//! Error types for the feed pipeline.

use thiserror::Error;

use chirp_store::{StoreError, MAX_TWEET_CHARS};

/// Errors surfaced by the feed synchronizer and write path.
#[derive(Debug, Error)]
pub enum FeedError {
    /// Remote store operation failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Tweet body empty or over the character limit.
    #[error("invalid tweet body: {len} chars (limit {MAX_TWEET_CHARS}, minimum 1)")]
    InvalidBody { len: usize },

    /// Edit or delete attempted on someone else's tweet.
    #[error("not the tweet author")]
    NotAuthor,

    /// Write attempted with no signed-in user.
    #[error("no signed-in user")]
    NotSignedIn,

    /// `start` called on a synchronizer that already left `Idle`.
    #[error("synchronizer already started")]
    AlreadyStarted,
}
