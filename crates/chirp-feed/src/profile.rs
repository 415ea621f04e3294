//! Memoized author metadata over the key/value store.

use std::sync::Arc;

use tracing::trace;

use crate::kv::KeyValueCache;

/// Fallback shown while no display name is known for an author.
pub const ANONYMOUS: &str = "Anonymous";

fn username_key(user_id: &str) -> String {
    format!("username-{}", user_id)
}

fn avatar_key(user_id: &str) -> String {
    format!("avatar-{}", user_id)
}

/// Write-through cache for per-author display metadata.
///
/// Exists purely to eliminate name/avatar flicker on repeat views of
/// the same author: remote metadata lookups are slower than rendering a
/// feed item. Staleness is tolerated; the live per-author subscription
/// corrects it asynchronously. Never blocks, never fails.
#[derive(Clone)]
pub struct ProfileCache {
    kv: Arc<dyn KeyValueCache>,
}

impl ProfileCache {
    pub fn new(kv: Arc<dyn KeyValueCache>) -> Self {
        Self { kv }
    }

    /// Cached display name, or `"Anonymous"` if none is known.
    pub fn display_name(&self, user_id: &str) -> String {
        self.kv
            .get(&username_key(user_id))
            .unwrap_or_else(|| ANONYMOUS.to_string())
    }

    /// Cached avatar URL, if any.
    pub fn avatar_url(&self, user_id: &str) -> Option<String> {
        self.kv.get(&avatar_key(user_id))
    }

    /// Record a fresh display name. Last write wins.
    pub fn record_display_name(&self, user_id: &str, name: &str) {
        trace!(user_id, name, "caching display name");
        self.kv.set(&username_key(user_id), name);
    }

    /// Record a fresh avatar URL. Last write wins.
    pub fn record_avatar_url(&self, user_id: &str, url: &str) {
        trace!(user_id, "caching avatar url");
        self.kv.set(&avatar_key(user_id), url);
    }
}
