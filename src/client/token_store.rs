//! Volatile access-token storage for the session client
//!
//! Only the access token lives here. The refresh token stays in the HTTP
//! cookie jar and is never readable by callers.

use std::sync::Arc;
use tokio::sync::RwLock;

/// In-memory slot for the current access token, shared by clones.
///
/// Concurrent refreshes may race to write; the last write wins.
#[derive(Debug, Clone, Default)]
pub struct AccessTokenStore {
    token: Arc<RwLock<Option<String>>>,
}

impl AccessTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current access token, if any
    pub async fn get(&self) -> Option<String> {
        self.token.read().await.clone()
    }

    pub async fn set(&self, token: impl Into<String>) {
        *self.token.write().await = Some(token.into());
    }

    pub async fn clear(&self) {
        *self.token.write().await = None;
    }

    /// Check if an access token is held
    pub async fn is_authenticated(&self) -> bool {
        self.token.read().await.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_get_clear() {
        let store = AccessTokenStore::new();
        assert!(store.get().await.is_none());

        store.set("first").await;
        assert_eq!(store.get().await.as_deref(), Some("first"));
        assert!(store.is_authenticated().await);

        store.clear().await;
        assert!(!store.is_authenticated().await);
    }

    #[tokio::test]
    async fn test_clones_share_slot() {
        let store = AccessTokenStore::new();
        let other = store.clone();

        other.set("shared").await;
        assert_eq!(store.get().await.as_deref(), Some("shared"));

        store.set("latest").await;
        assert_eq!(other.get().await.as_deref(), Some("latest"));
    }
}
