//! In-memory blob store backing the `SET` and `GET` commands.
//!
//! Owned by the dispatcher; every node (and every test) gets its own instance.
//! Unbounded, no eviction.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Clone, Default)]
pub struct DataStore {
    entries: Arc<RwLock<HashMap<String, Bytes>>>,
}

impl DataStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `data` under a freshly generated key and return the key
    pub async fn set(&self, data: Bytes) -> String {
        let key = Uuid::new_v4().to_string();
        self.entries.write().await.insert(key.clone(), data);
        key
    }

    pub async fn get(&self, key: &str) -> Option<Bytes> {
        self.entries.read().await.get(key).cloned()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}
