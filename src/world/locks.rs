//! Sharded keyed locks for per-tile and per-player serialization.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// A map of async mutexes keyed by entity id.
///
/// Operations on the same key serialize; operations on different keys
/// proceed in parallel (modulo shard-map contention, which is held only for
/// the handle lookup, never across an await).
pub struct KeyedLocks<K> {
    shards: Vec<Mutex<HashMap<K, Arc<AsyncMutex<()>>>>>,
}

impl<K: Eq + Hash + Clone> KeyedLocks<K> {
    pub fn new(shard_count: usize) -> Self {
        let shard_count = shard_count.max(1);
        Self {
            shards: (0..shard_count).map(|_| Mutex::new(HashMap::new())).collect(),
        }
    }

    fn handle(&self, key: &K) -> Arc<AsyncMutex<()>> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        let shard = &self.shards[(hasher.finish() as usize) % self.shards.len()];
        let mut map = shard.lock().expect("lock shard poisoned");
        map.entry(key.clone()).or_default().clone()
    }

    /// Wait for and hold the lock for `key`.
    pub async fn acquire(&self, key: &K) -> OwnedMutexGuard<()> {
        self.handle(key).lock_owned().await
    }
}
