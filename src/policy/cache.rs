//! Read-through cache for policy metadata, per spec.md §4.3 step 2 and §5's
//! "metadata cache... 5-second TTL; a concurrent writer... may cause stale
//! reads until TTL expiry or explicit invalidation."

use std::time::{Duration, Instant};

use parking_lot::Mutex;

use super::metadata::{PolicyMetadata, PolicyMetadataStore};
use crate::error::Result;

const TTL: Duration = Duration::from_secs(5);

struct Entry {
    value: Option<PolicyMetadata>,
    fetched_at: Instant,
}

pub struct MetadataCache {
    store: PolicyMetadataStore,
    entry: Mutex<Option<Entry>>,
}

impl MetadataCache {
    pub fn new(store: PolicyMetadataStore) -> Self {
        Self {
            store,
            entry: Mutex::new(None),
        }
    }

    pub async fn get(&self) -> Result<Option<PolicyMetadata>> {
        if let Some(entry) = self.entry.lock().as_ref() {
            if entry.fetched_at.elapsed() < TTL {
                return Ok(entry.value.clone());
            }
        }

        let value = self.store.get().await?;
        *self.entry.lock() = Some(Entry {
            value: value.clone(),
            fetched_at: Instant::now(),
        });
        Ok(value)
    }

    /// Called by every metadata set/delete per spec.md §4.3 step 2 ("any
    /// explicit set/update/delete invalidates the cache").
    pub fn invalidate(&self) {
        *self.entry.lock() = None;
    }

    pub fn store(&self) -> &PolicyMetadataStore {
        &self.store
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::KvStore;
    use crate::store::Store;

    async fn cache() -> MetadataCache {
        MetadataCache::new(PolicyMetadataStore::new(KvStore::new(
            Store::open_in_memory().await.unwrap(),
        )))
    }

    #[tokio::test]
    async fn caches_between_calls() {
        let cache = cache().await;
        cache
            .store()
            .set(PolicyMetadata {
                workspace_id: Some("a".into()),
                ..Default::default()
            })
            .await
            .unwrap();

        assert_eq!(cache.get().await.unwrap().unwrap().workspace_id, Some("a".into()));

        // bypass the cache and change the underlying value directly
        cache
            .store()
            .set(PolicyMetadata {
                workspace_id: Some("b".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        // still serves the stale cached value because we haven't invalidated
        assert_eq!(cache.get().await.unwrap().unwrap().workspace_id, Some("a".into()));
    }

    #[tokio::test]
    async fn invalidate_forces_refetch() {
        let cache = cache().await;
        cache
            .store()
            .set(PolicyMetadata {
                workspace_id: Some("a".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        cache.get().await.unwrap();

        cache
            .store()
            .set(PolicyMetadata {
                workspace_id: Some("b".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        cache.invalidate();

        assert_eq!(cache.get().await.unwrap().unwrap().workspace_id, Some("b".into()));
    }
}
