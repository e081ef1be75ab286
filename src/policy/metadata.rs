//! Policy metadata persistence: spec.md Data Model invariant 6. Every
//! write lands in two places under the `ooss:` KV prefix — the composite
//! `ooss:metadata` record (authoritative on read) and a set of individual
//! `ooss:<field>` shadow entries for callers that want a single field
//! without decoding the whole record.

use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::error::Result;
use crate::kv::KvStore;
use crate::store::schema::unix_now;

const METADATA_KEY: &str = "ooss:metadata";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct PolicyMetadata {
    pub workspace_id: Option<String>,
    pub workload_id: Option<String>,
    pub sandbox_id: Option<String>,
    pub trust_class: Option<String>,
    #[serde(default)]
    pub allowed_paths: Vec<String>,
    #[serde(default)]
    pub denied_paths: Vec<String>,
    pub created_at: i64,
    pub updated_at: i64,
    #[serde(default)]
    pub custom: serde_json::Map<String, serde_json::Value>,
}

#[derive(Clone)]
pub struct PolicyMetadataStore {
    kv: KvStore,
}

impl PolicyMetadataStore {
    pub fn new(kv: KvStore) -> Self {
        Self { kv }
    }

    #[instrument(skip(self), err)]
    pub async fn get(&self) -> Result<Option<PolicyMetadata>> {
        self.kv.get(METADATA_KEY).await
    }

    /// Writes the composite record plus every shadow field. `created_at` is
    /// preserved across updates by the caller reading the previous record
    /// first if it wants that behavior; this method simply persists what
    /// it is given.
    #[instrument(skip(self, metadata), err)]
    pub async fn set(&self, mut metadata: PolicyMetadata) -> Result<()> {
        metadata.updated_at = unix_now();
        if metadata.created_at == 0 {
            metadata.created_at = metadata.updated_at;
        }

        self.kv.set(METADATA_KEY, &metadata).await?;
        self.kv.set("ooss:workspaceId", &metadata.workspace_id).await?;
        self.kv.set("ooss:workloadId", &metadata.workload_id).await?;
        self.kv.set("ooss:sandboxId", &metadata.sandbox_id).await?;
        self.kv.set("ooss:trustClass", &metadata.trust_class).await?;
        self.kv.set("ooss:allowedPaths", &metadata.allowed_paths).await?;
        self.kv.set("ooss:deniedPaths", &metadata.denied_paths).await?;
        self.kv.set("ooss:createdAt", &metadata.created_at).await?;
        self.kv.set("ooss:updatedAt", &metadata.updated_at).await?;
        Ok(())
    }

    #[instrument(skip(self), err)]
    pub async fn delete(&self) -> Result<()> {
        for key in [
            METADATA_KEY,
            "ooss:workspaceId",
            "ooss:workloadId",
            "ooss:sandboxId",
            "ooss:trustClass",
            "ooss:allowedPaths",
            "ooss:deniedPaths",
            "ooss:createdAt",
            "ooss:updatedAt",
        ] {
            self.kv.delete(key).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Store;

    async fn store() -> PolicyMetadataStore {
        PolicyMetadataStore::new(KvStore::new(Store::open_in_memory().await.unwrap()))
    }

    #[tokio::test]
    async fn get_missing_is_none() {
        let store = store().await;
        assert_eq!(store.get().await.unwrap(), None);
    }

    #[tokio::test]
    async fn set_then_get_roundtrips_composite() {
        let store = store().await;
        let metadata = PolicyMetadata {
            workspace_id: Some("ws1".into()),
            allowed_paths: vec!["/w/**".into()],
            denied_paths: vec!["/w/.env".into()],
            ..Default::default()
        };
        store.set(metadata.clone()).await.unwrap();

        let got = store.get().await.unwrap().unwrap();
        assert_eq!(got.workspace_id, metadata.workspace_id);
        assert_eq!(got.allowed_paths, metadata.allowed_paths);
        assert_eq!(got.denied_paths, metadata.denied_paths);
        assert!(got.created_at > 0);
    }

    #[tokio::test]
    async fn set_writes_shadow_fields() {
        let store = store().await;
        store
            .set(PolicyMetadata {
                workspace_id: Some("ws1".into()),
                ..Default::default()
            })
            .await
            .unwrap();

        let shadow: Option<String> = store.kv.get("ooss:workspaceId").await.unwrap();
        assert_eq!(shadow, Some("ws1".to_string()));
    }

    #[tokio::test]
    async fn delete_clears_composite_and_shadow() {
        let store = store().await;
        store.set(PolicyMetadata::default()).await.unwrap();
        store.delete().await.unwrap();

        assert_eq!(store.get().await.unwrap(), None);
        let shadow: Option<String> = store.kv.get("ooss:workspaceId").await.unwrap();
        assert_eq!(shadow, None);
    }
}
