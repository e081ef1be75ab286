//! Access Policy, per spec.md §4.3. Evaluates `(operation, path, extra)`
//! against cached policy metadata (local glob checks, deny-precedence)
//! and then, if local checks pass and a hook is registered, against the
//! pluggable [`hook::AccessHook`].
//!
//! Spec.md's step numbering ("1. If no hook is registered, allow...")
//! reads as if hook-absence short-circuits before the metadata check at
//! all, which would contradict scenario S3 (a deny glob must still apply
//! with no hook registered). This implementation runs the local check
//! unconditionally and treats "no hook" as "skip step 4, local result is
//! final" — see DESIGN.md.

pub mod cache;
pub mod glob;
pub mod hook;
pub mod metadata;

use std::sync::Arc;

use tracing::instrument;

use crate::error::{PolicyError, Result};
use crate::kv::KvStore;
use crate::store::Store;

pub use hook::{AccessContext, AccessHook};
pub use metadata::PolicyMetadata;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Read,
    Write,
    Delete,
    Mkdir,
    Readdir,
    Stat,
    Execute,
    Rename,
    Copy,
    Symlink,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Read => "read",
            Operation::Write => "write",
            Operation::Delete => "delete",
            Operation::Mkdir => "mkdir",
            Operation::Readdir => "readdir",
            Operation::Stat => "stat",
            Operation::Execute => "execute",
            Operation::Rename => "rename",
            Operation::Copy => "copy",
            Operation::Symlink => "symlink",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Local,
    Callback,
}

impl Source {
    fn as_str(&self) -> &'static str {
        match self {
            Source::Local => "local",
            Source::Callback => "callback",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub allowed: bool,
    pub source: &'static str,
    pub reason: Option<String>,
}

impl Decision {
    fn allow(source: Source) -> Self {
        Self {
            allowed: true,
            source: source.as_str(),
            reason: None,
        }
    }

    fn deny(source: Source, reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            source: source.as_str(),
            reason: Some(reason.into()),
        }
    }
}

#[derive(Clone)]
pub struct AccessPolicy {
    cache: Arc<cache::MetadataCache>,
    hook: Option<Arc<dyn AccessHook>>,
}

impl AccessPolicy {
    pub fn new(store: Store) -> Self {
        let metadata_store = metadata::PolicyMetadataStore::new(KvStore::new(store));
        Self {
            cache: Arc::new(cache::MetadataCache::new(metadata_store)),
            hook: None,
        }
    }

    pub fn with_hook(mut self, hook: Arc<dyn AccessHook>) -> Self {
        self.hook = Some(hook);
        self
    }

    pub fn metadata_store(&self) -> &metadata::PolicyMetadataStore {
        self.cache.store()
    }

    #[instrument(skip(self), err)]
    pub async fn set_metadata(&self, metadata: PolicyMetadata) -> Result<()> {
        self.metadata_store().set(metadata).await?;
        self.cache.invalidate();
        Ok(())
    }

    #[instrument(skip(self), err)]
    pub async fn delete_metadata(&self) -> Result<()> {
        self.metadata_store().delete().await?;
        self.cache.invalidate();
        Ok(())
    }

    #[instrument(skip(self, extra), err)]
    pub async fn check_access(
        &self,
        operation: Operation,
        path: &str,
        extra: Option<serde_json::Value>,
    ) -> Result<Decision> {
        let metadata = self.cache.get().await?;

        if let Some(ref metadata) = metadata {
            if let Some(pat) = metadata.denied_paths.iter().find(|p| glob::matches(p, path)) {
                return Ok(Decision::deny(
                    Source::Local,
                    format!("Path matches denied pattern: {pat}"),
                ));
            }
            if !metadata.allowed_paths.is_empty()
                && !metadata.allowed_paths.iter().any(|p| glob::matches(p, path))
            {
                return Ok(Decision::deny(
                    Source::Local,
                    format!("Path does not match any allowed pattern: {path}"),
                ));
            }
        }

        let Some(hook) = &self.hook else {
            return Ok(Decision::allow(Source::Local));
        };

        let ctx = AccessContext {
            operation,
            path: path.to_string(),
            workspace_id: metadata.as_ref().and_then(|m| m.workspace_id.clone()),
            workload_id: metadata.as_ref().and_then(|m| m.workload_id.clone()),
            trust_class: metadata.as_ref().and_then(|m| m.trust_class.clone()),
            data: extra,
        };

        if hook.check(&ctx).await {
            Ok(Decision::allow(Source::Callback))
        } else {
            Ok(Decision::deny(Source::Callback, "Denied by access hook"))
        }
    }

    #[instrument(skip(self, extra), err)]
    pub async fn check_access_or_throw(
        &self,
        operation: Operation,
        path: &str,
        extra: Option<serde_json::Value>,
    ) -> Result<()> {
        let decision = self.check_access(operation, path, extra).await?;
        if decision.allowed {
            Ok(())
        } else {
            Err(PolicyError::denied(
                operation.as_str(),
                path,
                decision.reason.unwrap_or_default(),
            )
            .into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Store;

    struct AlwaysDeny;

    #[async_trait::async_trait]
    impl AccessHook for AlwaysDeny {
        async fn check(&self, _ctx: &AccessContext) -> bool {
            false
        }
    }

    async fn policy() -> AccessPolicy {
        AccessPolicy::new(Store::open_in_memory().await.unwrap())
    }

    #[tokio::test]
    async fn no_hook_no_metadata_allows() {
        let policy = policy().await;
        let d = policy.check_access(Operation::Read, "/a", None).await.unwrap();
        assert!(d.allowed);
        assert_eq!(d.source, "local");
    }

    #[tokio::test]
    async fn s3_deny_precedence() {
        let policy = policy().await;
        policy
            .set_metadata(PolicyMetadata {
                allowed_paths: vec!["/w/**".into()],
                denied_paths: vec!["/w/.env".into()],
                ..Default::default()
            })
            .await
            .unwrap();

        let denied = policy.check_access(Operation::Read, "/w/.env", None).await.unwrap();
        assert!(!denied.allowed);
        assert!(denied.reason.unwrap().contains(".env"));

        let allowed = policy.check_access(Operation::Read, "/w/app.ts", None).await.unwrap();
        assert!(allowed.allowed);
    }

    #[tokio::test]
    async fn empty_allow_list_is_unconstrained() {
        let policy = policy().await;
        policy
            .set_metadata(PolicyMetadata {
                denied_paths: vec!["/secret".into()],
                ..Default::default()
            })
            .await
            .unwrap();

        assert!(policy.check_access(Operation::Read, "/anything", None).await.unwrap().allowed);
        assert!(!policy.check_access(Operation::Read, "/secret", None).await.unwrap().allowed);
    }

    #[tokio::test]
    async fn hook_denies_after_local_allow() {
        let policy = policy().await.with_hook(Arc::new(AlwaysDeny));
        let d = policy.check_access(Operation::Read, "/a", None).await.unwrap();
        assert!(!d.allowed);
        assert_eq!(d.source, "callback");
    }

    #[tokio::test]
    async fn cache_invalidated_immediately_on_set() {
        let policy = policy().await;
        policy
            .set_metadata(PolicyMetadata {
                denied_paths: vec!["/a".into()],
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(!policy.check_access(Operation::Read, "/a", None).await.unwrap().allowed);

        policy.set_metadata(PolicyMetadata::default()).await.unwrap();
        assert!(policy.check_access(Operation::Read, "/a", None).await.unwrap().allowed);
    }

    #[tokio::test]
    async fn check_access_or_throw_raises_permission_denied() {
        let policy = policy().await;
        policy
            .set_metadata(PolicyMetadata {
                denied_paths: vec!["/a".into()],
                ..Default::default()
            })
            .await
            .unwrap();

        let err = policy
            .check_access_or_throw(Operation::Read, "/a", None)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("permission denied"));
    }
}
