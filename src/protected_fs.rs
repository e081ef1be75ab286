//! The access-controlled filesystem surface, per spec.md §4.4. Mirrors
//! every [`InodeFs`] operation, prefixing each with an [`AccessPolicy`]
//! check using the operation mapping the spec prescribes, then delegates.

use tracing::instrument;

use crate::error::Result;
use crate::guards::RmOptions;
use crate::inode_fs::{InodeFs, Stat, StatFs};
use crate::policy::{AccessPolicy, Operation};

#[derive(Clone)]
pub struct ProtectedFs {
    inner: InodeFs,
    policy: AccessPolicy,
}

impl ProtectedFs {
    pub fn new(inner: InodeFs, policy: AccessPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn inner(&self) -> &InodeFs {
        &self.inner
    }

    pub fn policy(&self) -> &AccessPolicy {
        &self.policy
    }

    #[instrument(skip(self), err)]
    pub async fn stat(&self, path: &str) -> Result<Stat> {
        self.policy.check_access_or_throw(Operation::Stat, path, None).await?;
        self.inner.stat(path).await
    }

    #[instrument(skip(self), err)]
    pub async fn lstat(&self, path: &str) -> Result<Stat> {
        self.policy.check_access_or_throw(Operation::Stat, path, None).await?;
        self.inner.lstat(path).await
    }

    #[instrument(skip(self), err)]
    pub async fn access(&self, path: &str) -> Result<()> {
        self.policy.check_access_or_throw(Operation::Stat, path, None).await?;
        self.inner.access(path).await
    }

    #[instrument(skip(self), err)]
    pub async fn read_file(&self, path: &str) -> Result<Vec<u8>> {
        self.policy.check_access_or_throw(Operation::Read, path, None).await?;
        self.inner.read_file(path).await
    }

    #[instrument(skip(self), err)]
    pub async fn read_file_utf8(&self, path: &str) -> Result<String> {
        self.policy.check_access_or_throw(Operation::Read, path, None).await?;
        self.inner.read_file_utf8(path).await
    }

    #[instrument(skip(self, content), err)]
    pub async fn write_file(&self, path: &str, content: &[u8]) -> Result<()> {
        self.policy.check_access_or_throw(Operation::Write, path, None).await?;
        self.inner.write_file(path, content).await
    }

    #[instrument(skip(self), err)]
    pub async fn readdir(&self, path: &str) -> Result<Vec<String>> {
        self.policy.check_access_or_throw(Operation::Readdir, path, None).await?;
        self.inner.readdir(path).await
    }

    #[instrument(skip(self), err)]
    pub async fn readdir_plus(&self, path: &str) -> Result<Vec<(String, Stat)>> {
        self.policy.check_access_or_throw(Operation::Readdir, path, None).await?;
        self.inner.readdir_plus(path).await
    }

    #[instrument(skip(self), err)]
    pub async fn mkdir(&self, path: &str) -> Result<()> {
        self.policy.check_access_or_throw(Operation::Mkdir, path, None).await?;
        self.inner.mkdir(path).await
    }

    #[instrument(skip(self), err)]
    pub async fn rmdir(&self, path: &str) -> Result<()> {
        self.policy.check_access_or_throw(Operation::Delete, path, None).await?;
        self.inner.rmdir(path).await
    }

    #[instrument(skip(self), err)]
    pub async fn unlink(&self, path: &str) -> Result<()> {
        self.policy.check_access_or_throw(Operation::Delete, path, None).await?;
        self.inner.unlink(path).await
    }

    #[instrument(skip(self), err)]
    pub async fn rm(&self, path: &str, opts: RmOptions) -> Result<()> {
        self.policy.check_access_or_throw(Operation::Delete, path, None).await?;
        self.inner.rm(path, opts).await
    }

    #[instrument(skip(self), err)]
    pub async fn rename(&self, old: &str, new: &str) -> Result<()> {
        self.policy.check_access_or_throw(Operation::Rename, old, None).await?;
        self.policy.check_access_or_throw(Operation::Write, new, None).await?;
        self.inner.rename(old, new).await
    }

    #[instrument(skip(self), err)]
    pub async fn copy_file(&self, src: &str, dest: &str) -> Result<()> {
        self.policy.check_access_or_throw(Operation::Read, src, None).await?;
        self.policy.check_access_or_throw(Operation::Write, dest, None).await?;
        self.inner.copy_file(src, dest).await
    }

    #[instrument(skip(self), err)]
    pub async fn symlink(&self, target: &str, linkpath: &str) -> Result<()> {
        self.policy
            .check_access_or_throw(Operation::Symlink, linkpath, None)
            .await?;
        self.inner.symlink(target, linkpath).await
    }

    #[instrument(skip(self), err)]
    pub async fn readlink(&self, path: &str) -> Result<String> {
        self.policy.check_access_or_throw(Operation::Read, path, None).await?;
        self.inner.readlink(path).await
    }

    #[instrument(skip(self), err)]
    pub async fn open(&self, path: &str) -> Result<ProtectedFileHandle> {
        self.policy.check_access_or_throw(Operation::Read, path, None).await?;
        let handle = self.inner.open(path).await?;
        Ok(ProtectedFileHandle {
            handle,
            policy: self.policy.clone(),
        })
    }

    /// No per-path concept, so it carries no access check, per spec.md §4.4.
    pub async fn statfs(&self) -> Result<StatFs> {
        self.inner.statfs().await
    }
}

/// Wraps [`crate::inode_fs::FileHandle`], re-checking `write` at every
/// `pwrite`/`truncate` call (spec.md §4.4: "this matters when a handle is
/// held across a policy update"). `pread` inherits the open-time check and
/// does not re-check.
pub struct ProtectedFileHandle {
    handle: crate::inode_fs::FileHandle,
    policy: AccessPolicy,
}

impl ProtectedFileHandle {
    pub async fn pread(&self, offset: u64, size: u64) -> Result<Vec<u8>> {
        self.handle.pread(offset, size).await
    }

    pub async fn pwrite(&self, offset: u64, data: &[u8]) -> Result<usize> {
        self.policy
            .check_access_or_throw(Operation::Write, self.handle.path(), None)
            .await?;
        self.handle.pwrite(offset, data).await
    }

    pub async fn truncate(&self, size: u64) -> Result<()> {
        self.policy
            .check_access_or_throw(Operation::Write, self.handle.path(), None)
            .await?;
        self.handle.truncate(size).await
    }

    pub async fn fsync(&self) -> Result<()> {
        self.handle.fsync().await
    }

    pub async fn fstat(&self) -> Result<Stat> {
        self.handle.fstat().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::PolicyMetadata;
    use crate::store::Store;

    async fn protected() -> ProtectedFs {
        let store = Store::open_in_memory().await.unwrap();
        ProtectedFs::new(InodeFs::new(store.clone()), AccessPolicy::new(store))
    }

    #[tokio::test]
    async fn allowed_write_then_read() {
        let pfs = protected().await;
        pfs.write_file("/a", b"hi").await.unwrap();
        assert_eq!(pfs.read_file("/a").await.unwrap(), b"hi");
    }

    #[tokio::test]
    async fn denied_read_is_eacces() {
        let pfs = protected().await;
        pfs.inner().write_file("/w/.env", b"secret").await.unwrap();
        pfs.policy()
            .set_metadata(PolicyMetadata {
                allowed_paths: vec!["/w/**".into()],
                denied_paths: vec!["/w/.env".into()],
                ..Default::default()
            })
            .await
            .unwrap();

        let err = pfs.read_file("/w/.env").await.unwrap_err();
        assert!(err.to_string().contains("EACCES") || err.to_string().contains("permission denied"));
    }

    #[tokio::test]
    async fn handle_write_rechecked_after_policy_update() {
        let pfs = protected().await;
        pfs.write_file("/f", b"x").await.unwrap();
        let handle = pfs.open("/f").await.unwrap();

        pfs.policy()
            .set_metadata(PolicyMetadata {
                denied_paths: vec!["/f".into()],
                ..Default::default()
            })
            .await
            .unwrap();

        assert!(handle.pwrite(0, b"y").await.is_err());
        // pread was not re-checked at open time beyond the initial allow,
        // and carries no further check afterward.
        assert!(handle.pread(0, 1).await.is_ok());
    }
}
