//! Open file handles, per spec.md §4.2's `open`/`pread`/`pwrite`/`truncate`/
//! `fsync`/`fstat` surface.
//!
//! A handle is bound to a *path*, not a cached inode number (spec.md §9
//! design note): every call re-resolves the path against the store, so a
//! handle observes concurrent renames the same way a POSIX fd observes
//! `rename(2)` of a still-open file would not — the next `pwrite` after a
//! `rename` away from under the handle's path fails with `ENOENT`, rather
//! than silently writing through a dangling reference.

use rusqlite::{params, Connection};
use tracing::instrument;

use super::{read_chunks, write_chunks, OpResult, Stat};
use crate::error::{FsError, Result};
use crate::guards;
use crate::resolver;
use crate::store::schema::unix_now;

use super::InodeFs;

#[derive(Debug)]
pub struct FileHandle {
    fs: InodeFs,
    path: String,
}

impl FileHandle {
    pub(super) fn new(fs: InodeFs, path: String) -> Self {
        Self { fs, path }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    #[instrument(skip(self), err)]
    pub async fn fstat(&self) -> Result<Stat> {
        self.fs.stat(&self.path).await
    }

    #[instrument(skip(self), err)]
    pub async fn pread(&self, offset: u64, size: u64) -> Result<Vec<u8>> {
        let path = self.path.clone();
        let res: OpResult<Vec<u8>> = self
            .fs
            .store()
            .with_conn(move |conn| {
                let ino = match resolve_regular(conn, &path, "pread")? {
                    Ok(ino) => ino,
                    Err(e) => return Ok(Err(e)),
                };
                let data = read_chunks(conn, ino)?;
                let start = (offset as usize).min(data.len());
                let end = start.saturating_add(size as usize).min(data.len());
                Ok(Ok(data[start..end].to_vec()))
            })
            .await?;
        Ok(res?)
    }

    #[instrument(skip(self, data), err)]
    pub async fn pwrite(&self, offset: u64, data: &[u8]) -> Result<usize> {
        let path = self.path.clone();
        let chunk_size = self.fs.store().chunk_size();
        let data = data.to_vec();
        let written = data.len();
        let res: OpResult<()> = self
            .fs
            .store()
            .with_conn(move |conn| {
                let ino = match resolve_regular(conn, &path, "pwrite")? {
                    Ok(ino) => ino,
                    Err(e) => return Ok(Err(e)),
                };
                let mut buf = read_chunks(conn, ino)?;
                let end = offset as usize + data.len();
                if buf.len() < end {
                    buf.resize(end, 0);
                }
                buf[offset as usize..end].copy_from_slice(&data);
                write_chunks(conn, ino, &buf, chunk_size)?;
                let now = unix_now();
                conn.execute(
                    "UPDATE fs_inode SET size = ?1, mtime = ?2, ctime = ?2 WHERE ino = ?3",
                    params![buf.len() as i64, now, ino],
                )?;
                Ok(Ok(()))
            })
            .await?;
        res?;
        Ok(written)
    }

    #[instrument(skip(self), err)]
    pub async fn truncate(&self, size: u64) -> Result<()> {
        let path = self.path.clone();
        let chunk_size = self.fs.store().chunk_size();
        let res: OpResult<()> = self
            .fs
            .store()
            .with_conn(move |conn| {
                let ino = match resolve_regular(conn, &path, "truncate")? {
                    Ok(ino) => ino,
                    Err(e) => return Ok(Err(e)),
                };
                let mut buf = read_chunks(conn, ino)?;
                buf.resize(size as usize, 0);
                write_chunks(conn, ino, &buf, chunk_size)?;
                let now = unix_now();
                conn.execute(
                    "UPDATE fs_inode SET size = ?1, mtime = ?2, ctime = ?2 WHERE ino = ?3",
                    params![buf.len() as i64, now, ino],
                )?;
                Ok(Ok(()))
            })
            .await?;
        Ok(res?)
    }

    /// No-op: every write already lands in the store before its future
    /// resolves, so there is nothing left to flush.
    pub async fn fsync(&self) -> Result<()> {
        Ok(())
    }
}

fn resolve_regular(conn: &Connection, path: &str, syscall: &'static str) -> rusqlite::Result<OpResult<i64>> {
    let ino = match resolver::resolve(conn, path)? {
        Some(ino) => ino,
        None => return Ok(Err(FsError::new("ENOENT", syscall, path))),
    };
    let mode: i64 = conn.query_row("SELECT mode FROM fs_inode WHERE ino = ?1", params![ino], |r| r.get(0))?;
    if let Err(e) = guards::require_not_dir(mode, path, syscall) {
        return Ok(Err(e));
    }
    Ok(Ok(ino))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Store;

    async fn fs() -> InodeFs {
        InodeFs::new(Store::open_in_memory().await.unwrap())
    }

    #[tokio::test]
    async fn pread_pwrite_roundtrip() {
        let fs = fs().await;
        fs.write_file("/f", b"hello world").await.unwrap();
        let h = fs.open("/f").await.unwrap();

        assert_eq!(h.pread(0, 5).await.unwrap(), b"hello");
        assert_eq!(h.pread(6, 5).await.unwrap(), b"world");
        assert_eq!(h.pread(100, 5).await.unwrap(), Vec::<u8>::new());
    }

    #[tokio::test]
    async fn pwrite_extends_with_zero_fill() {
        let fs = fs().await;
        fs.write_file("/f", b"ab").await.unwrap();
        let h = fs.open("/f").await.unwrap();

        h.pwrite(4, b"cd").await.unwrap();
        let content = fs.read_file("/f").await.unwrap();
        assert_eq!(content, b"ab\x00\x00cd");
    }

    #[tokio::test]
    async fn pwrite_overwrites_in_place() {
        let fs = fs().await;
        fs.write_file("/f", b"aaaaaa").await.unwrap();
        let h = fs.open("/f").await.unwrap();

        h.pwrite(2, b"XX").await.unwrap();
        assert_eq!(fs.read_file("/f").await.unwrap(), b"aaXXaa");
    }

    #[tokio::test]
    async fn truncate_shrinks_and_grows() {
        let fs = fs().await;
        fs.write_file("/f", b"hello world").await.unwrap();
        let h = fs.open("/f").await.unwrap();

        h.truncate(5).await.unwrap();
        assert_eq!(fs.read_file("/f").await.unwrap(), b"hello");

        h.truncate(8).await.unwrap();
        assert_eq!(fs.read_file("/f").await.unwrap(), b"hello\x00\x00\x00");
    }

    #[tokio::test]
    async fn handle_fails_after_path_removed() {
        let fs = fs().await;
        fs.write_file("/f", b"x").await.unwrap();
        let h = fs.open("/f").await.unwrap();
        fs.unlink("/f").await.unwrap();

        assert!(h.pread(0, 1).await.is_err());
    }

    #[tokio::test]
    async fn open_on_directory_is_eisdir() {
        let fs = fs().await;
        fs.mkdir("/d").await.unwrap();
        let err = fs.open("/d").await.unwrap_err();
        assert!(err.to_string().contains("EISDIR"));
    }
}
