//! The embedded relational store.
//!
//! This wraps a single [`rusqlite::Connection`] the way the teacher wraps a
//! `redb::Database` in `directoryservice::redb::RedbDirectoryService`: the
//! connection lives behind an `Arc<Mutex<..>>` so it can be handed into
//! [`tokio::task::spawn_blocking`], which is the suspension point for every
//! operation per the concurrency model in the spec.

pub mod schema;

use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use rusqlite::Connection;
use tracing::instrument;

use crate::error::{Error, Result};

#[derive(Clone, Debug)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
    chunk_size: u64,
}

impl Store {
    /// Opens (creating if necessary) the SQLite file at `path`, running the
    /// idempotent bootstrap before returning.
    #[instrument(skip_all, fields(path = %path.as_ref().display()), err)]
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let (conn, chunk_size) = tokio::task::spawn_blocking(move || -> rusqlite::Result<_> {
            let conn = Connection::open(path)?;
            let chunk_size = schema::bootstrap(&conn)?;
            Ok((conn, chunk_size))
        })
        .await??;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            chunk_size,
        })
    }

    /// Constructs an in-memory store. Used by tests and by any embedder that
    /// doesn't need durability across process restarts.
    pub async fn open_in_memory() -> Result<Self> {
        let (conn, chunk_size) = tokio::task::spawn_blocking(move || -> rusqlite::Result<_> {
            let conn = Connection::open_in_memory()?;
            let chunk_size = schema::bootstrap(&conn)?;
            Ok((conn, chunk_size))
        })
        .await??;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            chunk_size,
        })
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    /// Runs a closure against the connection on a blocking thread.
    /// This is the single suspension point every `InodeFs` operation goes
    /// through; callers that need several statements to be atomic should
    /// use [`Store::with_txn`] instead so they all run inside one closure
    /// (and hence hold the connection mutex for their whole duration).
    pub async fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        let result = tokio::task::spawn_blocking(move || {
            let guard = conn.lock();
            f(&guard)
        })
        .await?;
        Ok(result?)
    }

    /// Runs a closure inside a `BEGIN`/`COMMIT` transaction, rolling back on
    /// any error returned by the closure (or propagated by `?`). This backs
    /// `rename` and `copy_file`'s transactional scope in the spec.
    pub async fn with_txn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&rusqlite::Transaction) -> rusqlite::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        let result = tokio::task::spawn_blocking(move || -> rusqlite::Result<T> {
            let mut guard = conn.lock();
            let txn = guard.transaction()?;
            let value = f(&txn)?;
            txn.commit()?;
            Ok(value)
        })
        .await?;
        result.map_err(Error::from)
    }
}
