//! Idempotent schema creation and bootstrap of the fixed `fs_config` values.
//!
//! Mirrors the shape of the teacher's `directoryservice::redb::create_schema`:
//! open (or create) every table inside one write transaction, then commit.

use rusqlite::Connection;

pub const DEFAULT_CHUNK_SIZE: u64 = 4096;
pub const ROOT_INO: i64 = 1;
const ROOT_MODE: i64 = 0o040755;

pub fn bootstrap(conn: &Connection) -> rusqlite::Result<u64> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS fs_config (
            key   TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS fs_inode (
            ino   INTEGER PRIMARY KEY AUTOINCREMENT,
            mode  INTEGER NOT NULL,
            uid   INTEGER NOT NULL DEFAULT 0,
            gid   INTEGER NOT NULL DEFAULT 0,
            size  INTEGER NOT NULL DEFAULT 0,
            atime INTEGER NOT NULL,
            mtime INTEGER NOT NULL,
            ctime INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS fs_dentry (
            id         INTEGER PRIMARY KEY AUTOINCREMENT,
            name       TEXT NOT NULL,
            parent_ino INTEGER NOT NULL,
            ino        INTEGER NOT NULL
        );
        CREATE UNIQUE INDEX IF NOT EXISTS fs_dentry_parent_name
            ON fs_dentry (parent_ino, name);
        CREATE INDEX IF NOT EXISTS fs_dentry_parent
            ON fs_dentry (parent_ino);
        CREATE INDEX IF NOT EXISTS fs_dentry_ino
            ON fs_dentry (ino);

        CREATE TABLE IF NOT EXISTS fs_data (
            ino         INTEGER NOT NULL,
            chunk_index INTEGER NOT NULL,
            data        BLOB NOT NULL,
            PRIMARY KEY (ino, chunk_index)
        );

        CREATE TABLE IF NOT EXISTS fs_symlink (
            ino    INTEGER PRIMARY KEY,
            target TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS kv (
            key   TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS tool_calls (
            id           INTEGER PRIMARY KEY AUTOINCREMENT,
            name         TEXT NOT NULL,
            parameters   TEXT,
            result       TEXT,
            error        TEXT,
            status       TEXT NOT NULL CHECK (status IN ('pending', 'success', 'error')),
            started_at   INTEGER NOT NULL,
            completed_at INTEGER,
            duration_ms  INTEGER
        );
        ",
    )?;

    ensure_root_inode(conn)?;
    ensure_chunk_size(conn)
}

fn ensure_root_inode(conn: &Connection) -> rusqlite::Result<()> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM fs_inode WHERE ino = ?1)",
        [ROOT_INO],
        |row| row.get(0),
    )?;

    if !exists {
        let now = unix_now();
        conn.execute(
            "INSERT INTO fs_inode (ino, mode, uid, gid, size, atime, mtime, ctime)
             VALUES (?1, ?2, 0, 0, 0, ?3, ?3, ?3)",
            rusqlite::params![ROOT_INO, ROOT_MODE, now],
        )?;
    }

    Ok(())
}

/// Reads `fs_config.chunk_size`, installing the default on first open.
/// Per the spec, this value is set once and never changed afterward.
fn ensure_chunk_size(conn: &Connection) -> rusqlite::Result<u64> {
    let existing: Option<String> = conn
        .query_row(
            "SELECT value FROM fs_config WHERE key = 'chunk_size'",
            [],
            |row| row.get(0),
        )
        .ok();

    match existing {
        Some(v) => Ok(v.parse().unwrap_or(DEFAULT_CHUNK_SIZE)),
        None => {
            conn.execute(
                "INSERT INTO fs_config (key, value) VALUES ('chunk_size', ?1)",
                [DEFAULT_CHUNK_SIZE.to_string()],
            )?;
            Ok(DEFAULT_CHUNK_SIZE)
        }
    }
}

pub fn unix_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}
