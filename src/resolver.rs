//! Lexical dentry walk: root → target, per spec.md §4.1. This is the only
//! place `ENOENT` for an intermediate path component is produced; callers
//! further up (`inode_fs`) turn a missing *leaf* into whatever errno fits
//! the calling operation (`ENOENT` for `stat`, `EEXIST`'s absence check for
//! `mkdir`, etc).

use rusqlite::{params, Connection};

use crate::path;
use crate::store::schema::ROOT_INO;

/// Looks up a single child by `(parent_ino, name)`.
pub fn lookup_child(conn: &Connection, parent_ino: i64, name: &str) -> rusqlite::Result<Option<i64>> {
    match conn.query_row(
        "SELECT ino FROM fs_dentry WHERE parent_ino = ?1 AND name = ?2",
        params![parent_ino, name],
        |row| row.get(0),
    ) {
        Ok(ino) => Ok(Some(ino)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Resolves a normalized path to its inode number, or `None` if any
/// component along the way is missing.
pub fn resolve(conn: &Connection, normalized_path: &str) -> rusqlite::Result<Option<i64>> {
    let mut ino = ROOT_INO;
    for name in path::components(normalized_path) {
        match lookup_child(conn, ino, name)? {
            Some(child) => ino = child,
            None => return Ok(None),
        }
    }
    Ok(Some(ino))
}

/// Resolves the parent directory of `normalized_path` and returns
/// `(parent_ino, basename)`. Returns `None` if `normalized_path` is the
/// root (which has no parent) or if any component of the parent chain is
/// missing. Does not check that the parent is actually a directory, nor
/// that the basename itself exists — callers do that with [`resolve`] and
/// `guards`.
pub fn resolve_parent<'a>(
    conn: &Connection,
    normalized_path: &'a str,
) -> rusqlite::Result<Option<(i64, &'a str)>> {
    let Some((parent, basename)) = path::split_parent(normalized_path) else {
        return Ok(None);
    };

    match resolve(conn, &parent)? {
        Some(parent_ino) => Ok(Some((parent_ino, basename))),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::schema;

    fn setup() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        schema::bootstrap(&conn).unwrap();
        conn
    }

    fn mkdir(conn: &Connection, parent: i64, name: &str) -> i64 {
        let now = schema::unix_now();
        conn.execute(
            "INSERT INTO fs_inode (mode, uid, gid, size, atime, mtime, ctime) VALUES (?1, 0, 0, 0, ?2, ?2, ?2)",
            params![0o040755, now],
        )
        .unwrap();
        let ino = conn.last_insert_rowid();
        conn.execute(
            "INSERT INTO fs_dentry (name, parent_ino, ino) VALUES (?1, ?2, ?3)",
            params![name, parent, ino],
        )
        .unwrap();
        ino
    }

    #[test]
    fn resolves_root() {
        let conn = setup();
        assert_eq!(resolve(&conn, "/").unwrap(), Some(ROOT_INO));
    }

    #[test]
    fn resolves_nested_path() {
        let conn = setup();
        let a = mkdir(&conn, ROOT_INO, "a");
        let b = mkdir(&conn, a, "b");
        assert_eq!(resolve(&conn, "/a").unwrap(), Some(a));
        assert_eq!(resolve(&conn, "/a/b").unwrap(), Some(b));
    }

    #[test]
    fn missing_component_is_none() {
        let conn = setup();
        mkdir(&conn, ROOT_INO, "a");
        assert_eq!(resolve(&conn, "/a/missing").unwrap(), None);
        assert_eq!(resolve(&conn, "/missing").unwrap(), None);
    }

    #[test]
    fn resolve_parent_for_new_child() {
        let conn = setup();
        let a = mkdir(&conn, ROOT_INO, "a");
        let (parent_ino, basename) = resolve_parent(&conn, "/a/new.txt").unwrap().unwrap();
        assert_eq!(parent_ino, a);
        assert_eq!(basename, "new.txt");
    }

    #[test]
    fn resolve_parent_root_is_none() {
        let conn = setup();
        assert_eq!(resolve_parent(&conn, "/").unwrap(), None);
    }

    #[test]
    fn resolve_parent_missing_grandparent() {
        let conn = setup();
        assert_eq!(resolve_parent(&conn, "/missing/child").unwrap(), None);
    }
}
