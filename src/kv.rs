//! Generic JSON-valued key/value store over the `kv` table, per spec.md
//! Data Model invariant 6. The policy metadata layer ([`crate::policy::metadata`])
//! is this module's only consumer today, namespacing its keys under an
//! `ooss:` prefix rather than owning a table of its own.

use rusqlite::{params, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::instrument;

use crate::error::{Error, Result};
use crate::store::Store;

#[derive(Clone)]
pub struct KvStore {
    store: Store,
}

impl KvStore {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    #[instrument(skip(self), err)]
    pub async fn get<T: DeserializeOwned + Send + 'static>(&self, key: &str) -> Result<Option<T>> {
        let key = key.to_string();
        let raw: Option<String> = self
            .store
            .with_conn(move |conn| {
                conn.query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| row.get(0))
                    .optional()
            })
            .await?;

        match raw {
            Some(json) => serde_json::from_str(&json)
                .map(Some)
                .map_err(|e| Error::InvalidRequest(format!("corrupt kv value: {e}"))),
            None => Ok(None),
        }
    }

    #[instrument(skip(self, value), err)]
    pub async fn set<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let key = key.to_string();
        let json = serde_json::to_string(value)
            .map_err(|e| Error::InvalidRequest(format!("unserializable kv value: {e}")))?;
        self.store
            .with_conn(move |conn| {
                conn.execute(
                    "INSERT INTO kv (key, value) VALUES (?1, ?2)
                     ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                    params![key, json],
                )
            })
            .await?;
        Ok(())
    }

    #[instrument(skip(self), err)]
    pub async fn delete(&self, key: &str) -> Result<()> {
        let key = key.to_string();
        self.store
            .with_conn(move |conn| conn.execute("DELETE FROM kv WHERE key = ?1", params![key]))
            .await?;
        Ok(())
    }

    /// Lists all keys (with raw JSON values) whose key starts with `prefix`,
    /// ordered lexically. Used by the policy metadata store to enumerate
    /// `ooss:`-namespaced entries.
    #[instrument(skip(self), err)]
    pub async fn list_prefix(&self, prefix: &str) -> Result<Vec<(String, String)>> {
        let like = format!("{}%", escape_like(prefix));
        self.store
            .with_conn(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT key, value FROM kv WHERE key LIKE ?1 ESCAPE '\\' ORDER BY key ASC",
                )?;
                let result = stmt
                    .query_map(params![like], |row| Ok((row.get(0)?, row.get(1)?)))?
                    .collect::<rusqlite::Result<Vec<_>>>();
                result
            })
            .await
            .map_err(Error::from)
    }
}

fn escape_like(s: &str) -> String {
    s.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Sample {
        a: i32,
        b: String,
    }

    async fn kv() -> KvStore {
        KvStore::new(Store::open_in_memory().await.unwrap())
    }

    #[tokio::test]
    async fn get_missing_is_none() {
        let kv = kv().await;
        assert_eq!(kv.get::<Sample>("nope").await.unwrap(), None);
    }

    #[tokio::test]
    async fn set_then_get_roundtrips() {
        let kv = kv().await;
        let v = Sample { a: 1, b: "x".into() };
        kv.set("k", &v).await.unwrap();
        assert_eq!(kv.get::<Sample>("k").await.unwrap(), Some(v));
    }

    #[tokio::test]
    async fn set_overwrites() {
        let kv = kv().await;
        kv.set("k", &1i32).await.unwrap();
        kv.set("k", &2i32).await.unwrap();
        assert_eq!(kv.get::<i32>("k").await.unwrap(), Some(2));
    }

    #[tokio::test]
    async fn delete_removes_key() {
        let kv = kv().await;
        kv.set("k", &1i32).await.unwrap();
        kv.delete("k").await.unwrap();
        assert_eq!(kv.get::<i32>("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn list_prefix_filters_and_sorts() {
        let kv = kv().await;
        kv.set("ooss:b", &1i32).await.unwrap();
        kv.set("ooss:a", &2i32).await.unwrap();
        kv.set("other", &3i32).await.unwrap();

        let entries = kv.list_prefix("ooss:").await.unwrap();
        let keys: Vec<_> = entries.iter().map(|(k, _)| k.clone()).collect();
        assert_eq!(keys, vec!["ooss:a".to_string(), "ooss:b".to_string()]);
    }
}
