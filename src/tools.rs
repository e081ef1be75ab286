//! Bookkeeping for the `tool_calls` table: each invocation an agent makes
//! through this filesystem's surface can be recorded start-to-finish, which
//! is what lets the overlay/diff and policy layers explain "why" a change
//! happened when asked.

use rusqlite::{params, OptionalExtension};
use tracing::instrument;

use crate::error::Result;
use crate::store::schema::unix_now;
use crate::store::Store;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolCallStatus {
    Pending,
    Success,
    Error,
}

impl ToolCallStatus {
    fn as_str(&self) -> &'static str {
        match self {
            ToolCallStatus::Pending => "pending",
            ToolCallStatus::Success => "success",
            ToolCallStatus::Error => "error",
        }
    }

    fn from_str(s: &str) -> Self {
        match s {
            "success" => ToolCallStatus::Success,
            "error" => ToolCallStatus::Error,
            _ => ToolCallStatus::Pending,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCall {
    pub id: i64,
    pub name: String,
    pub parameters: Option<String>,
    pub result: Option<String>,
    pub error: Option<String>,
    pub status: ToolCallStatus,
    pub started_at: i64,
    pub completed_at: Option<i64>,
    pub duration_ms: Option<i64>,
}

#[derive(Clone)]
pub struct ToolCallLog {
    store: Store,
}

impl ToolCallLog {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Records the start of a call, returning its id for later completion.
    #[instrument(skip(self, parameters), err)]
    pub async fn start(&self, name: &str, parameters: Option<String>) -> Result<i64> {
        let name = name.to_string();
        let id = self
            .store
            .with_conn(move |conn| {
                let now = unix_now();
                conn.execute(
                    "INSERT INTO tool_calls (name, parameters, status, started_at)
                     VALUES (?1, ?2, 'pending', ?3)",
                    params![name, parameters, now],
                )?;
                Ok(conn.last_insert_rowid())
            })
            .await?;
        Ok(id)
    }

    #[instrument(skip(self, result), err)]
    pub async fn record_success(&self, id: i64, result: Option<String>) -> Result<()> {
        self.complete(id, ToolCallStatus::Success, result, None).await
    }

    #[instrument(skip(self), err)]
    pub async fn record_error(&self, id: i64, error: String) -> Result<()> {
        self.complete(id, ToolCallStatus::Error, None, Some(error)).await
    }

    async fn complete(
        &self,
        id: i64,
        status: ToolCallStatus,
        result: Option<String>,
        error: Option<String>,
    ) -> Result<()> {
        self.store
            .with_conn(move |conn| {
                let now = unix_now();
                let started_at: i64 =
                    conn.query_row("SELECT started_at FROM tool_calls WHERE id = ?1", params![id], |r| r.get(0))?;
                conn.execute(
                    "UPDATE tool_calls
                     SET status = ?1, result = ?2, error = ?3, completed_at = ?4, duration_ms = ?5
                     WHERE id = ?6",
                    params![
                        status.as_str(),
                        result,
                        error,
                        now,
                        (now - started_at) * 1000,
                        id
                    ],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    #[instrument(skip(self), err)]
    pub async fn get(&self, id: i64) -> Result<Option<ToolCall>> {
        self.store
            .with_conn(move |conn| {
                conn.query_row(
                    "SELECT id, name, parameters, result, error, status, started_at, completed_at, duration_ms
                     FROM tool_calls WHERE id = ?1",
                    params![id],
                    row_to_tool_call,
                )
                .optional()
            })
            .await
            .map_err(Into::into)
    }

    #[instrument(skip(self), err)]
    pub async fn get_recent(&self, limit: u32) -> Result<Vec<ToolCall>> {
        self.store
            .with_conn(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, name, parameters, result, error, status, started_at, completed_at, duration_ms
                     FROM tool_calls ORDER BY started_at DESC LIMIT ?1",
                )?;
                let result = stmt
                    .query_map(params![limit], row_to_tool_call)?
                    .collect::<rusqlite::Result<Vec<_>>>();
                result
            })
            .await
            .map_err(Into::into)
    }
}

fn row_to_tool_call(row: &rusqlite::Row) -> rusqlite::Result<ToolCall> {
    Ok(ToolCall {
        id: row.get(0)?,
        name: row.get(1)?,
        parameters: row.get(2)?,
        result: row.get(3)?,
        error: row.get(4)?,
        status: ToolCallStatus::from_str(&row.get::<_, String>(5)?),
        started_at: row.get(6)?,
        completed_at: row.get(7)?,
        duration_ms: row.get(8)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn log() -> ToolCallLog {
        ToolCallLog::new(Store::open_in_memory().await.unwrap())
    }

    #[tokio::test]
    async fn start_then_record_success() {
        let log = log().await;
        let id = log.start("readFile", Some("{\"path\":\"/a\"}".into())).await.unwrap();
        log.record_success(id, Some("ok".into())).await.unwrap();

        let call = log.get(id).await.unwrap().unwrap();
        assert_eq!(call.status, ToolCallStatus::Success);
        assert_eq!(call.result.as_deref(), Some("ok"));
        assert!(call.completed_at.is_some());
    }

    #[tokio::test]
    async fn record_error_sets_message() {
        let log = log().await;
        let id = log.start("rm", None).await.unwrap();
        log.record_error(id, "EACCES".into()).await.unwrap();

        let call = log.get(id).await.unwrap().unwrap();
        assert_eq!(call.status, ToolCallStatus::Error);
        assert_eq!(call.error.as_deref(), Some("EACCES"));
    }

    #[tokio::test]
    async fn get_recent_orders_newest_first() {
        let log = log().await;
        let a = log.start("a", None).await.unwrap();
        let b = log.start("b", None).await.unwrap();

        let recent = log.get_recent(10).await.unwrap();
        assert_eq!(recent[0].id, b);
        assert_eq!(recent[1].id, a);
    }
}
