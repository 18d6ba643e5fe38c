//! The migration history table.
//!
//! One row per plan version. The version is a content hash over the plan
//! text and the desired-model snapshot, never over timestamps, so
//! re-running an applied plan is detected and becomes a no-op.

use crate::error::CoreResult;
use sha2::{Digest, Sha256};
use sql_connection::{Queryable, Value};
use sql_ddl::Ident;

pub const HISTORY_TABLE: &str = "_migration_history";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryStatus {
    Pending,
    Applied,
    Failed,
}

impl HistoryStatus {
    fn as_str(self) -> &'static str {
        match self {
            HistoryStatus::Pending => "pending",
            HistoryStatus::Applied => "applied",
            HistoryStatus::Failed => "failed",
        }
    }
}

/// Deterministic digest of a plan: the rendered script plus the canonical
/// model snapshot.
pub fn content_hash(script: &str, snapshot_json: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(script.as_bytes());
    hasher.update(snapshot_json.as_bytes());
    hex::encode(hasher.finalize())
}

pub struct MigrationHistory<'a> {
    conn: &'a dyn Queryable,
    schema: &'a str,
}

impl<'a> MigrationHistory<'a> {
    pub fn new(conn: &'a dyn Queryable, schema: &'a str) -> Self {
        MigrationHistory { conn, schema }
    }

    fn table(&self) -> String {
        format!("{}.{}", Ident(self.schema), Ident(HISTORY_TABLE))
    }

    pub async fn ensure_table(&self) -> CoreResult<()> {
        let sql = format!(
            "IF OBJECT_ID(N'{schema}.{table}', N'U') IS NULL\n\
             CREATE TABLE {qualified} (\n\
                 [version] nvarchar(64) NOT NULL CONSTRAINT [PK_{table}] PRIMARY KEY,\n\
                 [logicalGroup] nvarchar(200) NOT NULL,\n\
                 [status] nvarchar(20) NOT NULL,\n\
                 [startedAt] datetime2 NOT NULL CONSTRAINT [DF_{table}_startedAt] DEFAULT SYSUTCDATETIME(),\n\
                 [completedAt] datetime2 NULL,\n\
                 [durationMs] bigint NULL,\n\
                 [errorMessage] nvarchar(max) NULL,\n\
                 [snapshotJson] nvarchar(max) NULL\n\
             );",
            schema = self.schema,
            table = HISTORY_TABLE,
            qualified = self.table(),
        );

        self.conn.raw_cmd(&sql).await?;
        Ok(())
    }

    /// Whether this exact plan version has already been applied.
    pub async fn is_applied(&self, version: &str) -> CoreResult<bool> {
        let sql = format!(
            "SELECT [version] FROM {} WHERE [version] = @P1 AND [status] = 'applied';",
            self.table()
        );

        let rows = self.conn.query_raw(&sql, &[version.into()]).await?;
        Ok(!rows.is_empty())
    }

    pub async fn insert_pending(
        &self,
        version: &str,
        logical_group: &str,
        snapshot_json: &str,
    ) -> CoreResult<()> {
        // A stale pending/failed row from an earlier crashed run gives way
        // to the new attempt.
        let sql = format!(
            "DELETE FROM {table} WHERE [version] = @P1 AND [status] <> 'applied';\n\
             INSERT INTO {table} ([version], [logicalGroup], [status], [snapshotJson])\n\
             VALUES (@P1, @P2, '{status}', @P3);",
            table = self.table(),
            status = HistoryStatus::Pending.as_str(),
        );

        self.conn
            .execute_raw(
                &sql,
                &[version.into(), logical_group.into(), snapshot_json.into()],
            )
            .await?;

        Ok(())
    }

    pub async fn mark_applied(
        &self,
        version: &str,
        duration_ms: i64,
        snapshot_json: &str,
    ) -> CoreResult<()> {
        let sql = format!(
            "UPDATE {} SET [status] = '{}', [completedAt] = SYSUTCDATETIME(), [durationMs] = @P2, [snapshotJson] = @P3\n\
             WHERE [version] = @P1;",
            self.table(),
            HistoryStatus::Applied.as_str(),
        );

        self.conn
            .execute_raw(
                &sql,
                &[
                    version.into(),
                    Value::Int64(duration_ms),
                    snapshot_json.into(),
                ],
            )
            .await?;

        Ok(())
    }

    pub async fn mark_failed(&self, version: &str, error_message: &str) -> CoreResult<()> {
        let sql = format!(
            "UPDATE {} SET [status] = '{}', [completedAt] = SYSUTCDATETIME(), [errorMessage] = @P2\n\
             WHERE [version] = @P1;",
            self.table(),
            HistoryStatus::Failed.as_str(),
        );

        self.conn
            .execute_raw(&sql, &[version.into(), error_message.into()])
            .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_hash_is_deterministic_and_input_sensitive() {
        let a = content_hash("CREATE TABLE t;", "[]");
        let b = content_hash("CREATE TABLE t;", "[]");
        let c = content_hash("CREATE TABLE u;", "[]");
        let d = content_hash("CREATE TABLE t;", "[{}]");

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, d);
        assert_eq!(a.len(), 64);
    }
}
