//! Applying migration records and tracking what has run.
//!
//! Applied migrations are recorded in a history table, by default
//! `__drift_migrations`:
//!
//! ```sql
//! CREATE TABLE IF NOT EXISTS "__drift_migrations" (
//!     "id" TEXT PRIMARY KEY,
//!     "version" TEXT NOT NULL,
//!     "applied_at" TIMESTAMPTZ NOT NULL DEFAULT now()
//! );
//! ```
//!
//! Each pending record runs in its own transaction, opened with an explicit
//! `BEGIN` on the runner's connection. The transaction covers both the DDL
//! and the history row, so a failed migration leaves no trace.

use crate::{
    Connection, ConnectionExt, Dispatcher, Error, MigrationRecord, PostgresDispatcher, Result,
    apply_operations,
};
use drift_schema::quote_ident;
use std::collections::HashSet;

/// Default name of the history table.
pub const DEFAULT_HISTORY_TABLE: &str = "__drift_migrations";

/// Whether a migration record has been applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationStatus {
    pub id: String,
    pub applied: bool,
}

/// Records from `records` whose id is not in `applied`, in the given order.
pub fn pending<'r>(
    records: &'r [MigrationRecord],
    applied: &HashSet<String>,
) -> Vec<&'r MigrationRecord> {
    records
        .iter()
        .filter(|r| !applied.contains(&r.id))
        .collect()
}

/// Runs migration records against a database.
///
/// ```ignore
/// let records = MigrationDir::new("migrations").load_all()?;
/// let runner = MigrationRunner::new(&client);
/// runner.migrate(&records).await?;
/// ```
pub struct MigrationRunner<'a, C: Connection + ?Sized, D: Dispatcher = PostgresDispatcher> {
    conn: &'a C,
    dispatcher: D,
    history_table: String,
}

impl<'a, C: Connection + ?Sized> MigrationRunner<'a, C> {
    pub fn new(conn: &'a C) -> Self {
        Self::with_dispatcher(conn, PostgresDispatcher)
    }
}

impl<'a, C: Connection + ?Sized, D: Dispatcher> MigrationRunner<'a, C, D> {
    pub fn with_dispatcher(conn: &'a C, dispatcher: D) -> Self {
        Self {
            conn,
            dispatcher,
            history_table: DEFAULT_HISTORY_TABLE.to_string(),
        }
    }

    /// Use a different history table name.
    pub fn history_table(mut self, name: impl Into<String>) -> Self {
        self.history_table = name.into();
        self
    }

    /// Create the history table if it does not exist.
    pub async fn ensure_history_table(&self) -> Result<()> {
        let sql = format!(
            "CREATE TABLE IF NOT EXISTS {} (\n    \"id\" TEXT PRIMARY KEY,\n    \"version\" TEXT NOT NULL,\n    \"applied_at\" TIMESTAMPTZ NOT NULL DEFAULT now()\n);",
            quote_ident(&self.history_table)
        );
        self.conn.traced().batch_execute(&sql).await?;
        Ok(())
    }

    /// Ids of every migration recorded in the history table.
    pub async fn applied_ids(&self) -> Result<HashSet<String>> {
        self.ensure_history_table().await?;
        let sql = format!(
            "SELECT \"id\" FROM {} ORDER BY \"id\"",
            quote_ident(&self.history_table)
        );
        let rows = self.conn.traced().query(&sql, &[]).await?;
        rows.iter()
            .map(|row| row.try_get::<_, String>(0).map_err(Error::from))
            .collect()
    }

    /// Applied/pending state of each record, in record order.
    pub async fn status(&self, records: &[MigrationRecord]) -> Result<Vec<MigrationStatus>> {
        let applied = self.applied_ids().await?;
        Ok(records
            .iter()
            .map(|r| MigrationStatus {
                id: r.id.clone(),
                applied: applied.contains(&r.id),
            })
            .collect())
    }

    /// Apply every pending record in order, returning the applied ids.
    ///
    /// Stops at the first failure; migrations applied before it stay
    /// committed.
    pub async fn migrate(&self, records: &[MigrationRecord]) -> Result<Vec<String>> {
        let applied = self.applied_ids().await?;
        let pending = pending(records, &applied);
        tracing::debug!(
            total = records.len(),
            pending = pending.len(),
            "running migrations"
        );

        let mut ran = Vec::with_capacity(pending.len());
        for record in pending {
            self.apply(record).await?;
            tracing::info!(id = %record.id, operations = record.operations().len(), "applied migration");
            ran.push(record.id.clone());
        }
        Ok(ran)
    }

    async fn apply(&self, record: &MigrationRecord) -> Result<()> {
        let conn = self.conn.traced();
        let failed = |step: &'static str, source: tokio_postgres::Error| Error::Transaction {
            migration: record.id.clone(),
            step,
            source,
        };

        conn.batch_execute("BEGIN")
            .await
            .map_err(|e| failed("BEGIN", e))?;

        if let Err(source) = apply_operations(&self.dispatcher, self.conn, record.operations()).await
        {
            self.rollback(&record.id).await;
            return Err(Error::Execution {
                migration: record.id.clone(),
                source,
            });
        }

        let insert = format!(
            "INSERT INTO {} (\"id\", \"version\") VALUES ($1, $2)",
            quote_ident(&self.history_table)
        );
        if let Err(e) = conn.execute(&insert, &[&record.id, &record.version]).await {
            self.rollback(&record.id).await;
            return Err(failed("history insert", e));
        }

        // A failed COMMIT ends the transaction on the server.
        conn.batch_execute("COMMIT")
            .await
            .map_err(|e| failed("COMMIT", e))
    }

    async fn rollback(&self, id: &str) {
        if let Err(e) = self.conn.traced().batch_execute("ROLLBACK").await {
            tracing::warn!(id, error = %e, "rollback failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Operation;
    use crate::dispatch::tests::RecordingConn;
    use drift_schema::ColumnAttributes;

    fn drop_table(name: &str) -> Operation {
        Operation::DropTable {
            name: name.to_string(),
        }
    }

    #[test]
    fn test_pending_skips_applied() {
        let records = vec![
            MigrationRecord::new("20260101000000", vec![]),
            MigrationRecord::new("20260102000000", vec![]),
            MigrationRecord::new("20260103000000", vec![]),
        ];
        let applied = HashSet::from(["20260102000000".to_string()]);

        let ids: Vec<_> = pending(&records, &applied)
            .into_iter()
            .map(|r| r.id.as_str())
            .collect();
        assert_eq!(ids, vec!["20260101000000", "20260103000000"]);
    }

    #[tokio::test]
    async fn test_migrate_wraps_each_record_in_a_transaction() {
        let conn = RecordingConn::default();
        let records = vec![
            MigrationRecord::new("20260101000000", vec![drop_table("a")]),
            MigrationRecord::new("20260102000000", vec![drop_table("b")]),
        ];

        let ran = MigrationRunner::new(&conn)
            .history_table("history")
            .migrate(&records)
            .await
            .unwrap();

        assert_eq!(ran, vec!["20260101000000", "20260102000000"]);
        let statements = conn.statements();
        assert!(statements[0].starts_with("CREATE TABLE IF NOT EXISTS \"history\""));
        assert_eq!(statements[1], "SELECT \"id\" FROM \"history\" ORDER BY \"id\"");
        assert_eq!(
            &statements[2..],
            &[
                "BEGIN",
                "DROP TABLE \"a\";",
                "INSERT INTO \"history\" (\"id\", \"version\") VALUES ($1, $2)",
                "COMMIT",
                "BEGIN",
                "DROP TABLE \"b\";",
                "INSERT INTO \"history\" (\"id\", \"version\") VALUES ($1, $2)",
                "COMMIT",
            ]
        );
    }

    #[tokio::test]
    async fn test_migrate_rolls_back_failed_record() {
        let conn = RecordingConn::default();
        let records = vec![
            MigrationRecord::new("20260101000000", vec![drop_table("a")]),
            MigrationRecord::new(
                "20260102000000",
                vec![
                    drop_table("b"),
                    Operation::AddColumn {
                        table: "c".to_string(),
                        column: "x".to_string(),
                        attributes: ColumnAttributes::new("not_a_type"),
                    },
                ],
            ),
            MigrationRecord::new("20260103000000", vec![drop_table("d")]),
        ];

        let err = MigrationRunner::new(&conn)
            .migrate(&records)
            .await
            .unwrap_err();

        let Error::Execution { migration, source } = err else {
            panic!("expected execution error, got {err:?}");
        };
        assert_eq!(migration, "20260102000000");
        assert!(matches!(
            source,
            crate::ExecutionError::UnsupportedType { .. }
        ));

        let statements = conn.statements();
        let tail: Vec<&str> = statements[2..].iter().map(|s| s.as_str()).collect();
        assert_eq!(
            tail,
            vec![
                "BEGIN",
                "DROP TABLE \"a\";",
                "INSERT INTO \"__drift_migrations\" (\"id\", \"version\") VALUES ($1, $2)",
                "COMMIT",
                "BEGIN",
                "DROP TABLE \"b\";",
                "ROLLBACK",
            ]
        );
    }

    #[tokio::test]
    async fn test_status_reports_every_record() {
        let conn = RecordingConn::default();
        let records = vec![MigrationRecord::new("20260101000000", vec![])];

        let status = MigrationRunner::new(&conn).status(&records).await.unwrap();

        assert_eq!(
            status,
            vec![MigrationStatus {
                id: "20260101000000".to_string(),
                applied: false,
            }]
        );
    }

    #[tokio::test]
    async fn test_migrate_reports_failed_history_insert() {
        let conn = RecordingConn::failing_on("INSERT INTO");
        let records = vec![
            MigrationRecord::new("20260101000000", vec![drop_table("a")]),
            MigrationRecord::new("20260102000000", vec![drop_table("b")]),
        ];

        let err = MigrationRunner::new(&conn)
            .migrate(&records)
            .await
            .unwrap_err();

        let Error::Transaction {
            migration, step, ..
        } = &err
        else {
            panic!("expected transaction error, got {err:?}");
        };
        assert_eq!(migration, "20260101000000");
        assert_eq!(*step, "history insert");
        assert!(err.to_string().contains("20260101000000"));

        let statements = conn.statements();
        assert_eq!(statements.last().map(|s| s.as_str()), Some("ROLLBACK"));
        assert!(!statements.iter().any(|s| s == "DROP TABLE \"b\";"));
    }

    #[tokio::test]
    async fn test_migrate_reports_failed_commit() {
        let conn = RecordingConn::failing_on("COMMIT");
        let records = vec![MigrationRecord::new("20260101000000", vec![drop_table("a")])];

        let err = MigrationRunner::new(&conn)
            .migrate(&records)
            .await
            .unwrap_err();

        let Error::Transaction {
            migration, step, ..
        } = &err
        else {
            panic!("expected transaction error, got {err:?}");
        };
        assert_eq!(migration, "20260101000000");
        assert_eq!(*step, "COMMIT");
        assert!(err.to_string().starts_with("migration 20260101000000 failed at COMMIT"));
        assert_eq!(conn.statements().last().map(|s| s.as_str()), Some("COMMIT"));
    }
}
