//! Applying operations to a database.

use crate::{Connection, ConnectionExt, ExecutionError, Operation, ddl};
use std::future::Future;

/// Applies one operation at a time against a connection.
///
/// Callers drive the order (normally the reconciled plan) and own the
/// transaction; a dispatcher never commits or rolls back.
pub trait Dispatcher {
    fn execute<'a, C: Connection + ?Sized>(
        &'a self,
        conn: &'a C,
        op: &'a Operation,
    ) -> impl Future<Output = Result<(), ExecutionError>> + Send + 'a;

    /// Called once after every operation of a batch has been executed.
    fn finish<'a, C: Connection + ?Sized>(
        &'a self,
        conn: &'a C,
        operations: &'a [Operation],
    ) -> impl Future<Output = Result<(), ExecutionError>> + Send + 'a {
        let _ = (conn, operations);
        async { Ok(()) }
    }
}

async fn run_statements<C: Connection + ?Sized>(
    conn: &C,
    op: &Operation,
    statements: Vec<String>,
) -> Result<(), ExecutionError> {
    for sql in statements {
        if let Err(source) = conn.traced().batch_execute(&sql).await {
            return Err(ExecutionError::Statement {
                operation: op.to_string(),
                sql,
                source,
            });
        }
    }
    Ok(())
}

/// Runs operations as PostgreSQL DDL, see [`ddl::statements`].
///
/// Foreign keys from a newly created table to another table are added in
/// [`Dispatcher::finish`], once every table of the batch exists.
#[derive(Debug, Default, Clone, Copy)]
pub struct PostgresDispatcher;

impl Dispatcher for PostgresDispatcher {
    fn execute<'a, C: Connection + ?Sized>(
        &'a self,
        conn: &'a C,
        op: &'a Operation,
    ) -> impl Future<Output = Result<(), ExecutionError>> + Send + 'a {
        async move { run_statements(conn, op, ddl::statements(op)?).await }
    }

    fn finish<'a, C: Connection + ?Sized>(
        &'a self,
        conn: &'a C,
        operations: &'a [Operation],
    ) -> impl Future<Output = Result<(), ExecutionError>> + Send + 'a {
        async move {
            for op in operations {
                run_statements(conn, op, ddl::deferred_statements(op)).await?;
            }
            Ok(())
        }
    }
}

/// Execute `operations` in order, stopping at the first failure.
pub async fn apply_operations<D, C>(
    dispatcher: &D,
    conn: &C,
    operations: &[Operation],
) -> Result<(), ExecutionError>
where
    D: Dispatcher,
    C: Connection + ?Sized,
{
    for op in operations {
        tracing::debug!(kind = %op.kind(), table = op.target_table(), "applying operation");
        dispatcher.execute(conn, op).await?;
    }
    dispatcher.finish(conn, operations).await
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use drift_schema::{
        ColumnAttributes, ForeignKeyConstraint, PrimaryKeyConstraint, SchemaSnapshot, Table,
    };
    use indexmap::IndexMap;
    use std::pin::Pin;
    use std::sync::Mutex;
    use tokio_postgres::Row;
    use tokio_postgres::types::ToSql;

    type BoxFuture<'a, T> =
        Pin<Box<dyn Future<Output = Result<T, tokio_postgres::Error>> + Send + 'a>>;

    /// Connection that records every statement and returns no rows.
    ///
    /// Statements starting with `fail_on` are recorded and then fail.
    #[derive(Default)]
    pub(crate) struct RecordingConn {
        pub(crate) statements: Mutex<Vec<String>>,
        fail_on: Option<String>,
    }

    impl RecordingConn {
        pub(crate) fn failing_on(prefix: &str) -> Self {
            RecordingConn {
                fail_on: Some(prefix.to_string()),
                ..Default::default()
            }
        }

        pub(crate) fn statements(&self) -> Vec<String> {
            self.statements.lock().unwrap().clone()
        }

        fn record(&self, sql: &str) -> Result<(), tokio_postgres::Error> {
            self.statements.lock().unwrap().push(sql.to_string());
            match &self.fail_on {
                Some(prefix) if sql.starts_with(prefix.as_str()) => Err(connection_error()),
                _ => Ok(()),
            }
        }
    }

    /// A real driver error, without a server to produce one.
    pub(crate) fn connection_error() -> tokio_postgres::Error {
        "port=not_a_port"
            .parse::<tokio_postgres::Config>()
            .unwrap_err()
    }

    impl Connection for RecordingConn {
        fn execute<'a>(
            &'a self,
            sql: &'a str,
            _params: &'a [&'a (dyn ToSql + Sync)],
        ) -> BoxFuture<'a, u64> {
            let result = self.record(sql).map(|()| 1);
            Box::pin(async move { result })
        }

        fn batch_execute<'a>(&'a self, sql: &'a str) -> BoxFuture<'a, ()> {
            let result = self.record(sql);
            Box::pin(async move { result })
        }

        fn query<'a>(
            &'a self,
            sql: &'a str,
            _params: &'a [&'a (dyn ToSql + Sync)],
        ) -> BoxFuture<'a, Vec<Row>> {
            let result = self.record(sql).map(|()| Vec::new());
            Box::pin(async move { result })
        }
    }

    #[tokio::test]
    async fn test_dispatch_runs_statements_in_order() {
        let conn = RecordingConn::default();
        let ops = vec![
            Operation::CreateTableWithConstraints {
                name: "author".to_string(),
                columns: IndexMap::from([(
                    "id".to_string(),
                    ColumnAttributes::new("bigint").not_null().primary_key(),
                )]),
                primary_key: Some(PrimaryKeyConstraint::new("author", "author_pkey", &["id"])),
                unique: vec![],
                foreign_keys: vec![],
            },
            Operation::AlterColumn {
                table: "post".to_string(),
                column: "title".to_string(),
                before: ColumnAttributes::new("varchar(80)"),
                after: ColumnAttributes::new("text").not_null(),
            },
            Operation::CreateForeignKeyConstraint {
                constraint: ForeignKeyConstraint::new(
                    "post",
                    "post_author_fkey",
                    &["author_id"],
                    "author",
                    &["id"],
                ),
            },
        ];

        apply_operations(&PostgresDispatcher, &conn, &ops)
            .await
            .unwrap();

        let statements = conn.statements();
        assert_eq!(statements.len(), 4);
        assert!(statements[0].starts_with("CREATE TABLE \"author\""));
        assert!(statements[1].contains("TYPE text USING \"title\"::text"));
        assert!(statements[2].ends_with("SET NOT NULL;"));
        assert!(statements[3].starts_with("ALTER TABLE \"post\" ADD CONSTRAINT \"post_author_fkey\""));
    }

    #[tokio::test]
    async fn test_dispatch_stops_at_unsupported_type() {
        let conn = RecordingConn::default();
        let ops = vec![
            Operation::DropTable {
                name: "legacy".to_string(),
            },
            Operation::AddColumn {
                table: "users".to_string(),
                column: "shape".to_string(),
                attributes: ColumnAttributes::new("hexagon"),
            },
            Operation::DropTable {
                name: "never_reached".to_string(),
            },
        ];

        let err = apply_operations(&PostgresDispatcher, &conn, &ops)
            .await
            .unwrap_err();

        assert!(matches!(err, ExecutionError::UnsupportedType { .. }));
        assert_eq!(conn.statements(), vec!["DROP TABLE \"legacy\";".to_string()]);
    }

    #[tokio::test]
    async fn test_dispatch_adds_cross_table_foreign_keys_after_all_tables() {
        let conn = RecordingConn::default();
        let ideal = SchemaSnapshot::new()
            .with_table(
                Table::new("comments")
                    .column("id", ColumnAttributes::new("bigint").not_null())
                    .column("post_id", ColumnAttributes::new("bigint")),
            )
            .with_foreign_key(ForeignKeyConstraint::new(
                "comments",
                "comments_post_fkey",
                &["post_id"],
                "posts",
                &["id"],
            ))
            .with_table(Table::new("posts").column("id", ColumnAttributes::new("bigint")))
            .with_primary_key(PrimaryKeyConstraint::new("posts", "posts_pkey", &["id"]));
        let ops = crate::plan(&SchemaSnapshot::new(), &ideal).unwrap();

        apply_operations(&PostgresDispatcher, &conn, &ops)
            .await
            .unwrap();

        let statements = conn.statements();
        assert_eq!(statements.len(), 3);
        assert!(statements[0].starts_with("CREATE TABLE \"comments\""));
        assert!(!statements[0].contains("FOREIGN KEY"));
        assert!(statements[1].starts_with("CREATE TABLE \"posts\""));
        assert_eq!(
            statements[2],
            "ALTER TABLE \"comments\" ADD CONSTRAINT \"comments_post_fkey\" \
             FOREIGN KEY (\"post_id\") REFERENCES \"posts\" (\"id\") DEFERRABLE INITIALLY DEFERRED;"
        );
    }

    #[tokio::test]
    async fn test_dispatch_reports_failing_statement() {
        let conn = RecordingConn::failing_on("DROP TABLE \"locked\"");
        let ops = vec![
            Operation::DropTable {
                name: "locked".to_string(),
            },
            Operation::DropTable {
                name: "never_reached".to_string(),
            },
        ];

        let err = apply_operations(&PostgresDispatcher, &conn, &ops)
            .await
            .unwrap_err();

        match err {
            ExecutionError::Statement { operation, sql, .. } => {
                assert_eq!(operation, "- table locked");
                assert_eq!(sql, "DROP TABLE \"locked\";");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(conn.statements().len(), 1);
    }
}
