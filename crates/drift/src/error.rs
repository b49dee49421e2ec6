use camino::Utf8PathBuf;
use drift_schema::SnapshotError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid snapshot: {0}")]
    Snapshot(#[from] SnapshotError),

    #[error(
        "foreign key {constraint} on table {table} references missing column(s): {}",
        columns.join(", ")
    )]
    MissingForeignKeyColumns {
        table: String,
        constraint: String,
        columns: Vec<String>,
    },

    #[error("migration {migration} failed: {source}")]
    Execution {
        migration: String,
        #[source]
        source: ExecutionError,
    },

    /// The migration's own statements succeeded but its transaction did not:
    /// `step` is `BEGIN`, the history insert, or `COMMIT`.
    #[error("migration {migration} failed at {step}: {source}")]
    Transaction {
        migration: String,
        step: &'static str,
        #[source]
        source: tokio_postgres::Error,
    },

    #[error("postgres error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    #[error("invalid migration record {path}: {message}")]
    Record { path: Utf8PathBuf, message: String },

    #[error("migration id {id} does not come after {previous}")]
    NonMonotonicId { previous: String, id: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure to apply a single operation.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("unsupported type {sql_type:?} for column {table}.{column}")]
    UnsupportedType {
        table: String,
        column: String,
        sql_type: String,
    },

    #[error("{operation}: {source}\n  sql: {sql}")]
    Statement {
        operation: String,
        sql: String,
        #[source]
        source: tokio_postgres::Error,
    },
}
