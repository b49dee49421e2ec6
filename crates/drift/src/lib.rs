//! Declarative Postgres schema migrations.
//!
//! drift compares two [`SchemaSnapshot`]s, the schema a database has now and
//! the schema it should have, and turns the difference into an ordered list of
//! typed [`Operation`]s that can be applied inside a single transaction.
//!
//! The pipeline has three stages:
//!
//! - [`diff_schema`] produces raw operations, five passes in a fixed order
//! - [`reconcile`] prunes, consolidates and sorts them into a plan
//! - a [`Dispatcher`] executes the plan, one operation at a time
//!
//! ```ignore
//! let plan = drift::plan(&current, &ideal)?;
//! let tx = client.transaction().await?;
//! drift::apply_operations(&PostgresDispatcher, &tx, &plan).await?;
//! tx.commit().await?;
//! ```
//!
//! # Migrations
//!
//! A plan can be frozen into a [`MigrationRecord`] and written to a
//! [`MigrationDir`]. The [`MigrationRunner`] applies pending records in id
//! order and tracks them in a history table.
//!
//! # Naming
//!
//! Identifiers are always double-quoted in generated SQL, so names are used
//! exactly as they appear in the snapshots.

mod connection;
pub mod ddl;
pub mod diff;
mod dispatch;
mod error;
mod operation;
pub mod reconcile;
mod record;
mod render;
mod runner;

pub use connection::{Connection, ConnectionExt, TracedConn};
pub use diff::{KeyedDiff, diff_keyed, diff_schema};
pub use dispatch::{Dispatcher, PostgresDispatcher, apply_operations};
pub use error::{Error, ExecutionError};
pub use operation::{Operation, OperationKind};
pub use reconcile::{plan, reconcile};
pub use record::{
    MigrationDir, MigrationRecord, RECORD_VERSION, RecordedDiff, check_monotonic, next_id, slugify,
    timestamp_id,
};
pub use render::{render_plan, summarize};
pub use runner::{DEFAULT_HISTORY_TABLE, MigrationRunner, MigrationStatus, pending};

// Re-export the snapshot model for convenience
pub use drift_schema::*;

/// Result type for drift operations.
pub type Result<T> = std::result::Result<T, Error>;
