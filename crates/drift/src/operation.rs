//! Schema change operations.
//!
//! An [`Operation`] is one atomic, typed schema mutation. The set is closed:
//! every consumer (diff, reconciler, dispatcher, renderer) matches
//! exhaustively, so adding a variant is a compile-time-checked change.
//!
//! Operations never point at each other. Dependencies between them are
//! recovered structurally from their `table` and `name` fields.

use drift_schema::{
    ColumnAttributes, ForeignKeyConstraint, Index, PrimaryKeyConstraint, UniqueConstraint,
};
use facet::Facet;
use indexmap::IndexMap;
use std::fmt;

/// A single schema change.
#[derive(Facet, Debug, Clone, PartialEq, Eq)]
#[facet(rename_all = "snake_case")]
#[repr(u8)]
pub enum Operation {
    /// Create a table with its columns and no constraints.
    CreateTable {
        name: String,
        columns: IndexMap<String, ColumnAttributes>,
    },
    /// Drop a table (and, implicitly, everything attached to it).
    DropTable { name: String },
    AddColumn {
        table: String,
        column: String,
        attributes: ColumnAttributes,
    },
    /// Drop a column. The removed attributes are kept for reporting.
    DropColumn {
        table: String,
        column: String,
        attributes: ColumnAttributes,
    },
    /// Change a column. Both snapshots are carried; the dispatcher decides
    /// which attributes need DDL.
    AlterColumn {
        table: String,
        column: String,
        before: ColumnAttributes,
        after: ColumnAttributes,
    },
    CreateIndex { index: Index },
    DropIndex { table: String, name: String },
    CreatePrimaryKeyConstraint { constraint: PrimaryKeyConstraint },
    DropPrimaryKeyConstraint { table: String, name: String },
    CreateUniqueConstraint { constraint: UniqueConstraint },
    DropUniqueConstraint { table: String, name: String },
    CreateForeignKeyConstraint { constraint: ForeignKeyConstraint },
    DropForeignKeyConstraint { table: String, name: String },
    /// A `create_table` with its constraints folded in. Foreign keys are
    /// deferrable; those referencing another table are added after the
    /// batch's tables exist.
    CreateTableWithConstraints {
        name: String,
        columns: IndexMap<String, ColumnAttributes>,
        primary_key: Option<PrimaryKeyConstraint>,
        unique: Vec<UniqueConstraint>,
        foreign_keys: Vec<ForeignKeyConstraint>,
    },
}

/// The kind of an [`Operation`], without its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum OperationKind {
    CreateTable,
    DropTable,
    AddColumn,
    DropColumn,
    AlterColumn,
    CreateIndex,
    DropIndex,
    CreatePrimaryKeyConstraint,
    DropPrimaryKeyConstraint,
    CreateUniqueConstraint,
    DropUniqueConstraint,
    CreateForeignKeyConstraint,
    DropForeignKeyConstraint,
    CreateTableWithConstraints,
}

impl OperationKind {
    /// Execution priority; lower runs first.
    ///
    /// Drops come before creates, and within each half constraints are
    /// peeled off before the objects they depend on.
    pub fn priority(self) -> u8 {
        match self {
            OperationKind::DropForeignKeyConstraint => 0,
            OperationKind::DropUniqueConstraint => 1,
            OperationKind::DropPrimaryKeyConstraint => 2,
            OperationKind::DropIndex => 3,
            OperationKind::DropColumn => 4,
            OperationKind::DropTable => 5,
            OperationKind::CreateTableWithConstraints => 6,
            OperationKind::CreateTable => 7,
            OperationKind::AddColumn => 8,
            OperationKind::AlterColumn => 9,
            OperationKind::CreateIndex => 10,
            OperationKind::CreatePrimaryKeyConstraint => 11,
            OperationKind::CreateUniqueConstraint => 12,
            OperationKind::CreateForeignKeyConstraint => 13,
        }
    }

    /// Whether this kind removes something from the schema.
    pub fn is_drop(self) -> bool {
        self.priority() <= OperationKind::DropTable.priority()
    }

    /// The snake_case tag used in persisted plans.
    pub fn as_str(self) -> &'static str {
        match self {
            OperationKind::CreateTable => "create_table",
            OperationKind::DropTable => "drop_table",
            OperationKind::AddColumn => "add_column",
            OperationKind::DropColumn => "drop_column",
            OperationKind::AlterColumn => "alter_column",
            OperationKind::CreateIndex => "create_index",
            OperationKind::DropIndex => "drop_index",
            OperationKind::CreatePrimaryKeyConstraint => "create_primary_key_constraint",
            OperationKind::DropPrimaryKeyConstraint => "drop_primary_key_constraint",
            OperationKind::CreateUniqueConstraint => "create_unique_constraint",
            OperationKind::DropUniqueConstraint => "drop_unique_constraint",
            OperationKind::CreateForeignKeyConstraint => "create_foreign_key_constraint",
            OperationKind::DropForeignKeyConstraint => "drop_foreign_key_constraint",
            OperationKind::CreateTableWithConstraints => "create_table_with_constraints",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Operation {
    pub fn kind(&self) -> OperationKind {
        match self {
            Operation::CreateTable { .. } => OperationKind::CreateTable,
            Operation::DropTable { .. } => OperationKind::DropTable,
            Operation::AddColumn { .. } => OperationKind::AddColumn,
            Operation::DropColumn { .. } => OperationKind::DropColumn,
            Operation::AlterColumn { .. } => OperationKind::AlterColumn,
            Operation::CreateIndex { .. } => OperationKind::CreateIndex,
            Operation::DropIndex { .. } => OperationKind::DropIndex,
            Operation::CreatePrimaryKeyConstraint { .. } => {
                OperationKind::CreatePrimaryKeyConstraint
            }
            Operation::DropPrimaryKeyConstraint { .. } => OperationKind::DropPrimaryKeyConstraint,
            Operation::CreateUniqueConstraint { .. } => OperationKind::CreateUniqueConstraint,
            Operation::DropUniqueConstraint { .. } => OperationKind::DropUniqueConstraint,
            Operation::CreateForeignKeyConstraint { .. } => {
                OperationKind::CreateForeignKeyConstraint
            }
            Operation::DropForeignKeyConstraint { .. } => OperationKind::DropForeignKeyConstraint,
            Operation::CreateTableWithConstraints { .. } => {
                OperationKind::CreateTableWithConstraints
            }
        }
    }

    pub fn priority(&self) -> u8 {
        self.kind().priority()
    }

    /// The `table` field of table-scoped operations.
    ///
    /// `None` for `create_table`, `create_table_with_constraints` and
    /// `drop_table`, which name their table instead of belonging to one.
    pub fn table(&self) -> Option<&str> {
        match self {
            Operation::CreateTable { .. }
            | Operation::DropTable { .. }
            | Operation::CreateTableWithConstraints { .. } => None,
            Operation::AddColumn { table, .. }
            | Operation::DropColumn { table, .. }
            | Operation::AlterColumn { table, .. }
            | Operation::DropIndex { table, .. }
            | Operation::DropPrimaryKeyConstraint { table, .. }
            | Operation::DropUniqueConstraint { table, .. }
            | Operation::DropForeignKeyConstraint { table, .. } => Some(table),
            Operation::CreateIndex { index } => Some(&index.table),
            Operation::CreatePrimaryKeyConstraint { constraint } => Some(&constraint.table),
            Operation::CreateUniqueConstraint { constraint } => Some(&constraint.table),
            Operation::CreateForeignKeyConstraint { constraint } => Some(&constraint.table),
        }
    }

    /// The table this operation concerns, whichever field names it.
    pub fn target_table(&self) -> &str {
        match self {
            Operation::CreateTable { name, .. }
            | Operation::DropTable { name }
            | Operation::CreateTableWithConstraints { name, .. } => name,
            other => other.table().unwrap_or_default(),
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::CreateTable { name, columns } => {
                write!(f, "+ table {} ({})", name, column_list(columns))
            }
            Operation::DropTable { name } => write!(f, "- table {}", name),
            Operation::AddColumn {
                table,
                column,
                attributes,
            } => write!(f, "+ {}.{}: {}", table, column, attributes),
            Operation::DropColumn {
                table,
                column,
                attributes,
            } => write!(f, "- {}.{}: {}", table, column, attributes),
            Operation::AlterColumn {
                table,
                column,
                before,
                after,
            } => write!(f, "~ {}.{}: {{{}}} -> {{{}}}", table, column, before, after),
            Operation::CreateIndex { index } => {
                let unique = if index.unique { "UNIQUE " } else { "" };
                write!(
                    f,
                    "+ {}INDEX {} ON {} ({})",
                    unique,
                    index.name,
                    index.table,
                    index.columns.join(", ")
                )
            }
            Operation::DropIndex { table, name } => write!(f, "- INDEX {} ON {}", name, table),
            Operation::CreatePrimaryKeyConstraint { constraint } => write!(
                f,
                "+ PRIMARY KEY {} ON {} ({})",
                constraint.name,
                constraint.table,
                constraint.columns.join(", ")
            ),
            Operation::DropPrimaryKeyConstraint { table, name } => {
                write!(f, "- PRIMARY KEY {} ON {}", name, table)
            }
            Operation::CreateUniqueConstraint { constraint } => write!(
                f,
                "+ UNIQUE {} ON {} ({})",
                constraint.name,
                constraint.table,
                constraint.columns.join(", ")
            ),
            Operation::DropUniqueConstraint { table, name } => {
                write!(f, "- UNIQUE {} ON {}", name, table)
            }
            Operation::CreateForeignKeyConstraint { constraint } => {
                write!(f, "+ ")?;
                write_foreign_key(f, constraint)
            }
            Operation::DropForeignKeyConstraint { table, name } => {
                write!(f, "- FOREIGN KEY {} ON {}", name, table)
            }
            Operation::CreateTableWithConstraints {
                name,
                columns,
                primary_key,
                unique,
                foreign_keys,
            } => {
                write!(f, "+ table {} ({})", name, column_list(columns))?;
                if let Some(pk) = primary_key {
                    write!(f, " PRIMARY KEY {} ({})", pk.name, pk.columns.join(", "))?;
                }
                for uq in unique {
                    write!(f, " UNIQUE {} ({})", uq.name, uq.columns.join(", "))?;
                }
                for fk in foreign_keys {
                    write!(f, " ")?;
                    write_foreign_key(f, fk)?;
                }
                Ok(())
            }
        }
    }
}

fn column_list(columns: &IndexMap<String, ColumnAttributes>) -> String {
    columns
        .iter()
        .map(|(name, attrs)| format!("{}: {}", name, attrs))
        .collect::<Vec<_>>()
        .join(", ")
}

fn write_foreign_key(f: &mut fmt::Formatter<'_>, fk: &ForeignKeyConstraint) -> fmt::Result {
    write!(
        f,
        "FOREIGN KEY {} ON {} ({}) -> {}.({})",
        fk.name,
        fk.table,
        fk.columns.join(", "),
        fk.referenced_table,
        fk.referenced_columns.join(", ")
    )?;
    if let Some(action) = fk.on_delete {
        write!(f, " ON DELETE {}", action)?;
    }
    if let Some(action) = fk.on_update {
        write!(f, " ON UPDATE {}", action)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priorities_split_drops_from_creates() {
        let kinds = [
            OperationKind::CreateTable,
            OperationKind::DropTable,
            OperationKind::AddColumn,
            OperationKind::DropColumn,
            OperationKind::AlterColumn,
            OperationKind::CreateIndex,
            OperationKind::DropIndex,
            OperationKind::CreatePrimaryKeyConstraint,
            OperationKind::DropPrimaryKeyConstraint,
            OperationKind::CreateUniqueConstraint,
            OperationKind::DropUniqueConstraint,
            OperationKind::CreateForeignKeyConstraint,
            OperationKind::DropForeignKeyConstraint,
            OperationKind::CreateTableWithConstraints,
        ];

        let mut priorities: Vec<u8> = kinds.iter().map(|k| k.priority()).collect();
        priorities.sort();
        assert_eq!(priorities, (0..14).collect::<Vec<u8>>());

        for kind in kinds {
            let is_drop_name = kind.as_str().starts_with("drop_");
            assert_eq!(kind.is_drop(), is_drop_name, "{}", kind);
        }
    }

    #[test]
    fn test_table_accessors() {
        let create = Operation::CreateTable {
            name: "users".to_string(),
            columns: IndexMap::new(),
        };
        assert_eq!(create.table(), None);
        assert_eq!(create.target_table(), "users");

        let drop_index = Operation::DropIndex {
            table: "users".to_string(),
            name: "idx_users_email".to_string(),
        };
        assert_eq!(drop_index.table(), Some("users"));
        assert_eq!(drop_index.target_table(), "users");

        let create_index = Operation::CreateIndex {
            index: Index::new("posts", "idx_posts_author", &["author_id"]),
        };
        assert_eq!(create_index.table(), Some("posts"));
    }

    #[test]
    fn test_display_alter_shows_before_and_after() {
        let op = Operation::AlterColumn {
            table: "users".to_string(),
            column: "name".to_string(),
            before: ColumnAttributes::new("varchar"),
            after: ColumnAttributes::new("text").not_null(),
        };
        assert_eq!(op.to_string(), "~ users.name: {varchar} -> {text not null}");
    }
}
