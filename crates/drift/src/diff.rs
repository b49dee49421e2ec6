//! Schema diffing - compare a current snapshot against an ideal one.
//!
//! [`diff_schema`] runs five independent passes, always in the same order:
//!
//! 1. tables and columns
//! 2. indexes
//! 3. primary keys
//! 4. unique constraints
//! 5. foreign keys
//!
//! The pass order only fixes the *initial* order of the operations; the
//! [reconciler](crate::reconcile) re-sorts them into an executable plan.
//!
//! ## Identity
//!
//! Tables are matched by name, indexes and primary/unique constraints by
//! `(table, name)`. Foreign keys are matched by **name alone**, so two tables
//! declaring a foreign key with the same name are treated as one constraint.
//!
//! ## What counts as a change
//!
//! - Columns compare `type`, `not_null`, `primary_key` and `unique`. A change
//!   to `default_sql` alone is never reported.
//! - Indexes compare their ordered column list and `unique` flag.
//! - Constraints never alter in place: a changed definition is a drop
//!   immediately followed by a create under the same key.

use crate::Operation;
use drift_schema::{SchemaSnapshot, Table};
use indexmap::IndexMap;
use std::hash::Hash;

/// The result of matching two keyed collections.
#[derive(Debug)]
pub struct KeyedDiff<'a, T> {
    /// Present only in the ideal side, in ideal order.
    pub added: Vec<&'a T>,
    /// Present only in the current side, in current order.
    pub removed: Vec<&'a T>,
    /// Present on both sides but different, as `(current, ideal)`.
    pub changed: Vec<(&'a T, &'a T)>,
}

impl<T> KeyedDiff<'_, T> {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.changed.is_empty()
    }
}

/// Match `current` against `ideal` by `key`, using `same` to decide whether
/// two items under the same key differ.
///
/// If a side holds several items under one key, the last one wins.
pub fn diff_keyed<'a, T, K>(
    current: impl IntoIterator<Item = &'a T>,
    ideal: impl IntoIterator<Item = &'a T>,
    key: impl Fn(&'a T) -> K,
    same: impl Fn(&T, &T) -> bool,
) -> KeyedDiff<'a, T>
where
    T: 'a,
    K: Eq + Hash,
{
    let current: IndexMap<K, &'a T> = current.into_iter().map(|item| (key(item), item)).collect();
    let ideal: IndexMap<K, &'a T> = ideal.into_iter().map(|item| (key(item), item)).collect();

    let mut diff = KeyedDiff {
        added: Vec::new(),
        removed: Vec::new(),
        changed: Vec::new(),
    };

    for (k, ideal_item) in &ideal {
        match current.get(k) {
            None => diff.added.push(*ideal_item),
            Some(current_item) if !same(current_item, ideal_item) => {
                diff.changed.push((*current_item, *ideal_item))
            }
            Some(_) => {}
        }
    }

    for (k, current_item) in &current {
        if !ideal.contains_key(k) {
            diff.removed.push(*current_item);
        }
    }

    diff
}

/// Compute the operations that turn `current` into `ideal`.
pub fn diff_schema(current: &SchemaSnapshot, ideal: &SchemaSnapshot) -> Vec<Operation> {
    let mut operations = diff_tables(current, ideal);
    operations.extend(diff_indexes(current, ideal));
    operations.extend(diff_primary_keys(current, ideal));
    operations.extend(diff_unique_constraints(current, ideal));
    operations.extend(diff_foreign_keys(current, ideal));

    tracing::debug!(operations = operations.len(), "computed schema diff");
    operations
}

/// Tables and their columns.
///
/// Emits every `create_table`, then every `drop_table`, then the column
/// changes of each table present on both sides (adds, drops, alters).
pub fn diff_tables(current: &SchemaSnapshot, ideal: &SchemaSnapshot) -> Vec<Operation> {
    let diff = diff_keyed(
        current.tables.values(),
        ideal.tables.values(),
        |t| t.name.as_str(),
        |a, b| columns_match(a, b),
    );

    let mut operations = Vec::new();

    for table in diff.added {
        operations.push(Operation::CreateTable {
            name: table.name.clone(),
            columns: table.columns.clone(),
        });
    }

    for table in diff.removed {
        operations.push(Operation::DropTable {
            name: table.name.clone(),
        });
    }

    for (current_table, ideal_table) in diff.changed {
        operations.extend(diff_columns(current_table, ideal_table));
    }

    operations
}

fn columns_match(a: &Table, b: &Table) -> bool {
    a.columns.len() == b.columns.len()
        && a.columns.iter().all(|(name, attrs)| {
            b.columns
                .get(name)
                .is_some_and(|other| attrs.same_shape(other))
        })
}

/// Column changes between two versions of the same table.
fn diff_columns(current: &Table, ideal: &Table) -> Vec<Operation> {
    let table = &ideal.name;
    let mut operations = Vec::new();

    for (name, attrs) in &ideal.columns {
        if !current.columns.contains_key(name) {
            operations.push(Operation::AddColumn {
                table: table.clone(),
                column: name.clone(),
                attributes: attrs.clone(),
            });
        }
    }

    for (name, attrs) in &current.columns {
        if !ideal.columns.contains_key(name) {
            operations.push(Operation::DropColumn {
                table: table.clone(),
                column: name.clone(),
                attributes: attrs.clone(),
            });
        }
    }

    for (name, after) in &ideal.columns {
        if let Some(before) = current.columns.get(name)
            && !before.same_shape(after)
        {
            operations.push(Operation::AlterColumn {
                table: table.clone(),
                column: name.clone(),
                before: before.clone(),
                after: after.clone(),
            });
        }
    }

    operations
}

/// Secondary indexes, keyed by `(table, name)`.
pub fn diff_indexes(current: &SchemaSnapshot, ideal: &SchemaSnapshot) -> Vec<Operation> {
    let diff = diff_keyed(
        &current.indexes,
        &ideal.indexes,
        |idx| idx.key(),
        |a, b| a.columns == b.columns && a.unique == b.unique,
    );

    let mut operations = Vec::new();
    for idx in diff.added {
        operations.push(Operation::CreateIndex { index: idx.clone() });
    }
    for idx in diff.removed {
        operations.push(Operation::DropIndex {
            table: idx.table.clone(),
            name: idx.name.clone(),
        });
    }
    for (old, new) in diff.changed {
        operations.push(Operation::DropIndex {
            table: old.table.clone(),
            name: old.name.clone(),
        });
        operations.push(Operation::CreateIndex { index: new.clone() });
    }
    operations
}

/// Primary key constraints, keyed by `(table, name)`.
pub fn diff_primary_keys(current: &SchemaSnapshot, ideal: &SchemaSnapshot) -> Vec<Operation> {
    let diff = diff_keyed(
        &current.primary_key_constraints,
        &ideal.primary_key_constraints,
        |pk| pk.key(),
        |a, b| a.columns == b.columns,
    );

    let mut operations = Vec::new();
    for pk in diff.added {
        operations.push(Operation::CreatePrimaryKeyConstraint {
            constraint: pk.clone(),
        });
    }
    for pk in diff.removed {
        operations.push(Operation::DropPrimaryKeyConstraint {
            table: pk.table.clone(),
            name: pk.name.clone(),
        });
    }
    for (old, new) in diff.changed {
        operations.push(Operation::DropPrimaryKeyConstraint {
            table: old.table.clone(),
            name: old.name.clone(),
        });
        operations.push(Operation::CreatePrimaryKeyConstraint {
            constraint: new.clone(),
        });
    }
    operations
}

/// Unique constraints, keyed by `(table, name)`.
pub fn diff_unique_constraints(
    current: &SchemaSnapshot,
    ideal: &SchemaSnapshot,
) -> Vec<Operation> {
    let diff = diff_keyed(
        &current.unique_constraints,
        &ideal.unique_constraints,
        |uq| uq.key(),
        |a, b| a.columns == b.columns,
    );

    let mut operations = Vec::new();
    for uq in diff.added {
        operations.push(Operation::CreateUniqueConstraint {
            constraint: uq.clone(),
        });
    }
    for uq in diff.removed {
        operations.push(Operation::DropUniqueConstraint {
            table: uq.table.clone(),
            name: uq.name.clone(),
        });
    }
    for (old, new) in diff.changed {
        operations.push(Operation::DropUniqueConstraint {
            table: old.table.clone(),
            name: old.name.clone(),
        });
        operations.push(Operation::CreateUniqueConstraint {
            constraint: new.clone(),
        });
    }
    operations
}

/// Foreign keys, keyed by name only.
pub fn diff_foreign_keys(current: &SchemaSnapshot, ideal: &SchemaSnapshot) -> Vec<Operation> {
    let diff = diff_keyed(
        &current.foreign_key_constraints,
        &ideal.foreign_key_constraints,
        |fk| fk.name.as_str(),
        |a, b| a.same_definition(b),
    );

    let mut operations = Vec::new();
    for fk in diff.added {
        operations.push(Operation::CreateForeignKeyConstraint {
            constraint: fk.clone(),
        });
    }
    for fk in diff.removed {
        operations.push(Operation::DropForeignKeyConstraint {
            table: fk.table.clone(),
            name: fk.name.clone(),
        });
    }
    for (old, new) in diff.changed {
        // The drop names the table the old constraint lives on, which may
        // differ from the new one when two tables share a constraint name.
        operations.push(Operation::DropForeignKeyConstraint {
            table: old.table.clone(),
            name: old.name.clone(),
        });
        operations.push(Operation::CreateForeignKeyConstraint {
            constraint: new.clone(),
        });
    }
    operations
}
