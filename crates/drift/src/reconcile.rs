//! Reconciler - turns a raw diff into an executable plan.
//!
//! The diff engine emits operations in pass order, with no regard for
//! dependencies. [`reconcile`] runs four pure stages over that list, each
//! building a new list from the previous one:
//!
//! 1. [`prune_dropped_tables`]: anything attached to a dropped table goes away
//!    with it.
//! 2. [`consolidate`]: constraints created alongside their table are folded
//!    into a single `create_table_with_constraints`.
//! 3. [`prune_redundant_index_drops`]: dropping a primary key or unique
//!    constraint already drops its backing index.
//! 4. [`sort_by_priority`]: drops before creates, constraints peeled off
//!    before the objects they depend on.
//!
//! ## Forward references
//!
//! No dependency graph between tables is built. A foreign key folded into a
//! `create_table_with_constraints` is only declared inside `CREATE TABLE`
//! when it references the table itself. PostgreSQL needs the referenced
//! relation to exist when a constraint is declared, so a foreign key to
//! another table is added by `ALTER TABLE` once the whole plan has run (see
//! [`ddl::deferred_statements`](crate::ddl::deferred_statements)). Either way
//! it is `DEFERRABLE INITIALLY DEFERRED`, so row checks wait for commit.
//! Foreign keys marked `inline = false`, or declared on a table that already
//! exists, stay standalone and run last.

use crate::{Error, Operation, Result};
use drift_schema::{
    ColumnAttributes, ForeignKeyConstraint, PrimaryKeyConstraint, SchemaSnapshot, UniqueConstraint,
};
use indexmap::IndexMap;
use std::collections::{HashMap, HashSet};

/// Run the four reconciliation stages in order.
pub fn reconcile(operations: &[Operation]) -> Result<Vec<Operation>> {
    let pruned = prune_dropped_tables(operations);
    let consolidated = consolidate(&pruned)?;
    let without_redundant = prune_redundant_index_drops(&consolidated);
    let sorted = sort_by_priority(&without_redundant);

    tracing::debug!(
        input = operations.len(),
        after_drop_cascade = pruned.len(),
        after_consolidation = consolidated.len(),
        output = sorted.len(),
        "reconciled operations"
    );

    Ok(sorted)
}

/// Diff two snapshots and reconcile the result.
///
/// Both snapshots are [validated](SchemaSnapshot::validate) first.
///
/// # Example
///
/// ```ignore
/// let plan = drift::plan(&current, &ideal)?;
/// for op in &plan {
///     println!("{}", op);
/// }
/// ```
pub fn plan(current: &SchemaSnapshot, ideal: &SchemaSnapshot) -> Result<Vec<Operation>> {
    current.validate()?;
    ideal.validate()?;
    reconcile(&crate::diff_schema(current, ideal))
}

/// Drop every table-scoped operation on a table that is itself dropped in
/// this batch. The `drop_table` operations are kept.
pub fn prune_dropped_tables(operations: &[Operation]) -> Vec<Operation> {
    let dropped: HashSet<&str> = operations
        .iter()
        .filter_map(|op| match op {
            Operation::DropTable { name } => Some(name.as_str()),
            _ => None,
        })
        .collect();

    operations
        .iter()
        .filter(|op| !op.table().is_some_and(|t| dropped.contains(t)))
        .cloned()
        .collect()
}

/// Fold constraint creations into the `create_table` of their table.
///
/// Primary keys and unique constraints are always folded; foreign keys only
/// when [inlinable](ForeignKeyConstraint::is_inlinable). A foreign key whose
/// source columns are missing from the table being created is an error. A
/// `create_table` with nothing to fold passes through unchanged.
///
/// Only the first primary key targeting a table is folded; any further ones
/// stay standalone.
pub fn consolidate(operations: &[Operation]) -> Result<Vec<Operation>> {
    let created: HashMap<&str, &IndexMap<String, ColumnAttributes>> = operations
        .iter()
        .filter_map(|op| match op {
            Operation::CreateTable { name, columns } => Some((name.as_str(), columns)),
            _ => None,
        })
        .collect();

    let mut merged: HashMap<&str, FoldedConstraints> = HashMap::new();
    // Positions of constraint operations that were folded into a table.
    let mut folded: HashSet<usize> = HashSet::new();

    for (i, op) in operations.iter().enumerate() {
        match op {
            Operation::CreatePrimaryKeyConstraint { constraint }
                if created.contains_key(constraint.table.as_str()) =>
            {
                let entry = merged.entry(constraint.table.as_str()).or_default();
                if entry.primary_key.is_none() {
                    entry.primary_key = Some(constraint.clone());
                    folded.insert(i);
                }
            }
            Operation::CreateUniqueConstraint { constraint }
                if created.contains_key(constraint.table.as_str()) =>
            {
                merged
                    .entry(constraint.table.as_str())
                    .or_default()
                    .unique
                    .push(constraint.clone());
                folded.insert(i);
            }
            Operation::CreateForeignKeyConstraint { constraint } if constraint.is_inlinable() => {
                let Some(columns) = created.get(constraint.table.as_str()) else {
                    continue;
                };
                let missing: Vec<String> = constraint
                    .columns
                    .iter()
                    .filter(|c| !columns.contains_key(c.as_str()))
                    .cloned()
                    .collect();
                if !missing.is_empty() {
                    return Err(Error::MissingForeignKeyColumns {
                        table: constraint.table.clone(),
                        constraint: constraint.name.clone(),
                        columns: missing,
                    });
                }
                merged
                    .entry(constraint.table.as_str())
                    .or_default()
                    .foreign_keys
                    .push(constraint.clone());
                folded.insert(i);
            }
            _ => {}
        }
    }

    let mut output = Vec::with_capacity(operations.len() - folded.len());
    for (i, op) in operations.iter().enumerate() {
        if folded.contains(&i) {
            continue;
        }
        match op {
            Operation::CreateTable { name, columns } => match merged.remove(name.as_str()) {
                Some(constraints) => {
                    tracing::trace!(
                        table = %name,
                        primary_key = constraints.primary_key.is_some(),
                        unique = constraints.unique.len(),
                        foreign_keys = constraints.foreign_keys.len(),
                        "folded constraints into table creation"
                    );
                    output.push(Operation::CreateTableWithConstraints {
                        name: name.clone(),
                        columns: columns.clone(),
                        primary_key: constraints.primary_key,
                        unique: constraints.unique,
                        foreign_keys: constraints.foreign_keys,
                    });
                }
                None => output.push(op.clone()),
            },
            _ => output.push(op.clone()),
        }
    }

    Ok(output)
}

#[derive(Default)]
struct FoldedConstraints {
    primary_key: Option<PrimaryKeyConstraint>,
    unique: Vec<UniqueConstraint>,
    foreign_keys: Vec<ForeignKeyConstraint>,
}

/// Remove `drop_index` operations made redundant by a primary key or unique
/// constraint drop with the same `(table, name)`.
pub fn prune_redundant_index_drops(operations: &[Operation]) -> Vec<Operation> {
    let constraint_drops: HashSet<(&str, &str)> = operations
        .iter()
        .filter_map(|op| match op {
            Operation::DropUniqueConstraint { table, name }
            | Operation::DropPrimaryKeyConstraint { table, name } => {
                Some((table.as_str(), name.as_str()))
            }
            _ => None,
        })
        .collect();

    operations
        .iter()
        .filter(|op| match op {
            Operation::DropIndex { table, name } => {
                !constraint_drops.contains(&(table.as_str(), name.as_str()))
            }
            _ => true,
        })
        .cloned()
        .collect()
}

/// Stable sort by kind priority, then by ascending table name.
pub fn sort_by_priority(operations: &[Operation]) -> Vec<Operation> {
    let mut sorted = operations.to_vec();
    sorted.sort_by(|a, b| {
        a.priority()
            .cmp(&b.priority())
            .then_with(|| a.target_table().cmp(b.target_table()))
    });
    sorted
}
