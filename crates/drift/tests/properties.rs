use drift::{
    ColumnAttributes, ForeignKeyConstraint, Index, Operation, OperationKind,
    PrimaryKeyConstraint, SchemaSnapshot, Table, UniqueConstraint, diff_schema, reconcile,
};
use proptest::prelude::*;
use std::collections::BTreeSet;

const TABLES: [&str; 4] = ["account", "post", "tag", "user"];
const COLUMNS: [&str; 4] = ["id", "name", "owner_id", "score"];
const TYPES: [&str; 3] = ["bigint", "text", "integer"];

/// Everything a generated table may carry.
#[derive(Debug, Clone)]
struct TableSpec {
    present: bool,
    columns: [Option<(usize, bool)>; 4],
    index: Option<(bool, bool)>,
    primary_key: bool,
    unique: bool,
    foreign_key: Option<(usize, bool)>,
}

fn table_spec() -> impl Strategy<Value = TableSpec> {
    (
        any::<bool>(),
        prop::array::uniform4(prop::option::of((0..TYPES.len(), any::<bool>()))),
        prop::option::of((any::<bool>(), any::<bool>())),
        any::<bool>(),
        any::<bool>(),
        prop::option::of((0..TABLES.len(), any::<bool>())),
    )
        .prop_map(
            |(present, columns, index, primary_key, unique, foreign_key)| TableSpec {
                present,
                columns,
                index,
                primary_key,
                unique,
                foreign_key,
            },
        )
}

fn snapshot() -> impl Strategy<Value = SchemaSnapshot> {
    prop::array::uniform4(table_spec()).prop_map(|specs| build(&specs))
}

fn build(specs: &[TableSpec; 4]) -> SchemaSnapshot {
    let mut snapshot = SchemaSnapshot::new();

    for (name, spec) in TABLES.iter().zip(specs) {
        if !spec.present {
            continue;
        }

        let mut table = Table::new(*name);
        for (column, attrs) in COLUMNS.iter().zip(&spec.columns) {
            if let Some((ty, not_null)) = attrs {
                let mut attrs = ColumnAttributes::new(TYPES[*ty]);
                attrs.not_null = *not_null;
                table = table.column(*column, attrs);
            }
        }
        let columns: Vec<&str> = table.columns.keys().map(|c| c.as_str()).collect();
        let has_id = table.columns.contains_key("id");

        if let Some((unique, reversed)) = spec.index
            && columns.len() >= 2
        {
            let mut cols = vec![columns[0], columns[1]];
            if reversed {
                cols.reverse();
            }
            let mut index = Index::new(*name, format!("{name}_idx"), &cols);
            index.unique = unique;
            snapshot = snapshot.with_index(index);
        }
        if spec.primary_key && has_id {
            snapshot = snapshot.with_primary_key(PrimaryKeyConstraint::new(
                *name,
                format!("{name}_pkey"),
                &["id"],
            ));
        }
        if spec.unique && !columns.is_empty() {
            snapshot = snapshot.with_unique(UniqueConstraint::new(
                *name,
                format!("{name}_uq"),
                &[columns[0]],
            ));
        }
        if let Some((target, standalone)) = spec.foreign_key
            && has_id
        {
            let mut fk = ForeignKeyConstraint::new(
                *name,
                format!("{name}_fk"),
                &["id"],
                TABLES[target],
                &["id"],
            );
            if standalone {
                fk = fk.standalone();
            }
            snapshot = snapshot.with_foreign_key(fk);
        }

        snapshot = snapshot.with_table(table);
    }

    snapshot.normalize()
}

/// The object an operation creates or drops, as `category:table:name`.
///
/// Foreign keys are keyed by name alone. Alters have no counterpart.
fn object(op: &Operation) -> Option<(bool, String)> {
    let (created, key) = match op {
        Operation::CreateTable { name, .. } => (true, format!("table:{name}")),
        Operation::DropTable { name } => (false, format!("table:{name}")),
        Operation::AddColumn { table, column, .. } => (true, format!("column:{table}:{column}")),
        Operation::DropColumn { table, column, .. } => (false, format!("column:{table}:{column}")),
        Operation::CreateIndex { index } => (true, format!("index:{}:{}", index.table, index.name)),
        Operation::DropIndex { table, name } => (false, format!("index:{table}:{name}")),
        Operation::CreatePrimaryKeyConstraint { constraint } => (
            true,
            format!("pk:{}:{}", constraint.table, constraint.name),
        ),
        Operation::DropPrimaryKeyConstraint { table, name } => (false, format!("pk:{table}:{name}")),
        Operation::CreateUniqueConstraint { constraint } => (
            true,
            format!("uq:{}:{}", constraint.table, constraint.name),
        ),
        Operation::DropUniqueConstraint { table, name } => (false, format!("uq:{table}:{name}")),
        Operation::CreateForeignKeyConstraint { constraint } => {
            (true, format!("fk:{}", constraint.name))
        }
        Operation::DropForeignKeyConstraint { name, .. } => (false, format!("fk:{name}")),
        Operation::AlterColumn { .. } | Operation::CreateTableWithConstraints { .. } => {
            return None;
        }
    };
    Some((created, key))
}

fn objects(ops: &[Operation], created: bool) -> BTreeSet<String> {
    ops.iter()
        .filter_map(object)
        .filter(|(c, _)| *c == created)
        .map(|(_, key)| key)
        .collect()
}

proptest! {
    #[test]
    fn diff_of_identical_snapshots_is_empty(s in snapshot()) {
        prop_assert!(diff_schema(&s, &s).is_empty());
    }

    #[test]
    fn additions_mirror_removals(a in snapshot(), b in snapshot()) {
        let forward = diff_schema(&a, &b);
        let backward = diff_schema(&b, &a);

        prop_assert_eq!(objects(&forward, true), objects(&backward, false));
        prop_assert_eq!(objects(&forward, false), objects(&backward, true));
    }

    #[test]
    fn plan_is_sorted_by_priority_then_table(a in snapshot(), b in snapshot()) {
        let plan = reconcile(&diff_schema(&a, &b)).unwrap();

        for pair in plan.windows(2) {
            let left = (pair[0].priority(), pair[0].target_table());
            let right = (pair[1].priority(), pair[1].target_table());
            prop_assert!(left <= right, "{} before {}", pair[0], pair[1]);
        }

        let last_drop = plan.iter().rposition(|op| op.kind().is_drop());
        let first_create = plan.iter().position(|op| !op.kind().is_drop());
        if let (Some(d), Some(c)) = (last_drop, first_create) {
            prop_assert!(d < c);
        }
    }

    #[test]
    fn dropped_tables_take_their_operations_with_them(a in snapshot(), b in snapshot()) {
        let plan = reconcile(&diff_schema(&a, &b)).unwrap();

        let dropped: BTreeSet<&str> = plan
            .iter()
            .filter_map(|op| match op {
                Operation::DropTable { name } => Some(name.as_str()),
                _ => None,
            })
            .collect();

        for op in &plan {
            if let Some(table) = op.table() {
                prop_assert!(!dropped.contains(table), "{} survived drop of {}", op, table);
            }
        }
    }

    #[test]
    fn created_tables_absorb_their_key_constraints(a in snapshot(), b in snapshot()) {
        let diff = diff_schema(&a, &b);
        let plan = reconcile(&diff).unwrap();

        let created: BTreeSet<&str> = diff
            .iter()
            .filter_map(|op| match op {
                Operation::CreateTable { name, .. } => Some(name.as_str()),
                _ => None,
            })
            .collect();
        let keyed: BTreeSet<&str> = diff
            .iter()
            .filter(|op| {
                matches!(
                    op.kind(),
                    OperationKind::CreatePrimaryKeyConstraint | OperationKind::CreateUniqueConstraint
                )
            })
            .map(|op| op.target_table())
            .filter(|table| created.contains(table))
            .collect();

        for table in &keyed {
            let count = |kind: OperationKind| {
                plan.iter()
                    .filter(|op| op.kind() == kind && op.target_table() == *table)
                    .count()
            };
            prop_assert_eq!(count(OperationKind::CreateTableWithConstraints), 1, "{}", table);
            prop_assert_eq!(count(OperationKind::CreateTable), 0, "{}", table);
            prop_assert_eq!(count(OperationKind::CreatePrimaryKeyConstraint), 0, "{}", table);
            prop_assert_eq!(count(OperationKind::CreateUniqueConstraint), 0, "{}", table);
        }
    }
}
