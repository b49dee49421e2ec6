//! PostgreSQL DDL for operations.
//!
//! Every identifier is double-quoted through [`quote_ident`], so table and
//! column names like `user` or `order` never collide with reserved words.
//! Column types are emitted verbatim after validation against the known
//! PostgreSQL base types.

use crate::{ExecutionError, Operation};
use drift_schema::{
    ColumnAttributes, ForeignKeyConstraint, PrimaryKeyConstraint, UniqueConstraint, quote_ident,
    quote_idents,
};
use indexmap::IndexMap;

/// Base type names accepted in column definitions, lowercased and without
/// modifiers or array brackets.
const KNOWN_TYPES: &[&str] = &[
    "smallint",
    "integer",
    "int",
    "int2",
    "int4",
    "int8",
    "bigint",
    "smallserial",
    "serial",
    "bigserial",
    "serial2",
    "serial4",
    "serial8",
    "real",
    "float4",
    "float8",
    "double precision",
    "numeric",
    "decimal",
    "money",
    "boolean",
    "bool",
    "text",
    "varchar",
    "character varying",
    "char",
    "character",
    "bpchar",
    "citext",
    "bytea",
    "date",
    "time",
    "timetz",
    "time with time zone",
    "time without time zone",
    "timestamp",
    "timestamptz",
    "timestamp with time zone",
    "timestamp without time zone",
    "interval",
    "uuid",
    "json",
    "jsonb",
    "xml",
    "inet",
    "cidr",
    "macaddr",
    "macaddr8",
    "bit",
    "varbit",
    "bit varying",
    "tsvector",
    "tsquery",
    "point",
    "line",
    "lseg",
    "box",
    "path",
    "polygon",
    "circle",
    "oid",
    "int4range",
    "int8range",
    "numrange",
    "tsrange",
    "tstzrange",
    "daterange",
];

/// Whether `sql_type` names a recognized PostgreSQL type.
///
/// Array suffixes (`text[]`) and type modifiers (`varchar(255)`,
/// `numeric(10, 2)`, `timestamp(3) with time zone`) are accepted.
pub fn is_supported_type(sql_type: &str) -> bool {
    let mut base = String::with_capacity(sql_type.len());
    let mut depth = 0usize;
    for c in sql_type.chars() {
        match c {
            '(' => depth += 1,
            ')' if depth == 0 => return false,
            ')' => depth -= 1,
            _ if depth == 0 => base.push(c.to_ascii_lowercase()),
            _ => {}
        }
    }
    if depth != 0 {
        return false;
    }

    let mut base = base.trim();
    while let Some(stripped) = base.strip_suffix("[]") {
        base = stripped.trim_end();
    }
    let base = base.split_whitespace().collect::<Vec<_>>().join(" ");

    KNOWN_TYPES.contains(&base.as_str())
}

fn check_type(table: &str, column: &str, attrs: &ColumnAttributes) -> Result<(), ExecutionError> {
    if is_supported_type(&attrs.sql_type) {
        Ok(())
    } else {
        Err(ExecutionError::UnsupportedType {
            table: table.to_string(),
            column: column.to_string(),
            sql_type: attrs.sql_type.clone(),
        })
    }
}

fn column_definition(name: &str, attrs: &ColumnAttributes) -> String {
    let mut def = format!("{} {}", quote_ident(name), attrs.sql_type);
    if attrs.not_null {
        def.push_str(" NOT NULL");
    }
    if let Some(default) = &attrs.default_sql {
        def.push_str(" DEFAULT ");
        def.push_str(default);
    }
    def
}

fn column_definitions(
    table: &str,
    columns: &IndexMap<String, ColumnAttributes>,
) -> Result<Vec<String>, ExecutionError> {
    columns
        .iter()
        .map(|(name, attrs)| {
            check_type(table, name, attrs)?;
            Ok(column_definition(name, attrs))
        })
        .collect()
}

fn create_table_sql(name: &str, lines: &[String]) -> String {
    format!(
        "CREATE TABLE {} (\n    {}\n);",
        quote_ident(name),
        lines.join(",\n    ")
    )
}

fn primary_key_clause(pk: &PrimaryKeyConstraint) -> String {
    format!(
        "CONSTRAINT {} PRIMARY KEY ({})",
        quote_ident(&pk.name),
        quote_idents(&pk.columns)
    )
}

fn unique_clause(uq: &UniqueConstraint) -> String {
    format!(
        "CONSTRAINT {} UNIQUE ({})",
        quote_ident(&uq.name),
        quote_idents(&uq.columns)
    )
}

fn foreign_key_clause(fk: &ForeignKeyConstraint) -> String {
    let mut clause = format!(
        "CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({})",
        quote_ident(&fk.name),
        quote_idents(&fk.columns),
        quote_ident(&fk.referenced_table),
        quote_idents(&fk.referenced_columns)
    );
    if let Some(action) = fk.on_delete {
        clause.push_str(" ON DELETE ");
        clause.push_str(action.as_sql());
    }
    if let Some(action) = fk.on_update {
        clause.push_str(" ON UPDATE ");
        clause.push_str(action.as_sql());
    }
    clause
}

fn deferred_foreign_key_clause(fk: &ForeignKeyConstraint) -> String {
    format!("{} DEFERRABLE INITIALLY DEFERRED", foreign_key_clause(fk))
}

fn add_constraint(table: &str, clause: String) -> String {
    format!("ALTER TABLE {} ADD {};", quote_ident(table), clause)
}

fn drop_constraint(table: &str, name: &str) -> String {
    format!(
        "ALTER TABLE {} DROP CONSTRAINT {};",
        quote_ident(table),
        quote_ident(name)
    )
}

/// Render the statements that apply `op`, in execution order.
///
/// An `alter_column` that changes neither type nor nullability renders no
/// statements: key and uniqueness flags are carried by the constraint
/// operations, and defaults are not migrated.
///
/// A `create_table_with_constraints` only inlines foreign keys that reference
/// the table itself. PostgreSQL resolves the referenced relation when the
/// constraint is declared, so foreign keys to other tables are rendered by
/// [`deferred_statements`] instead.
pub fn statements(op: &Operation) -> Result<Vec<String>, ExecutionError> {
    let sql = match op {
        Operation::CreateTable { name, columns } => {
            vec![create_table_sql(name, &column_definitions(name, columns)?)]
        }
        Operation::CreateTableWithConstraints {
            name,
            columns,
            primary_key,
            unique,
            foreign_keys,
        } => {
            let mut lines = column_definitions(name, columns)?;
            lines.extend(primary_key.iter().map(primary_key_clause));
            lines.extend(unique.iter().map(unique_clause));
            lines.extend(
                foreign_keys
                    .iter()
                    .filter(|fk| fk.referenced_table == *name)
                    .map(deferred_foreign_key_clause),
            );
            vec![create_table_sql(name, &lines)]
        }
        Operation::DropTable { name } => vec![format!("DROP TABLE {};", quote_ident(name))],
        Operation::AddColumn {
            table,
            column,
            attributes,
        } => {
            check_type(table, column, attributes)?;
            vec![format!(
                "ALTER TABLE {} ADD COLUMN {};",
                quote_ident(table),
                column_definition(column, attributes)
            )]
        }
        Operation::DropColumn { table, column, .. } => vec![format!(
            "ALTER TABLE {} DROP COLUMN {};",
            quote_ident(table),
            quote_ident(column)
        )],
        Operation::AlterColumn {
            table,
            column,
            before,
            after,
        } => {
            let mut sql = Vec::new();
            if before.sql_type != after.sql_type {
                check_type(table, column, after)?;
                sql.push(format!(
                    "ALTER TABLE {} ALTER COLUMN {} TYPE {} USING {}::{};",
                    quote_ident(table),
                    quote_ident(column),
                    after.sql_type,
                    quote_ident(column),
                    after.sql_type
                ));
            }
            if before.not_null != after.not_null {
                let action = if after.not_null { "SET" } else { "DROP" };
                sql.push(format!(
                    "ALTER TABLE {} ALTER COLUMN {} {} NOT NULL;",
                    quote_ident(table),
                    quote_ident(column),
                    action
                ));
            }
            sql
        }
        Operation::CreateIndex { index } => {
            let unique = if index.unique { "UNIQUE " } else { "" };
            vec![format!(
                "CREATE {}INDEX {} ON {} ({});",
                unique,
                quote_ident(&index.name),
                quote_ident(&index.table),
                quote_idents(&index.columns)
            )]
        }
        Operation::DropIndex { name, .. } => vec![format!("DROP INDEX {};", quote_ident(name))],
        Operation::CreatePrimaryKeyConstraint { constraint } => {
            vec![add_constraint(&constraint.table, primary_key_clause(constraint))]
        }
        Operation::CreateUniqueConstraint { constraint } => {
            vec![add_constraint(&constraint.table, unique_clause(constraint))]
        }
        Operation::CreateForeignKeyConstraint { constraint } => {
            vec![add_constraint(&constraint.table, foreign_key_clause(constraint))]
        }
        Operation::DropPrimaryKeyConstraint { table, name }
        | Operation::DropUniqueConstraint { table, name }
        | Operation::DropForeignKeyConstraint { table, name } => {
            vec![drop_constraint(table, name)]
        }
    };
    Ok(sql)
}

/// Statements that must run after every table of the plan exists.
///
/// These are the inlined foreign keys of a `create_table_with_constraints`
/// that point at another table, added as `DEFERRABLE INITIALLY DEFERRED` so
/// row checks still wait for commit. Every other operation renders nothing.
pub fn deferred_statements(op: &Operation) -> Vec<String> {
    match op {
        Operation::CreateTableWithConstraints {
            name, foreign_keys, ..
        } => foreign_keys
            .iter()
            .filter(|fk| fk.referenced_table != *name)
            .map(|fk| add_constraint(name, deferred_foreign_key_clause(fk)))
            .collect(),
        _ => Vec::new(),
    }
}
