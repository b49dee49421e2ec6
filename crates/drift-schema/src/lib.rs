//! Schema snapshot types for drift.
//!
//! A [`SchemaSnapshot`] describes every table, index and constraint of a
//! schema at one point in time. Two snapshots exist per diff: the *current*
//! one (produced by introspecting a live database) and the *ideal* one
//! (produced from configuration). Both must be [normalized](SchemaSnapshot::normalize)
//! before they are compared.

use facet::Facet;
use indexmap::IndexMap;
use std::fmt;
use thiserror::Error;

/// Attributes of a single column.
///
/// `primary_key` and `unique` are denormalized copies of single-column
/// constraints; the constraint entities on [`SchemaSnapshot`] are the source
/// of truth for DDL.
#[derive(Facet, Debug, Clone, PartialEq, Eq)]
pub struct ColumnAttributes {
    /// SQL type, opaque to the diff (e.g. `varchar(255)`, `int`, `text[]`).
    #[facet(rename = "type")]
    pub sql_type: String,
    #[facet(default)]
    pub not_null: bool,
    #[facet(default)]
    pub primary_key: bool,
    #[facet(default)]
    pub unique: bool,
    /// Default value expression, rendered verbatim.
    #[facet(default)]
    pub default_sql: Option<String>,
}

impl ColumnAttributes {
    /// A nullable column of the given type with no constraints.
    pub fn new(sql_type: impl Into<String>) -> Self {
        Self {
            sql_type: sql_type.into(),
            not_null: false,
            primary_key: false,
            unique: false,
            default_sql: None,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.not_null = true;
        self
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn default_sql(mut self, expr: impl Into<String>) -> Self {
        self.default_sql = Some(expr.into());
        self
    }

    /// Structural equality used by the diff.
    ///
    /// `default_sql` is deliberately ignored: default expressions such as
    /// `now()` come back from introspection in many spellings, and a
    /// default-only change never produces an `alter_column`.
    pub fn same_shape(&self, other: &ColumnAttributes) -> bool {
        self.sql_type == other.sql_type
            && self.not_null == other.not_null
            && self.primary_key == other.primary_key
            && self.unique == other.unique
    }
}

impl fmt::Display for ColumnAttributes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.sql_type)?;
        if self.not_null {
            write!(f, " not null")?;
        }
        if self.primary_key {
            write!(f, " pk")?;
        }
        if self.unique {
            write!(f, " unique")?;
        }
        if let Some(default) = &self.default_sql {
            write!(f, " default {}", default)?;
        }
        Ok(())
    }
}

/// A table and its columns, in declaration order.
#[derive(Facet, Debug, Clone, PartialEq, Eq)]
pub struct Table {
    pub name: String,
    #[facet(default)]
    pub columns: IndexMap<String, ColumnAttributes>,
}

impl Table {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: IndexMap::new(),
        }
    }

    /// Add a column, replacing any previous column of the same name.
    pub fn column(mut self, name: impl Into<String>, attrs: ColumnAttributes) -> Self {
        self.columns.insert(name.into(), attrs);
        self
    }
}

/// A secondary index. Column order is significant.
#[derive(Facet, Debug, Clone, PartialEq, Eq)]
pub struct Index {
    pub table: String,
    pub name: String,
    pub columns: Vec<String>,
    #[facet(default)]
    pub unique: bool,
}

impl Index {
    pub fn new(table: impl Into<String>, name: impl Into<String>, columns: &[&str]) -> Self {
        Self {
            table: table.into(),
            name: name.into(),
            columns: to_strings(columns),
            unique: false,
        }
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Identity key: `(table, name)`.
    pub fn key(&self) -> (&str, &str) {
        (&self.table, &self.name)
    }
}

/// A named primary key constraint.
#[derive(Facet, Debug, Clone, PartialEq, Eq)]
pub struct PrimaryKeyConstraint {
    pub table: String,
    pub name: String,
    pub columns: Vec<String>,
}

impl PrimaryKeyConstraint {
    pub fn new(table: impl Into<String>, name: impl Into<String>, columns: &[&str]) -> Self {
        Self {
            table: table.into(),
            name: name.into(),
            columns: to_strings(columns),
        }
    }

    pub fn key(&self) -> (&str, &str) {
        (&self.table, &self.name)
    }
}

/// A named unique constraint.
#[derive(Facet, Debug, Clone, PartialEq, Eq)]
pub struct UniqueConstraint {
    pub table: String,
    pub name: String,
    pub columns: Vec<String>,
}

impl UniqueConstraint {
    pub fn new(table: impl Into<String>, name: impl Into<String>, columns: &[&str]) -> Self {
        Self {
            table: table.into(),
            name: name.into(),
            columns: to_strings(columns),
        }
    }

    pub fn key(&self) -> (&str, &str) {
        (&self.table, &self.name)
    }
}

/// Action taken on referencing rows when the referenced row changes.
#[derive(Facet, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[facet(rename_all = "snake_case")]
#[repr(u8)]
pub enum ReferentialAction {
    NoAction,
    Restrict,
    Cascade,
    SetNull,
    SetDefault,
}

impl ReferentialAction {
    /// The SQL spelling, e.g. `SET NULL`.
    pub fn as_sql(&self) -> &'static str {
        match self {
            ReferentialAction::NoAction => "NO ACTION",
            ReferentialAction::Restrict => "RESTRICT",
            ReferentialAction::Cascade => "CASCADE",
            ReferentialAction::SetNull => "SET NULL",
            ReferentialAction::SetDefault => "SET DEFAULT",
        }
    }
}

impl fmt::Display for ReferentialAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sql())
    }
}

/// A named foreign key constraint.
///
/// Unlike the other constraint kinds, a foreign key is identified by its
/// name alone, not by `(table, name)`.
#[derive(Facet, Debug, Clone, PartialEq, Eq)]
pub struct ForeignKeyConstraint {
    pub table: String,
    pub name: String,
    pub columns: Vec<String>,
    pub referenced_table: String,
    pub referenced_columns: Vec<String>,
    #[facet(default)]
    pub on_delete: Option<ReferentialAction>,
    #[facet(default)]
    pub on_update: Option<ReferentialAction>,
    /// `Some(false)` keeps the constraint out of its table's CREATE
    /// statement. Unset means it may be inlined.
    #[facet(default)]
    pub inline: Option<bool>,
}

impl ForeignKeyConstraint {
    pub fn new(
        table: impl Into<String>,
        name: impl Into<String>,
        columns: &[&str],
        referenced_table: impl Into<String>,
        referenced_columns: &[&str],
    ) -> Self {
        Self {
            table: table.into(),
            name: name.into(),
            columns: to_strings(columns),
            referenced_table: referenced_table.into(),
            referenced_columns: to_strings(referenced_columns),
            on_delete: None,
            on_update: None,
            inline: None,
        }
    }

    pub fn on_delete(mut self, action: ReferentialAction) -> Self {
        self.on_delete = Some(action);
        self
    }

    pub fn on_update(mut self, action: ReferentialAction) -> Self {
        self.on_update = Some(action);
        self
    }

    /// Force this constraint to stay a standalone operation.
    pub fn standalone(mut self) -> Self {
        self.inline = Some(false);
        self
    }

    /// Whether the reconciler may merge this constraint into a CREATE TABLE.
    pub fn is_inlinable(&self) -> bool {
        self.inline != Some(false)
    }

    /// Equality over everything that changes the constraint's meaning.
    /// `inline` is a planning hint and is not compared.
    pub fn same_definition(&self, other: &ForeignKeyConstraint) -> bool {
        self.columns == other.columns
            && self.referenced_table == other.referenced_table
            && self.referenced_columns == other.referenced_columns
            && self.on_delete == other.on_delete
            && self.on_update == other.on_update
    }
}

/// A snapshot that cannot be compared as-is.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SnapshotError {
    #[error("table stored under key {key:?} is named {name:?}")]
    TableNameMismatch { key: String, name: String },
}

/// A complete schema description, the unit of comparison.
#[derive(Facet, Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemaSnapshot {
    /// Tables, keyed by name.
    #[facet(default)]
    pub tables: IndexMap<String, Table>,
    #[facet(default)]
    pub indexes: Vec<Index>,
    #[facet(default)]
    pub primary_key_constraints: Vec<PrimaryKeyConstraint>,
    #[facet(default)]
    pub unique_constraints: Vec<UniqueConstraint>,
    #[facet(default)]
    pub foreign_key_constraints: Vec<ForeignKeyConstraint>,
}

impl SchemaSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a table by name.
    pub fn get_table(&self, name: &str) -> Option<&Table> {
        self.tables.get(name)
    }

    pub fn with_table(mut self, table: Table) -> Self {
        self.tables.insert(table.name.clone(), table);
        self
    }

    pub fn with_index(mut self, index: Index) -> Self {
        self.indexes.push(index);
        self
    }

    pub fn with_primary_key(mut self, pk: PrimaryKeyConstraint) -> Self {
        self.primary_key_constraints.push(pk);
        self
    }

    pub fn with_unique(mut self, unique: UniqueConstraint) -> Self {
        self.unique_constraints.push(unique);
        self
    }

    pub fn with_foreign_key(mut self, fk: ForeignKeyConstraint) -> Self {
        self.foreign_key_constraints.push(fk);
        self
    }

    /// Check that every table is stored under its own name.
    ///
    /// The diff engine matches tables by [`Table::name`] while constraints
    /// find their table by key, so a snapshot where the two disagree would
    /// produce a plan against the wrong table.
    pub fn validate(&self) -> Result<(), SnapshotError> {
        match self.tables.iter().find(|(key, table)| **key != table.name) {
            Some((key, table)) => Err(SnapshotError::TableNameMismatch {
                key: key.clone(),
                name: table.name.clone(),
            }),
            None => Ok(()),
        }
    }

    /// Bring column flags in line with the constraint entities.
    ///
    /// - columns of a composite primary key become `not_null`
    /// - single-column primary keys set `primary_key` on their column
    /// - single-column unique constraints set `unique` on their column
    ///
    /// Snapshot producers call this; the diff engine never does.
    pub fn normalize(mut self) -> Self {
        for pk in &self.primary_key_constraints {
            let Some(table) = self.tables.get_mut(&pk.table) else {
                continue;
            };
            let composite = pk.columns.len() > 1;
            for column in &pk.columns {
                if let Some(attrs) = table.columns.get_mut(column) {
                    if composite {
                        attrs.not_null = true;
                    } else {
                        attrs.primary_key = true;
                    }
                }
            }
        }

        for unique in &self.unique_constraints {
            if let [column] = unique.columns.as_slice()
                && let Some(attrs) = self
                    .tables
                    .get_mut(&unique.table)
                    .and_then(|t| t.columns.get_mut(column))
            {
                attrs.unique = true;
            }
        }

        self
    }
}

/// A PostgreSQL identifier wrapper.
///
/// Display writes the value escaped and quoted with double quotes.
///
/// # Example
/// ```
/// use drift_schema::Ident;
/// assert_eq!(format!("{}", Ident("user")), "\"user\"");
/// assert_eq!(format!("{}", Ident("bla\"h")), "\"bla\"\"h\"");
/// ```
pub struct Ident<T: AsRef<str>>(pub T);

impl<T: AsRef<str>> fmt::Display for Ident<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"")?;
        for c in self.0.as_ref().chars() {
            if c == '"' {
                write!(f, "\"\"")?;
            } else {
                write!(f, "{}", c)?;
            }
        }
        write!(f, "\"")
    }
}

/// Quote a PostgreSQL identifier.
///
/// Always quotes, so reserved words like `user` or `order` are safe.
pub fn quote_ident(name: &str) -> String {
    format!("{}", Ident(name))
}

/// Quote and comma-join a list of identifiers.
pub fn quote_idents(names: &[String]) -> String {
    names
        .iter()
        .map(|n| quote_ident(n))
        .collect::<Vec<_>>()
        .join(", ")
}

fn to_strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}
