//! Persisted migrations.
//!
//! A migration is a reconciled plan frozen to disk as JSON:
//!
//! ```json
//! {"version": "1", "id": "20260117120000", "diff": {"operations": [...]}}
//! ```
//!
//! Files are named `m{id}_{slug}.json`. Ids are 14-digit UTC timestamps
//! (`YYYYMMDDHHMMSS`) and strictly increase within a directory.

use crate::{Error, Operation, Result};
use camino::{Utf8Path, Utf8PathBuf};
use facet::Facet;

/// Current record format version.
pub const RECORD_VERSION: &str = "1";

const ID_LEN: usize = 14;

/// The operations of a migration, in execution order.
#[derive(Facet, Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordedDiff {
    #[facet(default)]
    pub operations: Vec<Operation>,
}

/// A migration as stored on disk.
#[derive(Facet, Debug, Clone, PartialEq, Eq)]
pub struct MigrationRecord {
    /// Record format version.
    pub version: String,
    pub id: String,
    pub diff: RecordedDiff,
}

impl MigrationRecord {
    pub fn new(id: impl Into<String>, operations: Vec<Operation>) -> Self {
        Self {
            version: RECORD_VERSION.to_string(),
            id: id.into(),
            diff: RecordedDiff { operations },
        }
    }

    pub fn operations(&self) -> &[Operation] {
        &self.diff.operations
    }

    pub fn to_json(&self) -> Result<String> {
        facet_json::to_string(self).map_err(|e| Error::Record {
            path: Utf8PathBuf::from(format!("m{}.json", self.id)),
            message: e.to_string(),
        })
    }

    /// Parse a record. `path` is only used for error messages.
    pub fn from_json(path: &Utf8Path, json: &str) -> Result<Self> {
        let record: MigrationRecord = facet_json::from_str(json).map_err(|e| Error::Record {
            path: path.to_owned(),
            message: e.to_string(),
        })?;

        if record.version != RECORD_VERSION {
            return Err(Error::Record {
                path: path.to_owned(),
                message: format!("unsupported record version {:?}", record.version),
            });
        }
        if !is_valid_id(&record.id) {
            return Err(Error::Record {
                path: path.to_owned(),
                message: format!("malformed migration id {:?}", record.id),
            });
        }
        Ok(record)
    }
}

fn is_valid_id(id: &str) -> bool {
    id.len() == ID_LEN && id.bytes().all(|b| b.is_ascii_digit())
}

/// Pick the id for a new migration.
///
/// `now` is the UTC clock formatted as `YYYYMMDDHHMMSS`. If it does not sort
/// after `latest`, `latest + 1` is used instead.
pub fn next_id(now: &str, latest: Option<&str>) -> String {
    let Some(latest) = latest else {
        return now.to_string();
    };
    if now > latest {
        return now.to_string();
    }
    match latest.parse::<u64>() {
        Ok(n) => format!("{:0width$}", n + 1, width = ID_LEN),
        Err(_) => now.to_string(),
    }
}

/// The current UTC time as a migration id.
pub fn timestamp_id() -> String {
    jiff::Timestamp::now().strftime("%Y%m%d%H%M%S").to_string()
}

/// Turn a free-form migration name into a file name fragment.
///
/// ```
/// assert_eq!(drift::slugify("Add users table!"), "add_users_table");
/// ```
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.ends_with('_') {
            slug.push('_');
        }
    }
    slug.trim_matches('_').to_string()
}

/// A directory of migration records.
#[derive(Debug, Clone)]
pub struct MigrationDir {
    path: Utf8PathBuf,
}

impl MigrationDir {
    pub fn new(path: impl Into<Utf8PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// Load every `m*.json` record, sorted by id.
    ///
    /// A missing directory holds no migrations. Duplicate ids are rejected.
    pub fn load_all(&self) -> Result<Vec<MigrationRecord>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let mut records = Vec::new();
        for entry in self.path.read_dir_utf8()? {
            let entry = entry?;
            let name = entry.file_name();
            if !name.starts_with('m') || !name.ends_with(".json") {
                continue;
            }
            let json = std::fs::read_to_string(entry.path())?;
            records.push(MigrationRecord::from_json(entry.path(), &json)?);
        }

        records.sort_by(|a, b| a.id.cmp(&b.id));
        check_monotonic(&records)?;
        tracing::debug!(dir = %self.path, count = records.len(), "loaded migrations");
        Ok(records)
    }

    /// Write a new record for `operations`, returning its path.
    pub fn write(&self, name: &str, operations: Vec<Operation>) -> Result<Utf8PathBuf> {
        let existing = self.load_all()?;
        let latest = existing.last().map(|r| r.id.as_str());
        let id = next_id(&timestamp_id(), latest);
        let record = MigrationRecord::new(id, operations);

        std::fs::create_dir_all(&self.path)?;
        let path = self
            .path
            .join(format!("m{}_{}.json", record.id, slugify(name)));
        std::fs::write(&path, record.to_json()?)?;
        tracing::info!(%path, id = %record.id, "wrote migration");
        Ok(path)
    }
}

/// Fail unless ids strictly increase.
pub fn check_monotonic(records: &[MigrationRecord]) -> Result<()> {
    for pair in records.windows(2) {
        if pair[1].id <= pair[0].id {
            return Err(Error::NonMonotonicId {
                previous: pair[0].id.clone(),
                id: pair[1].id.clone(),
            });
        }
    }
    Ok(())
}
