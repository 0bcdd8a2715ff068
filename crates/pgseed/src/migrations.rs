//! Migration files on disk and the external runner's version ledger.
//!
//! pgseed never runs migrations itself. It reads which versions the runner
//! has applied, names new files the way the runner expects, and rewrites the
//! directory when flattening.

use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Utc};

use crate::traced::{Connection, TracedConn};
use crate::{Error, Result};

/// Ledger table the runner records applied versions in.
pub const DEFAULT_LEDGER: &str = "goose_db_version";

/// Body of a freshly created migration.
const TEMPLATE: &str = "\
-- +goose Up
-- +goose StatementBegin

-- +goose StatementEnd

-- +goose Down
-- +goose StatementBegin

-- +goose StatementEnd
";

/// A `<version>_<name>.sql` file in the migrations directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationFile {
    pub version: i64,
    pub name: String,
    pub path: Utf8PathBuf,
}

impl MigrationFile {
    /// Recognize a migration file by its name; anything else is `None`.
    pub fn parse(path: &Utf8Path) -> Option<Self> {
        let stem = path.file_name()?.strip_suffix(".sql")?;
        let (version, name) = stem.split_once('_')?;
        if version.is_empty() || !version.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        Some(Self {
            version: version.parse().ok()?,
            name: name.to_string(),
            path: path.to_owned(),
        })
    }
}

/// Every migration file in `dir`, ordered by version. A missing directory has
/// no migrations.
pub fn list_migrations(dir: &Utf8Path) -> Result<Vec<MigrationFile>> {
    let entries = match dir.read_dir_utf8() {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(Error::io(dir)(e)),
    };

    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(Error::io(dir))?;
        if !entry.file_type().map_err(Error::io(entry.path()))?.is_file() {
            continue;
        }
        if let Some(file) = MigrationFile::parse(entry.path()) {
            files.push(file);
        }
    }
    files.sort_by(|a, b| a.version.cmp(&b.version).then_with(|| a.name.cmp(&b.name)));
    Ok(files)
}

/// Create an empty `<YYYYMMDDHHMMSS>_<name>.sql` migration and return its path.
pub fn new_migration(dir: &Utf8Path, name: &str, now: DateTime<Utc>) -> Result<Utf8PathBuf> {
    std::fs::create_dir_all(dir).map_err(Error::io(dir))?;
    let path = dir.join(format!("{}_{name}.sql", now.format("%Y%m%d%H%M%S")));

    use std::io::Write;
    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&path)
        .map_err(Error::io(&path))?;
    file.write_all(TEMPLATE.as_bytes())
        .map_err(Error::io(&path))?;
    Ok(path)
}

/// Versions the runner has applied, ascending. Empty if the ledger table
/// does not exist yet.
pub async fn applied_versions<C: Connection>(
    conn: &TracedConn<'_, C>,
    ledger: &str,
) -> Result<Vec<i64>> {
    let exists = conn
        .query_opt("SELECT to_regclass($1) IS NOT NULL", &[&ledger])
        .await
        .map_err(|e| e.context("checking for the migration ledger"))?;
    let exists = match exists {
        Some(row) => row.try_get::<_, bool>(0)?,
        None => false,
    };
    if !exists {
        return Ok(Vec::new());
    }

    let sql = format!(
        "SELECT DISTINCT version_id FROM {} WHERE is_applied ORDER BY version_id",
        ledger_ident(ledger)
    );
    let rows = conn
        .query(&sql, &[])
        .await
        .map_err(|e| e.context(format!("reading applied versions from {ledger}")))?;

    let mut versions = Vec::with_capacity(rows.len());
    for row in rows {
        let version: i64 = row.try_get(0)?;
        // 0 is the runner's bootstrap row, not a migration
        if version != 0 {
            versions.push(version);
        }
    }
    Ok(versions)
}

/// Quote `ledger` or `schema.ledger` for splicing into SQL.
fn ledger_ident(ledger: &str) -> String {
    match ledger.split_once('.') {
        Some((schema, table)) => pgseed_sql::quote_qualified(schema, table),
        None => pgseed_sql::quote_ident(ledger),
    }
}
