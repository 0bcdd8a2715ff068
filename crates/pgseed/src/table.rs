use std::collections::BTreeSet;
use std::fmt;

use pgseed_sql::{Ident, quote_ident};

/// Longest identifier Postgres keeps; longer ones are cut to this many bytes.
pub const MAX_IDENT_BYTES: usize = 63;

/// A schema-qualified table name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TableRef {
    pub schema: String,
    pub name: String,
}

impl TableRef {
    pub fn new(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            name: name.into(),
        }
    }

    /// Parse `schema.table`, or a bare `table` in `public`.
    ///
    /// Only the first dot separates the schema, so table names containing
    /// dots must be given qualified.
    pub fn parse(s: &str) -> Self {
        match s.split_once('.') {
            Some((schema, name)) => Self::new(schema, name),
            None => Self::new("public", s),
        }
    }

    /// `"schema"."table"`, ready to splice into SQL.
    pub fn quoted(&self) -> String {
        format!("{}.{}", Ident(&self.schema), Ident(&self.name))
    }

    /// The temp table a capture stages this table's rows in, as a quoted
    /// identifier: `"seed.<schema>.<table>"`.
    pub fn staging_name(&self) -> String {
        quote_ident(&self.staging_relname())
    }

    /// Unquoted relation name of the staging table, cut the way Postgres
    /// cuts it so catalog lookups match what `CREATE TEMP TABLE` stored.
    pub fn staging_relname(&self) -> String {
        let mut name = format!("seed.{}.{}", self.schema, self.name);
        if name.len() > MAX_IDENT_BYTES {
            let mut end = MAX_IDENT_BYTES;
            while !name.is_char_boundary(end) {
                end -= 1;
            }
            name.truncate(end);
        }
        name
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.name)
    }
}

/// Tables left out of dumps and captures.
///
/// Entries are matched against both the qualified `schema.table` form and the
/// bare table name, so `audit_log` excludes it from every schema.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExcludeSet(BTreeSet<String>);

impl ExcludeSet {
    pub fn new<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(entries.into_iter().map(Into::into).collect())
    }

    pub fn insert(&mut self, entry: impl Into<String>) {
        self.0.insert(entry.into());
    }

    /// Exclude the migration ledger in both its bare and `public.` forms.
    pub fn with_ledger(mut self, ledger: &str) -> Self {
        let bare = ledger.rsplit('.').next().unwrap_or(ledger);
        self.insert(bare);
        self.insert(format!("public.{bare}"));
        if ledger.contains('.') {
            self.insert(ledger);
        }
        self
    }

    pub fn contains(&self, schema: &str, table: &str) -> bool {
        self.0.contains(table) || self.0.contains(&format!("{schema}.{table}"))
    }

    pub fn contains_table(&self, table: &TableRef) -> bool {
        self.contains(&table.schema, &table.name)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}
