//! Seed data: capture from a live database, files on disk, replay.
//!
//! A seed is a set of [`SeedArtifact`]s, one per table. Capture stages every
//! table in a temp copy, lets a population script fill the copies, and turns
//! the staged rows into `INSERT` statements. Replay truncates the tables and
//! runs those statements in foreign-key order.

mod capture;
mod files;
mod replay;

pub use capture::{CaptureOptions, TableFilter, capture, list_tables};
pub use files::{
    LOAD_FILE, SCRIPT_FILE, parse_load_sql, read_seed_dir, render_load_sql, write_seed_dir,
};
pub use replay::{ReplayStats, replay};

use crate::TableRef;

/// Captured rows of one table, as ready-to-run `INSERT` statements.
///
/// An empty `rows` means the table was captured and holds no data; replaying
/// it still truncates the table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeedArtifact {
    pub table: TableRef,
    pub rows: Vec<String>,
}

impl SeedArtifact {
    pub fn new(table: TableRef, rows: Vec<String>) -> Self {
        Self { table, rows }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// All artifacts of one seed, in capture order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SeedSet {
    pub artifacts: Vec<SeedArtifact>,
}

impl SeedSet {
    pub fn new(artifacts: Vec<SeedArtifact>) -> Self {
        Self { artifacts }
    }

    pub fn tables(&self) -> Vec<TableRef> {
        self.artifacts.iter().map(|a| a.table.clone()).collect()
    }

    pub fn get(&self, table: &TableRef) -> Option<&SeedArtifact> {
        self.artifacts.iter().find(|a| &a.table == table)
    }

    pub fn row_count(&self) -> usize {
        self.artifacts.iter().map(|a| a.rows.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty()
    }
}
