//! Collapse applied migrations into a single baseline migration.
//!
//! The baseline is the live schema dumped from the catalog, wrapped in the
//! runner's Up block and named after the latest applied version, so the
//! runner sees nothing new to apply on databases that are already migrated.

use std::collections::BTreeSet;

use camino::{Utf8Path, Utf8PathBuf};
use tokio_postgres::Client;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::ddl::{DumpOptions, dump_schema};
use crate::migrations::{DEFAULT_LEDGER, applied_versions, list_migrations};
use crate::traced::ConnectionExt;
use crate::{Error, ExcludeSet, Result};

#[derive(Debug, Clone)]
pub struct FlattenOptions {
    pub migrations_dir: Utf8PathBuf,
    /// Ledger table of the migration runner; never part of the baseline.
    pub ledger: String,
    /// Extra tables left out of the baseline.
    pub exclude: ExcludeSet,
    pub cancel: CancellationToken,
}

impl FlattenOptions {
    pub fn new(migrations_dir: impl Into<Utf8PathBuf>) -> Self {
        Self {
            migrations_dir: migrations_dir.into(),
            ledger: DEFAULT_LEDGER.to_string(),
            exclude: ExcludeSet::default(),
            cancel: CancellationToken::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlattenOutcome {
    /// The ledger lists no applied versions; the directory was left alone.
    NothingApplied,
    Flattened {
        baseline: Utf8PathBuf,
        /// Migration files the baseline replaced.
        removed: Vec<Utf8PathBuf>,
    },
}

/// Replace every applied migration file with one `<latest>_initial.sql`
/// holding the current schema.
pub async fn flatten(client: &mut Client, opts: &FlattenOptions) -> Result<FlattenOutcome> {
    let applied = applied_versions(&client.traced_with(&opts.cancel), &opts.ledger).await?;
    if applied.is_empty() {
        info!("no applied migrations; nothing to flatten");
        return Ok(FlattenOutcome::NothingApplied);
    }
    debug!(versions = applied.len(), "read applied versions");

    let dump = DumpOptions {
        exclude: opts.exclude.clone(),
        ledger: opts.ledger.clone(),
        cancel: opts.cancel.clone(),
    };
    let ddl = dump_schema(client, &dump).await?;

    rewrite_migrations(&opts.migrations_dir, &applied, &ddl)
}

/// The file half of [`flatten`]: swap the files of `applied` versions for a
/// baseline holding `ddl`.
///
/// The baseline lands before any replaced file is moved aside, so the
/// directory holds at least one migration at every step. Replaced files are
/// parked in a backup directory; on failure they are moved back, and if that
/// fails too the error names the backup directory so nothing is lost.
pub fn rewrite_migrations(dir: &Utf8Path, applied: &[i64], ddl: &str) -> Result<FlattenOutcome> {
    rewrite_with(dir, applied, ddl, |from, to| std::fs::rename(from, to))
}

fn rewrite_with(
    dir: &Utf8Path,
    applied: &[i64],
    ddl: &str,
    mut park: impl FnMut(&Utf8Path, &Utf8Path) -> std::io::Result<()>,
) -> Result<FlattenOutcome> {
    let Some(&latest) = applied.iter().max() else {
        return Ok(FlattenOutcome::NothingApplied);
    };
    let applied: BTreeSet<i64> = applied.iter().copied().collect();

    let replaced: Vec<Utf8PathBuf> = list_migrations(dir)?
        .into_iter()
        .filter(|m| applied.contains(&m.version))
        .map(|m| m.path)
        .collect();

    let baseline = dir.join(format!("{latest}_initial.sql"));
    let staged = dir.join(format!(".{latest}_initial.sql.tmp"));
    let backup = dir.join(format!(".flatten-backup-{latest}"));

    std::fs::create_dir_all(dir).map_err(Error::io(dir))?;
    std::fs::write(&staged, baseline_body(ddl)).map_err(Error::io(&staged))?;
    if let Err(e) = std::fs::create_dir(&backup) {
        discard(&staged);
        return Err(Error::io(&backup)(e));
    }

    // an earlier baseline with the same name is overwritten by the rename;
    // keep a copy so a failed swap can put it back
    let previous = if replaced.contains(&baseline) {
        let copy = backup.join(parked_name(&baseline));
        if let Err(e) = std::fs::copy(&baseline, &copy) {
            discard(&staged);
            return Err(restore(&backup, &[], None, Error::io(&baseline)(e)));
        }
        Some(copy)
    } else {
        None
    };

    if let Err(e) = std::fs::rename(&staged, &baseline) {
        discard(&staged);
        return Err(restore(&backup, &[], None, Error::io(&baseline)(e)));
    }

    let mut moved: Vec<(Utf8PathBuf, Utf8PathBuf)> = Vec::with_capacity(replaced.len());
    for path in replaced.iter().filter(|p| **p != baseline) {
        let parked = backup.join(parked_name(path));
        if let Err(e) = park(path, &parked) {
            let undo = BaselineUndo {
                baseline: &baseline,
                previous: previous.as_deref(),
            };
            return Err(restore(&backup, &moved, Some(undo), Error::io(path)(e)));
        }
        moved.push((path.clone(), parked));
    }

    if let Err(e) = std::fs::remove_dir_all(&backup) {
        warn!(backup = %backup, error = %e, "could not remove flatten backup");
    }
    for path in &replaced {
        debug!(file = %path, "replaced by baseline");
    }
    info!(baseline = %baseline, replaced = replaced.len(), "flattened migrations");

    Ok(FlattenOutcome::Flattened {
        baseline,
        removed: replaced,
    })
}

/// Baseline migration body: the schema as the runner's Up section.
pub fn baseline_body(ddl: &str) -> String {
    format!("-- +goose Up\n-- +goose StatementBegin\n{ddl}\n-- +goose StatementEnd\n")
}

fn parked_name(path: &Utf8Path) -> &str {
    path.file_name().unwrap_or(path.as_str())
}

/// How to take back a baseline that already landed.
struct BaselineUndo<'a> {
    baseline: &'a Utf8Path,
    /// Copy of the file the baseline overwrote, if any.
    previous: Option<&'a Utf8Path>,
}

/// Move parked files back after a failed swap, then withdraw the baseline.
///
/// The baseline stays if any file could not be moved back.
fn restore(
    backup: &Utf8Path,
    moved: &[(Utf8PathBuf, Utf8PathBuf)],
    undo: Option<BaselineUndo<'_>>,
    cause: Error,
) -> Error {
    let mut stuck = false;
    for (original, parked) in moved.iter().rev() {
        if let Err(e) = std::fs::rename(parked, original) {
            warn!(file = %original, error = %e, "could not restore migration file");
            stuck = true;
        }
    }

    if !stuck && let Some(undo) = undo {
        let withdrawn = match undo.previous {
            Some(previous) => std::fs::rename(previous, undo.baseline),
            None => std::fs::remove_file(undo.baseline),
        };
        if let Err(e) = withdrawn {
            warn!(file = %undo.baseline, error = %e, "could not withdraw baseline");
            stuck = true;
        }
    }

    if stuck {
        return Error::FlattenIncomplete {
            backup: backup.to_owned(),
            source: Box::new(cause),
        };
    }
    if let Err(e) = std::fs::remove_dir_all(backup) {
        warn!(backup = %backup, error = %e, "could not remove flatten backup");
    }
    cause
}

fn discard(path: &Utf8Path) {
    if let Err(e) = std::fs::remove_file(path)
        && e.kind() != std::io::ErrorKind::NotFound
    {
        warn!(file = %path, error = %e, "could not remove staged baseline");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utf8(dir: &tempfile::TempDir) -> Utf8PathBuf {
        Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap()
    }

    fn names(dir: &Utf8Path) -> Vec<String> {
        let mut names: Vec<String> = dir
            .read_dir_utf8()
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_three_applied_become_one_baseline() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = utf8(&tmp);
        for name in ["1_users.sql", "2_posts.sql", "3_comments.sql"] {
            std::fs::write(dir.join(name), "-- +goose Up\n").unwrap();
        }

        let ddl = "-- Tables\nCREATE TABLE \"public\".\"user\" ();\n";
        let outcome = rewrite_migrations(&dir, &[1, 2, 3], ddl).unwrap();

        assert_eq!(names(&dir), vec!["3_initial.sql"]);
        let FlattenOutcome::Flattened { baseline, removed } = outcome else {
            panic!("expected a baseline");
        };
        assert_eq!(baseline, dir.join("3_initial.sql"));
        assert_eq!(removed.len(), 3);

        insta::assert_snapshot!(std::fs::read_to_string(&baseline).unwrap(), @r#"
        -- +goose Up
        -- +goose StatementBegin
        -- Tables
        CREATE TABLE "public"."user" ();

        -- +goose StatementEnd
        "#);
    }

    #[test]
    fn test_pending_migrations_are_kept() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = utf8(&tmp);
        for name in ["1_a.sql", "2_b.sql", "3_pending.sql", "README.md"] {
            std::fs::write(dir.join(name), "").unwrap();
        }

        rewrite_migrations(&dir, &[1, 2], "").unwrap();
        assert_eq!(names(&dir), vec!["2_initial.sql", "3_pending.sql", "README.md"]);
    }

    #[test]
    fn test_reflatten_replaces_previous_baseline() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = utf8(&tmp);
        std::fs::write(dir.join("3_initial.sql"), "old").unwrap();
        std::fs::write(dir.join("4_more.sql"), "").unwrap();

        rewrite_migrations(&dir, &[1, 2, 3, 4], "new\n").unwrap();
        assert_eq!(names(&dir), vec!["4_initial.sql"]);
        let body = std::fs::read_to_string(dir.join("4_initial.sql")).unwrap();
        assert!(body.contains("new\n"));
    }

    #[test]
    fn test_nothing_applied_touches_nothing() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = utf8(&tmp);
        std::fs::write(dir.join("1_a.sql"), "").unwrap();

        assert_eq!(
            rewrite_migrations(&dir, &[], "").unwrap(),
            FlattenOutcome::NothingApplied
        );
        assert_eq!(names(&dir), vec!["1_a.sql"]);
    }

    #[test]
    fn test_failed_swap_restores_files() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = utf8(&tmp);
        std::fs::write(dir.join("1_a.sql"), "a").unwrap();
        std::fs::write(dir.join("2_b.sql"), "b").unwrap();
        // A directory where the baseline should go makes the final rename fail.
        std::fs::create_dir(dir.join("2_initial.sql")).unwrap();
        std::fs::write(dir.join("2_initial.sql").join("occupied"), "").unwrap();

        let err = rewrite_migrations(&dir, &[1, 2], "ddl").unwrap_err();
        assert!(matches!(err, Error::Io { .. }), "{err:?}");
        assert_eq!(names(&dir), vec!["1_a.sql", "2_b.sql", "2_initial.sql"]);
        assert_eq!(std::fs::read_to_string(dir.join("1_a.sql")).unwrap(), "a");
    }

    #[test]
    fn test_baseline_lands_before_files_are_parked() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = utf8(&tmp);
        for name in ["1_a.sql", "2_b.sql", "3_c.sql"] {
            std::fs::write(dir.join(name), name).unwrap();
        }

        let mut calls = 0;
        let err = rewrite_with(&dir, &[1, 2, 3], "ddl", |from, to| {
            calls += 1;
            assert!(dir.join("3_initial.sql").is_file());
            assert!(!list_migrations(&dir).unwrap().is_empty());
            if calls == 2 {
                return Err(std::io::Error::other("disk full"));
            }
            std::fs::rename(from, to)
        })
        .unwrap_err();

        assert_eq!(calls, 2);
        assert!(matches!(err, Error::Io { .. }), "{err:?}");
        assert_eq!(names(&dir), vec!["1_a.sql", "2_b.sql", "3_c.sql"]);
        assert_eq!(std::fs::read_to_string(dir.join("1_a.sql")).unwrap(), "1_a.sql");
    }

    #[test]
    fn test_failed_reflatten_restores_previous_baseline() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = utf8(&tmp);
        std::fs::write(dir.join("2_more.sql"), "more").unwrap();
        std::fs::write(dir.join("3_initial.sql"), "old").unwrap();

        let err = rewrite_with(&dir, &[1, 2, 3], "new", |_, _| {
            assert!(std::fs::read_to_string(dir.join("3_initial.sql")).unwrap().contains("new"));
            Err(std::io::Error::other("disk full"))
        })
        .unwrap_err();

        assert!(matches!(err, Error::Io { .. }), "{err:?}");
        assert_eq!(names(&dir), vec!["2_more.sql", "3_initial.sql"]);
        assert_eq!(std::fs::read_to_string(dir.join("3_initial.sql")).unwrap(), "old");
    }
}
