//! On-disk seed layout.
//!
//! A seed directory holds a population script (`dump.sql`) and the captured
//! data in one file, `load.sql`:
//!
//! ```text
//! -- Table: public.user
//! INSERT INTO "public"."user" ("id", "name") VALUES (1, 'amos');
//!
//! -- Table: public.post
//! -- No data for table public.post
//! ```
//!
//! Older seeds stored one `<schema>.<table>.sql` or `<table>.csv` file per
//! table. Those are recognized so the user can be told to regenerate them,
//! but never read.

use camino::{Utf8Path, Utf8PathBuf};
use tracing::{debug, warn};

use super::{SeedArtifact, SeedSet};
use crate::{Error, Result, TableRef};

/// Consolidated seed data file.
pub const LOAD_FILE: &str = "load.sql";

/// Population script run against the staging tables during capture.
pub const SCRIPT_FILE: &str = "dump.sql";

const TABLE_MARKER: &str = "-- Table: ";
const NO_DATA_MARKER: &str = "-- No data for table ";

/// Render a seed set in the `load.sql` format.
pub fn render_load_sql(seeds: &SeedSet) -> String {
    let sections: Vec<String> = seeds
        .artifacts
        .iter()
        .map(|a| {
            let mut s = format!("{TABLE_MARKER}{}\n", a.table);
            if a.rows.is_empty() {
                s.push_str(&format!("{NO_DATA_MARKER}{}\n", a.table));
            }
            for row in &a.rows {
                s.push_str(row);
                s.push('\n');
            }
            s
        })
        .collect();
    sections.join("\n")
}

/// Parse the `load.sql` format.
///
/// Statements are split on top-level semicolons, so row values spanning
/// several lines (or containing text that looks like a marker) stay intact.
pub fn parse_load_sql(text: &str) -> std::result::Result<SeedSet, String> {
    let mut artifacts: Vec<SeedArtifact> = Vec::new();
    for segment in split_statements(text) {
        match segment {
            Segment::Comment(c) => {
                if let Some(table) = c.strip_prefix(TABLE_MARKER) {
                    let table = TableRef::parse(table.trim());
                    if artifacts.iter().any(|a| a.table == table) {
                        return Err(format!("table {table} appears twice"));
                    }
                    artifacts.push(SeedArtifact::new(table, Vec::new()));
                }
            }
            Segment::Statement(stmt) => match artifacts.last_mut() {
                Some(current) => current.rows.push(stmt),
                None => {
                    return Err(format!(
                        "statement before the first `{}` header",
                        TABLE_MARKER.trim_end()
                    ));
                }
            },
        }
    }
    Ok(SeedSet::new(artifacts))
}

/// Load the seed stored in `dir`.
pub fn read_seed_dir(dir: &Utf8Path) -> Result<SeedSet> {
    let load = dir.join(LOAD_FILE);
    let legacy = legacy_files(dir)?;

    if load.is_file() {
        if !legacy.is_empty() {
            warn!(dir = %dir, files = legacy.len(), "ignoring per-table seed files next to load.sql");
        }
        let text = std::fs::read_to_string(&load).map_err(Error::io(&load))?;
        let seeds = parse_load_sql(&text).map_err(|reason| Error::MalformedSeed {
            path: load.clone(),
            reason,
        })?;
        debug!(path = %load, tables = seeds.artifacts.len(), "read seed data");
        return Ok(seeds);
    }

    if !legacy.is_empty() {
        let mut found: Vec<&str> = legacy.iter().take(3).map(String::as_str).collect();
        if legacy.len() > found.len() {
            found.push("...");
        }
        return Err(Error::StaleSeedFormat {
            dir: dir.to_owned(),
            found: found.join(", "),
        });
    }

    Err(Error::NoSeedData {
        dir: dir.to_owned(),
    })
}

/// Write `seeds` to `dir/load.sql`, replacing any previous seed data.
///
/// The file is written next to its destination and renamed into place, so a
/// crash never leaves a half-written `load.sql`. Per-table files from the old
/// layout are removed afterwards.
pub fn write_seed_dir(dir: &Utf8Path, seeds: &SeedSet) -> Result<Utf8PathBuf> {
    std::fs::create_dir_all(dir).map_err(Error::io(dir))?;

    let dest = dir.join(LOAD_FILE);
    let tmp = dir.join(format!(".{LOAD_FILE}.tmp"));
    std::fs::write(&tmp, render_load_sql(seeds)).map_err(Error::io(&tmp))?;
    std::fs::rename(&tmp, &dest).map_err(Error::io(&dest))?;

    for name in legacy_files(dir)? {
        let path = dir.join(&name);
        std::fs::remove_file(&path).map_err(Error::io(&path))?;
        debug!(path = %path, "removed per-table seed file");
    }
    Ok(dest)
}

/// File names in `dir` that belong to the per-table layout.
fn legacy_files(dir: &Utf8Path) -> Result<Vec<String>> {
    let entries = match dir.read_dir_utf8() {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(Error::io(dir)(e)),
    };
    let mut names = Vec::new();
    for entry in entries {
        let entry = entry.map_err(Error::io(dir))?;
        let name = entry.file_name();
        if is_legacy_file(name) {
            names.push(name.to_string());
        }
    }
    names.sort();
    Ok(names)
}

fn is_legacy_file(name: &str) -> bool {
    if name.ends_with(".csv") {
        return true;
    }
    // `<schema>.<table>.sql`; load.sql and dump.sql have no inner dot
    match name.strip_suffix(".sql") {
        Some(stem) => !stem.starts_with('.') && stem.contains('.'),
        None => false,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    /// A `--` comment line at statement level, trimmed.
    Comment(String),
    /// A statement including its terminating `;`.
    Statement(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Lex {
    Top,
    /// Inside `'...'`; `escapes` is set for `E'...'` strings.
    Single { escapes: bool },
    Double,
    Dollar(String),
}

/// Split SQL text into top-level comments and statements, honoring single
/// quotes, `E''` escapes, quoted identifiers and dollar quotes.
fn split_statements(text: &str) -> Vec<Segment> {
    let mut out = Vec::new();
    let mut buf = String::new();
    let mut state = Lex::Top;
    let mut chars = text.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        match &state {
            Lex::Top => match c {
                '-' if text[i..].starts_with("--") && buf.trim().is_empty() => {
                    let end = text[i..].find('\n').map_or(text.len(), |n| i + n);
                    out.push(Segment::Comment(text[i..end].trim().to_string()));
                    buf.clear();
                    while chars.peek().is_some_and(|(j, _)| *j < end) {
                        chars.next();
                    }
                }
                '\'' => {
                    let escapes = buf.ends_with(['E', 'e'])
                        && !buf[..buf.len() - 1]
                            .ends_with(|p: char| p.is_alphanumeric() || p == '_');
                    buf.push(c);
                    state = Lex::Single { escapes };
                }
                '"' => {
                    buf.push(c);
                    state = Lex::Double;
                }
                '$' => {
                    buf.push(c);
                    if let Some(tag) = dollar_tag_at(&text[i..]) {
                        for _ in 0..tag.len() + 1 {
                            if let Some((_, t)) = chars.next() {
                                buf.push(t);
                            }
                        }
                        state = Lex::Dollar(tag);
                    }
                }
                ';' => {
                    buf.push(c);
                    out.push(Segment::Statement(buf.trim().to_string()));
                    buf.clear();
                }
                c => buf.push(c),
            },
            Lex::Single { escapes } => {
                buf.push(c);
                if *escapes && c == '\\' {
                    if let Some((_, next)) = chars.next() {
                        buf.push(next);
                    }
                } else if c == '\'' {
                    if chars.peek().is_some_and(|(_, n)| *n == '\'') {
                        if let Some((_, q)) = chars.next() {
                            buf.push(q);
                        }
                    } else {
                        state = Lex::Top;
                    }
                }
            }
            Lex::Double => {
                buf.push(c);
                if c == '"' {
                    if chars.peek().is_some_and(|(_, n)| *n == '"') {
                        if let Some((_, q)) = chars.next() {
                            buf.push(q);
                        }
                    } else {
                        state = Lex::Top;
                    }
                }
            }
            Lex::Dollar(tag) => {
                buf.push(c);
                let close = format!("${tag}$");
                if c == '$' && text[i..].starts_with(&close) {
                    for _ in 0..close.len() - 1 {
                        if let Some((_, t)) = chars.next() {
                            buf.push(t);
                        }
                    }
                    state = Lex::Top;
                }
            }
        }
    }

    if !buf.trim().is_empty() {
        out.push(Segment::Statement(buf.trim().to_string()));
    }
    out
}

/// If `s` starts with a dollar-quote opener (`$$` or `$tag$`), return the tag.
fn dollar_tag_at(s: &str) -> Option<String> {
    let rest = s.strip_prefix('$')?;
    let end = rest.find('$')?;
    let tag = &rest[..end];
    let valid = tag
        .chars()
        .enumerate()
        .all(|(i, c)| c == '_' || c.is_ascii_alphabetic() || (i > 0 && c.is_ascii_digit()));
    valid.then(|| tag.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn artifact(schema: &str, name: &str, rows: &[&str]) -> SeedArtifact {
        SeedArtifact::new(
            TableRef::new(schema, name),
            rows.iter().map(|r| r.to_string()).collect(),
        )
    }

    fn utf8(dir: &tempfile::TempDir) -> Utf8PathBuf {
        Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap()
    }

    // ==================== Format Tests ====================

    #[test]
    fn test_empty_table_gets_no_data_marker() {
        let seeds = SeedSet::new(vec![
            artifact("public", "user", &[r#"INSERT INTO "public"."user" ("id") VALUES (1);"#]),
            artifact("public", "post", &[]),
        ]);
        insta::assert_snapshot!(render_load_sql(&seeds), @r#"
        -- Table: public.user
        INSERT INTO "public"."user" ("id") VALUES (1);

        -- Table: public.post
        -- No data for table public.post
        "#);
    }

    #[test]
    fn test_parse_keeps_empty_tables() {
        let seeds = SeedSet::new(vec![
            artifact("public", "user", &[r#"INSERT INTO "public"."user" ("id") VALUES (1);"#]),
            artifact("public", "post", &[]),
        ]);
        let parsed = parse_load_sql(&render_load_sql(&seeds)).unwrap();
        assert_eq!(parsed, seeds);
        assert!(parsed.get(&TableRef::new("public", "post")).unwrap().is_empty());
    }

    #[test]
    fn test_parse_multiline_and_tricky_values() {
        let rows = [
            "INSERT INTO \"public\".\"note\" (\"body\") VALUES ('line one;\n-- Table: public.fake\nline three');",
            r#"INSERT INTO "public"."note" ("body") VALUES (E'back\\slash'';');"#,
            r#"INSERT INTO "public"."note" ("tags") VALUES ($q${"a;b","c'd"}$q$);"#,
            r#"INSERT INTO "public"."note" ("semi;col") VALUES (NULL);"#,
        ];
        let seeds = SeedSet::new(vec![artifact("public", "note", &rows)]);
        let parsed = parse_load_sql(&render_load_sql(&seeds)).unwrap();
        assert_eq!(parsed, seeds);
    }

    #[test]
    fn test_statement_before_header_is_rejected() {
        let err = parse_load_sql("INSERT INTO x VALUES (1);\n-- Table: public.x\n").unwrap_err();
        assert!(err.contains("before the first"));
    }

    #[test]
    fn test_dollar_tag_detection() {
        assert_eq!(dollar_tag_at("$q$abc"), Some("q".to_string()));
        assert_eq!(dollar_tag_at("$$abc"), Some(String::new()));
        assert_eq!(dollar_tag_at("$1, $2"), None);
    }

    // ==================== Directory Tests ====================

    #[test]
    fn test_write_then_read() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = utf8(&tmp).join("demo");
        let seeds = SeedSet::new(vec![artifact("public", "user", &[])]);

        let path = write_seed_dir(&dir, &seeds).unwrap();
        assert_eq!(path, dir.join(LOAD_FILE));
        assert!(!dir.join(".load.sql.tmp").exists());
        assert_eq!(read_seed_dir(&dir).unwrap(), seeds);
    }

    #[test]
    fn test_write_removes_legacy_files_but_keeps_script() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = utf8(&tmp);
        std::fs::write(dir.join("public.user.sql"), "-- old").unwrap();
        std::fs::write(dir.join("user.csv"), "id\n1\n").unwrap();
        std::fs::write(dir.join(SCRIPT_FILE), "INSERT INTO ...").unwrap();

        write_seed_dir(&dir, &SeedSet::default()).unwrap();

        assert!(!dir.join("public.user.sql").exists());
        assert!(!dir.join("user.csv").exists());
        assert!(dir.join(SCRIPT_FILE).exists());
        assert!(dir.join(LOAD_FILE).exists());
    }

    #[test]
    fn test_legacy_layout_is_stale() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = utf8(&tmp);
        std::fs::write(dir.join("public.user.sql"), "-- old").unwrap();

        let err = read_seed_dir(&dir).unwrap_err();
        assert!(matches!(err, Error::StaleSeedFormat { .. }));
        assert!(err.to_string().contains("pgseed seed create"));
    }

    #[test]
    fn test_empty_dir_has_no_seed_data() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = utf8(&tmp);
        std::fs::write(dir.join(SCRIPT_FILE), "").unwrap();
        assert!(matches!(read_seed_dir(&dir), Err(Error::NoSeedData { .. })));
        assert!(matches!(
            read_seed_dir(&dir.join("missing")),
            Err(Error::NoSeedData { .. })
        ));
    }

    #[test]
    fn test_legacy_name_detection() {
        assert!(is_legacy_file("public.user.sql"));
        assert!(is_legacy_file("user.csv"));
        assert!(!is_legacy_file("load.sql"));
        assert!(!is_legacy_file("dump.sql"));
        assert!(!is_legacy_file(".load.sql.tmp"));
    }
}
