use std::collections::HashMap;

use camino::Utf8PathBuf;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use pgseed_sql::{Ident, TypeKind, Value, serialize_kind};
use tokio_postgres::{Client, Row};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::{SeedArtifact, SeedSet};
use crate::traced::{Connection, ConnectionExt, TracedConn};
use crate::{Error, ExcludeSet, Result, TableRef};

/// Which tables a capture considers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableFilter {
    /// Tables in these schemas.
    Schemas(Vec<String>),
    /// Tables in every non-system schema.
    AllSchemas,
}

impl Default for TableFilter {
    fn default() -> Self {
        TableFilter::Schemas(vec!["public".to_string()])
    }
}

/// List the base tables matching `filter`, minus `exclude`, sorted by
/// schema and name.
pub async fn list_tables<C: Connection>(
    conn: &TracedConn<'_, C>,
    filter: &TableFilter,
    exclude: &ExcludeSet,
) -> Result<Vec<TableRef>> {
    let base = "SELECT schemaname::text, tablename::text FROM pg_tables \
                WHERE schemaname NOT IN ('pg_catalog', 'information_schema') \
                  AND schemaname NOT LIKE 'pg_temp%' \
                  AND schemaname NOT LIKE 'pg_toast%'";
    let rows = match filter {
        TableFilter::AllSchemas => {
            let sql = format!("{base} ORDER BY schemaname, tablename");
            conn.query(&sql, &[]).await?
        }
        TableFilter::Schemas(schemas) => {
            let sql = format!("{base} AND schemaname = ANY($1) ORDER BY schemaname, tablename");
            conn.query(&sql, &[schemas]).await?
        }
    };

    let mut tables = Vec::with_capacity(rows.len());
    for row in rows {
        let table = TableRef::new(row.try_get::<_, String>(0)?, row.try_get::<_, String>(1)?);
        if !exclude.contains_table(&table) {
            tables.push(table);
        }
    }
    Ok(tables)
}

#[derive(Debug, Clone, Default)]
pub struct CaptureOptions {
    /// Tables to stage and export; each yields exactly one artifact.
    pub tables: Vec<TableRef>,
    /// Population script that fills the staging tables. A missing file is
    /// reported and the capture continues with empty staging tables.
    pub script: Option<Utf8PathBuf>,
    pub cancel: CancellationToken,
}

/// Capture seed data.
///
/// Each table gets an empty temp copy named `"seed.<schema>.<table>"`, the
/// population script fills those copies (typically with `INSERT INTO
/// "seed.public.user" SELECT ... FROM public.user WHERE ...`), and whatever
/// the copies hold afterwards becomes the seed.
///
/// Everything runs in one transaction that is rolled back on every path,
/// success included, so neither the staging tables nor any side effect of the
/// script outlive the call.
pub async fn capture(client: &mut Client, opts: &CaptureOptions) -> Result<SeedSet> {
    let tx = client
        .transaction()
        .await
        .map_err(|e| Error::from(e).context("starting capture transaction"))?;

    let result = capture_in(&tx, opts).await;

    if matches!(result, Err(Error::Cancelled)) {
        // The server was already told to abort; dropping queues the rollback.
        drop(tx);
    } else if let Err(e) = tx.rollback().await {
        warn!(error = %e, "rolling back capture transaction failed");
    }
    result
}

async fn capture_in<C: Connection>(tx: &C, opts: &CaptureOptions) -> Result<SeedSet> {
    let conn = tx.traced_with(&opts.cancel);

    // Temporal values are parsed back from their text form below.
    conn.batch_execute("SET LOCAL DateStyle = 'ISO, YMD'")
        .await
        .map_err(|e| e.context("setting DateStyle"))?;

    check_staging_names(&opts.tables)?;
    for table in &opts.tables {
        let sql = format!(
            "CREATE TEMP TABLE {} (LIKE {} INCLUDING ALL)",
            table.staging_name(),
            table.quoted()
        );
        conn.batch_execute(&sql)
            .await
            .map_err(|e| e.context(format!("creating staging table for {table}")))?;
    }

    if let Some(path) = &opts.script {
        match std::fs::read_to_string(path) {
            Ok(script) => {
                conn.batch_execute(&script)
                    .await
                    .map_err(|e| e.context(format!("running population script {path}")))?;
                info!(script = %path, "ran population script");
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(script = %path, "population script not found; exporting empty staging tables");
            }
            Err(e) => return Err(Error::io(path)(e)),
        }
    }

    let mut artifacts = Vec::with_capacity(opts.tables.len());
    for table in &opts.tables {
        match export_table(&conn, table)
            .await
            .map_err(|e| e.context(format!("exporting {table}")))?
        {
            Some(artifact) => {
                info!(table = %table, rows = artifact.rows.len(), "exported");
                artifacts.push(artifact);
            }
            None => warn!(table = %table, "no insertable columns in staging table; skipping"),
        }
    }
    Ok(SeedSet::new(artifacts))
}

/// Long table names can cut down to the same staging name; catch that before
/// Postgres reports it as an existing relation.
fn check_staging_names(tables: &[TableRef]) -> Result<()> {
    let mut seen: HashMap<String, &TableRef> = HashMap::with_capacity(tables.len());
    for table in tables {
        let relname = table.staging_relname();
        if let Some(first) = seen.get(&relname)
            && *first != table
        {
            return Err(Error::StagingNameClash {
                first: first.to_string(),
                second: table.to_string(),
                relname,
            });
        }
        seen.insert(relname, table);
    }
    Ok(())
}

/// A column of a staging table.
#[derive(Debug, Clone, PartialEq, Eq)]
struct StagedColumn {
    name: String,
    pg_type: String,
    /// `GENERATED ALWAYS AS IDENTITY`; inserting needs `OVERRIDING SYSTEM VALUE`.
    identity_always: bool,
}

impl StagedColumn {
    fn kind(&self) -> TypeKind {
        TypeKind::of(&self.pg_type)
    }

    /// Select expression: natively decoded where the wire type maps onto a
    /// `Value` variant, text otherwise.
    fn projection(&self) -> String {
        let col = Ident(&self.name);
        match self.kind() {
            TypeKind::Boolean | TypeKind::Binary => col.to_string(),
            TypeKind::Integer => format!("{col}::int8"),
            _ => format!("{col}::text"),
        }
    }
}

async fn export_table<C: Connection>(
    conn: &TracedConn<'_, C>,
    table: &TableRef,
) -> Result<Option<SeedArtifact>> {
    // Generated columns cannot be inserted into and are left out.
    let columns_sql = "SELECT a.attname::text, format_type(a.atttypid, a.atttypmod), \
                              a.attidentity = 'a' \
                       FROM pg_attribute a \
                       JOIN pg_class c ON c.oid = a.attrelid \
                       WHERE c.relnamespace = pg_my_temp_schema() \
                         AND c.relname = $1 \
                         AND a.attnum > 0 \
                         AND NOT a.attisdropped \
                         AND a.attgenerated <> 's' \
                       ORDER BY a.attnum";
    let relname = table.staging_relname();
    let mut columns = Vec::new();
    for row in conn.query(columns_sql, &[&relname]).await? {
        columns.push(StagedColumn {
            name: row.try_get(0)?,
            pg_type: row.try_get(1)?,
            identity_always: row.try_get(2)?,
        });
    }
    if columns.is_empty() {
        return Ok(None);
    }

    let projections: Vec<String> = columns.iter().map(StagedColumn::projection).collect();
    let select = format!(
        "SELECT {} FROM {} ORDER BY 1",
        projections.join(", "),
        table.staging_name()
    );

    let kinds: Vec<TypeKind> = columns.iter().map(StagedColumn::kind).collect();
    let prefix = insert_prefix(table, &columns);
    let mut rows = Vec::new();
    for row in conn.query(&select, &[]).await? {
        let mut literals = Vec::with_capacity(kinds.len());
        for (i, kind) in kinds.iter().enumerate() {
            literals.push(serialize_kind(&read_value(&row, i, *kind)?, *kind));
        }
        rows.push(format!("{prefix} VALUES ({});", literals.join(", ")));
    }
    Ok(Some(SeedArtifact::new(table.clone(), rows)))
}

fn insert_prefix(table: &TableRef, columns: &[StagedColumn]) -> String {
    let names: Vec<String> = columns.iter().map(|c| Ident(&c.name).to_string()).collect();
    let overriding = if columns.iter().any(|c| c.identity_always) {
        " OVERRIDING SYSTEM VALUE"
    } else {
        ""
    };
    format!(
        "INSERT INTO {} ({}){overriding}",
        table.quoted(),
        names.join(", ")
    )
}

fn read_value(row: &Row, idx: usize, kind: TypeKind) -> Result<Value> {
    Ok(match kind {
        TypeKind::Boolean => row.try_get::<_, Option<bool>>(idx)?.into(),
        TypeKind::Integer => row.try_get::<_, Option<i64>>(idx)?.into(),
        TypeKind::Binary => row.try_get::<_, Option<Vec<u8>>>(idx)?.into(),
        kind => match row.try_get::<_, Option<String>>(idx)? {
            None => Value::Null,
            Some(text) if kind.is_temporal() => parse_temporal(kind, text),
            Some(text) => Value::Text(text),
        },
    })
}

/// Parse ISO-style temporal text back into a typed value. Anything chrono
/// can't represent (`infinity`, BC dates, `24:00:00`) stays as text.
fn parse_temporal(kind: TypeKind, text: String) -> Value {
    let parsed = match kind {
        TypeKind::Timestamp => NaiveDateTime::parse_from_str(&text, "%Y-%m-%d %H:%M:%S%.f")
            .ok()
            .map(Value::Timestamp),
        TypeKind::TimestampTz => DateTime::parse_from_str(&text, "%Y-%m-%d %H:%M:%S%.f%#z")
            .ok()
            .map(Value::TimestampTz),
        TypeKind::Date => NaiveDate::parse_from_str(&text, "%Y-%m-%d")
            .ok()
            .map(Value::Date),
        TypeKind::Time => NaiveTime::parse_from_str(&text, "%H:%M:%S%.f")
            .ok()
            .map(Value::Time),
        TypeKind::TimeTz => parse_timetz(&text).map(|(t, off)| Value::TimeTz(t, off)),
        _ => None,
    };
    parsed.unwrap_or(Value::Text(text))
}

/// `HH:MM:SS[.f]±HH[:MM[:SS]]`
fn parse_timetz(text: &str) -> Option<(NaiveTime, FixedOffset)> {
    let split = text.rfind(['+', '-'])?;
    let time = NaiveTime::parse_from_str(&text[..split], "%H:%M:%S%.f").ok()?;
    let sign = if text[split..].starts_with('-') { -1 } else { 1 };

    let mut secs = 0i32;
    for (part, unit) in text[split + 1..].split(':').zip([3600, 60, 1]) {
        if part.len() != 2 {
            return None;
        }
        secs += part.parse::<i32>().ok()? * unit;
    }
    Some((time, FixedOffset::east_opt(sign * secs)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn column(name: &str, pg_type: &str) -> StagedColumn {
        StagedColumn {
            name: name.to_string(),
            pg_type: pg_type.to_string(),
            identity_always: false,
        }
    }

    #[test]
    fn test_projection_per_kind() {
        assert_eq!(column("ok", "boolean").projection(), "\"ok\"");
        assert_eq!(column("id", "integer").projection(), "\"id\"::int8");
        assert_eq!(column("blob", "bytea").projection(), "\"blob\"");
        assert_eq!(column("at", "timestamp with time zone").projection(), "\"at\"::text");
        assert_eq!(column("tags", "text[]").projection(), "\"tags\"::text");
    }

    #[test]
    fn test_staging_name_clash_is_reported() {
        let prefix = "a".repeat(55);
        let tables = [
            TableRef::new("public", format!("{prefix}_first")),
            TableRef::new("public", format!("{prefix}_second")),
        ];
        let err = check_staging_names(&tables).unwrap_err();
        assert!(matches!(err, Error::StagingNameClash { .. }), "{err:?}");
        assert!(err.to_string().contains("_second"), "{err}");

        let distinct = [TableRef::new("public", "user"), TableRef::new("app", "user")];
        check_staging_names(&distinct).unwrap();
    }

    #[test]
    fn test_insert_prefix() {
        let table = TableRef::new("public", "user");
        let cols = [column("id", "integer"), column("name", "text")];
        assert_eq!(
            insert_prefix(&table, &cols),
            r#"INSERT INTO "public"."user" ("id", "name")"#
        );

        let mut id = column("id", "bigint");
        id.identity_always = true;
        assert_eq!(
            insert_prefix(&table, &[id]),
            r#"INSERT INTO "public"."user" ("id") OVERRIDING SYSTEM VALUE"#
        );
    }

    #[test]
    fn test_parse_temporal_values() {
        let v = parse_temporal(TypeKind::Timestamp, "2024-03-09 07:05:01.12".to_string());
        assert_eq!(serialize_kind(&v, TypeKind::Timestamp), "'2024-03-09 07:05:01.12'");

        let v = parse_temporal(TypeKind::TimestampTz, "2024-03-09 07:05:01+00".to_string());
        assert!(matches!(v, Value::TimestampTz(_)));
        assert_eq!(
            serialize_kind(&v, TypeKind::TimestampTz),
            "'2024-03-09 07:05:01+00:00'"
        );

        let v = parse_temporal(TypeKind::Date, "1999-12-31".to_string());
        assert_eq!(v, Value::Date(NaiveDate::from_ymd_opt(1999, 12, 31).unwrap()));
    }

    #[test]
    fn test_unrepresentable_temporal_stays_text() {
        for (kind, text) in [
            (TypeKind::TimestampTz, "infinity"),
            (TypeKind::Date, "0044-03-15 BC"),
            (TypeKind::Time, "24:00:00"),
        ] {
            assert_eq!(parse_temporal(kind, text.to_string()), Value::Text(text.to_string()));
        }
    }

    #[test]
    fn test_parse_timetz() {
        let (t, off) = parse_timetz("08:30:00.5+05:30").unwrap();
        assert_eq!(t, NaiveTime::from_hms_milli_opt(8, 30, 0, 500).unwrap());
        assert_eq!(off.local_minus_utc(), 5 * 3600 + 30 * 60);

        let (_, off) = parse_timetz("23:00:00-08").unwrap();
        assert_eq!(off.local_minus_utc(), -8 * 3600);

        assert!(parse_timetz("nonsense").is_none());
    }
}
