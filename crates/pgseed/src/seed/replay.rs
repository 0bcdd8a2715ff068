use tokio_postgres::Client;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::SeedSet;
use crate::order::{resolve_order, reverse_order};
use crate::traced::{Connection, ConnectionExt, TracedConn};
use crate::{Error, Result, TableRef};

/// What a replay loaded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayStats {
    pub tables: usize,
    pub rows: usize,
}

/// Replace the contents of every table in `seeds` with the seeded rows.
///
/// All tables are truncated (dependents first, `CASCADE`) and then loaded in
/// foreign-key order, inside a single transaction: either every table ends up
/// holding exactly its seeded rows or nothing changes.
pub async fn replay(
    client: &mut Client,
    seeds: &SeedSet,
    cancel: &CancellationToken,
) -> Result<ReplayStats> {
    let tables = seeds.tables();
    let order = {
        let conn = client.traced_with(cancel);
        check_tables_exist(&conn, &tables).await?;
        resolve_order(&conn, &tables).await
    };
    debug!(
        order = %order.iter().map(|t| t.to_string()).collect::<Vec<_>>().join(", "),
        "resolved load order"
    );

    let tx = client
        .transaction()
        .await
        .map_err(|e| Error::from(e).context("starting replay transaction"))?;

    let stats = {
        let conn = tx.traced_with(cancel);
        load(&conn, seeds, &order).await?
    };

    tx.commit()
        .await
        .map_err(|e| Error::from(e).context("committing seed data"))?;
    info!(tables = stats.tables, rows = stats.rows, "seed loaded");
    Ok(stats)
}

async fn load<C: Connection>(
    conn: &TracedConn<'_, C>,
    seeds: &SeedSet,
    order: &[TableRef],
) -> Result<ReplayStats> {
    for table in reverse_order(order) {
        let sql = format!("TRUNCATE TABLE {} CASCADE", table.quoted());
        conn.batch_execute(&sql)
            .await
            .map_err(|e| e.context(format!("truncating {table}")))?;
    }

    let mut stats = ReplayStats::default();
    for table in order {
        let Some(artifact) = seeds.get(table) else {
            continue;
        };
        stats.tables += 1;
        if artifact.is_empty() {
            continue;
        }
        conn.batch_execute(&artifact.rows.join("\n"))
            .await
            .map_err(|e| e.context(format!("loading {table}")))?;
        debug!(table = %table, rows = artifact.rows.len(), "loaded");
        stats.rows += artifact.rows.len();
    }
    Ok(stats)
}

/// Fail before touching anything if a seeded table no longer exists.
async fn check_tables_exist<C: Connection>(
    conn: &TracedConn<'_, C>,
    tables: &[TableRef],
) -> Result<()> {
    let sql = "SELECT n.nspname::text, c.relname::text \
               FROM pg_class c \
               JOIN pg_namespace n ON n.oid = c.relnamespace \
               WHERE c.relkind IN ('r', 'p')";
    let mut existing = std::collections::HashSet::new();
    for row in conn.query(sql, &[]).await? {
        existing.insert(TableRef::new(
            row.try_get::<_, String>(0)?,
            row.try_get::<_, String>(1)?,
        ));
    }

    let missing = missing_tables(tables, &existing);
    if missing.is_empty() {
        Ok(())
    } else {
        Err(Error::UnknownTables { tables: missing })
    }
}

fn missing_tables(
    tables: &[TableRef],
    existing: &std::collections::HashSet<TableRef>,
) -> Vec<String> {
    tables
        .iter()
        .filter(|t| !existing.contains(*t))
        .map(|t| t.to_string())
        .collect()
}
