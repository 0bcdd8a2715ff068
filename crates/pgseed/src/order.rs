//! Foreign-key dependency ordering for seed loading.
//!
//! Loading must insert referenced tables before the tables pointing at them,
//! and truncation runs the other way around. The counter kept per table is
//! the number of *distinct tables it depends on* (outgoing FK edges), not the
//! number of tables depending on it; getting that backwards silently inverts
//! the order for every chain longer than one edge.

use std::collections::{BTreeMap, HashMap, HashSet};

use indexmap::IndexSet;
use tracing::warn;

use crate::traced::{Connection, TracedConn};
use crate::{Result, TableRef};

/// `dependent` has a foreign key referencing `referenced`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FkEdge {
    pub dependent: TableRef,
    pub referenced: TableRef,
}

impl FkEdge {
    pub fn new(dependent: TableRef, referenced: TableRef) -> Self {
        Self {
            dependent,
            referenced,
        }
    }
}

/// Order tables so that every table comes after all tables it references.
///
/// Kahn's algorithm with a ready set sorted by `schema.table`, which makes the
/// result a pure function of its inputs. Edges naming tables outside `tables`
/// and self-references are ignored. If a cycle leaves tables unordered, they
/// are appended in their input order. Every input table appears exactly once;
/// duplicates collapse to their first occurrence.
pub fn order_tables(tables: &[TableRef], edges: &[FkEdge]) -> Vec<TableRef> {
    let tables: IndexSet<&TableRef> = tables.iter().collect();

    // table -> distinct in-set tables it references
    let mut depends_on: HashMap<&TableRef, HashSet<&TableRef>> =
        tables.iter().map(|t| (*t, HashSet::new())).collect();
    for edge in edges {
        if edge.dependent == edge.referenced {
            continue;
        }
        let (Some(dependent), Some(referenced)) =
            (tables.get(&edge.dependent), tables.get(&edge.referenced))
        else {
            continue;
        };
        if let Some(deps) = depends_on.get_mut(dependent) {
            deps.insert(*referenced);
        }
    }

    // referenced -> its dependents
    let mut dependents: HashMap<&TableRef, Vec<&TableRef>> = HashMap::new();
    for (dependent, deps) in &depends_on {
        for referenced in deps {
            dependents.entry(*referenced).or_default().push(*dependent);
        }
    }

    let mut remaining: HashMap<&TableRef, usize> =
        depends_on.iter().map(|(t, deps)| (*t, deps.len())).collect();

    let mut ready: BTreeMap<String, &TableRef> = tables
        .iter()
        .filter(|t| remaining.get(*t) == Some(&0))
        .map(|t| (t.to_string(), *t))
        .collect();

    let mut ordered: Vec<TableRef> = Vec::with_capacity(tables.len());
    while let Some((_, table)) = ready.pop_first() {
        ordered.push(table.clone());
        for dependent in dependents.get(table).into_iter().flatten() {
            if let Some(count) = remaining.get_mut(dependent) {
                *count -= 1;
                if *count == 0 {
                    ready.insert(dependent.to_string(), *dependent);
                }
            }
        }
    }

    if ordered.len() < tables.len() {
        let placed: HashSet<TableRef> = ordered.iter().cloned().collect();
        let stuck: Vec<&TableRef> = tables.iter().copied().filter(|t| !placed.contains(*t)).collect();
        warn!(
            tables = %stuck.iter().map(|t| t.to_string()).collect::<Vec<_>>().join(", "),
            "foreign keys form a cycle; appending in input order"
        );
        ordered.extend(stuck.into_iter().cloned());
    }

    ordered
}

/// Truncation order: dependents before the tables they reference.
pub fn reverse_order(order: &[TableRef]) -> Vec<TableRef> {
    order.iter().rev().cloned().collect()
}

/// Read every foreign-key edge in the database.
pub async fn fetch_fk_edges<C: Connection>(conn: &TracedConn<'_, C>) -> Result<Vec<FkEdge>> {
    let sql = "SELECT DISTINCT dn.nspname::text, dc.relname::text, rn.nspname::text, rc.relname::text \
               FROM pg_constraint con \
               JOIN pg_class dc ON dc.oid = con.conrelid \
               JOIN pg_namespace dn ON dn.oid = dc.relnamespace \
               JOIN pg_class rc ON rc.oid = con.confrelid \
               JOIN pg_namespace rn ON rn.oid = rc.relnamespace \
               WHERE con.contype = 'f'";
    let mut edges = Vec::new();
    for row in conn.query(sql, &[]).await? {
        edges.push(FkEdge::new(
            TableRef::new(row.try_get::<_, String>(0)?, row.try_get::<_, String>(1)?),
            TableRef::new(row.try_get::<_, String>(2)?, row.try_get::<_, String>(3)?),
        ));
    }
    Ok(edges)
}

/// Order `tables` using the database's foreign keys.
///
/// If the edges cannot be read, the tables are returned in input order; a
/// load may then fail on a constraint, which is reported at that point.
pub async fn resolve_order<C: Connection>(
    conn: &TracedConn<'_, C>,
    tables: &[TableRef],
) -> Vec<TableRef> {
    match fetch_fk_edges(conn).await {
        Ok(edges) => order_tables(tables, &edges),
        Err(e) => {
            warn!(error = %e, "could not read foreign keys; loading in input order");
            let unique: IndexSet<&TableRef> = tables.iter().collect();
            unique.into_iter().cloned().collect()
        }
    }
}
