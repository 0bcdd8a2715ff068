//! Catalog queries, one per object kind.

use std::collections::HashMap;

use indexmap::IndexMap;
use pgseed_sql::{Ident, quote_ident, quote_literal, quote_qualified};
use tokio_postgres::Row;

use crate::ddl::{ObjectKind, SchemaObject};
use crate::order::{FkEdge, order_tables};
use crate::traced::{Connection, TracedConn};
use crate::{ExcludeSet, Result, TableRef};

/// SQL condition keeping only user schemas for the namespace column `col`.
fn user_schema(col: &str) -> String {
    format!(
        "{col} NOT IN ('pg_catalog', 'information_schema') \
         AND {col} NOT LIKE 'pg_temp%' \
         AND {col} NOT LIKE 'pg_toast%'"
    )
}

/// SQL condition dropping objects that belong to an extension; `oid` is the
/// object's oid column.
fn not_extension_member(oid: &str) -> String {
    format!(
        "NOT EXISTS (SELECT 1 FROM pg_depend d WHERE d.objid = {oid} AND d.deptype = 'e')"
    )
}

/// Reads schema objects of one kind at a time from the catalog.
pub(crate) struct CatalogReader<'a, C: Connection> {
    conn: TracedConn<'a, C>,
    exclude: &'a ExcludeSet,
}

impl<'a, C: Connection> CatalogReader<'a, C> {
    pub(crate) fn new(conn: TracedConn<'a, C>, exclude: &'a ExcludeSet) -> Self {
        Self { conn, exclude }
    }

    pub(crate) async fn read(&self, kind: ObjectKind) -> Result<Vec<SchemaObject>> {
        match kind {
            ObjectKind::Schema => self.schemas().await,
            ObjectKind::Extension => self.extensions().await,
            ObjectKind::Enum => self.enums().await,
            ObjectKind::Domain => self.domains().await,
            ObjectKind::Composite => self.composites().await,
            ObjectKind::Sequence => self.sequences().await,
            ObjectKind::FunctionEarly => self.functions(kind, "l.lanname <> 'sql'").await,
            ObjectKind::Table => self.tables().await,
            ObjectKind::SequenceOwner => self.sequence_owners().await,
            ObjectKind::FunctionLate => self.functions(kind, "l.lanname = 'sql'").await,
            ObjectKind::View => self.views().await,
            ObjectKind::PrimaryKey => self.constraints(kind, 'p').await,
            ObjectKind::Unique => self.constraints(kind, 'u').await,
            ObjectKind::Check => self.constraints(kind, 'c').await,
            ObjectKind::ForeignKey => self.constraints(kind, 'f').await,
            ObjectKind::Index => self.indexes().await,
            ObjectKind::Trigger => self.triggers().await,
        }
    }

    async fn schemas(&self) -> Result<Vec<SchemaObject>> {
        let sql = format!(
            "SELECT nspname::text FROM pg_namespace \
             WHERE {} AND nspname <> 'public' \
             ORDER BY nspname",
            user_schema("nspname")
        );
        let mut out = Vec::new();
        for row in self.conn.query(&sql, &[]).await? {
            let name: String = row.try_get(0)?;
            let def = format!("CREATE SCHEMA {};", Ident(&name));
            out.push(SchemaObject::new(ObjectKind::Schema, &name, &name, def));
        }
        Ok(out)
    }

    async fn extensions(&self) -> Result<Vec<SchemaObject>> {
        let sql = "SELECT e.extname::text, n.nspname::text \
                   FROM pg_extension e \
                   JOIN pg_namespace n ON e.extnamespace = n.oid \
                   WHERE e.extname <> 'plpgsql' \
                   ORDER BY e.extname";
        let mut out = Vec::new();
        for row in self.conn.query(sql, &[]).await? {
            let name: String = row.try_get(0)?;
            let schema: String = row.try_get(1)?;
            let def = format!(
                "CREATE EXTENSION IF NOT EXISTS {} WITH SCHEMA {};",
                Ident(&name),
                Ident(&schema)
            );
            out.push(SchemaObject::new(ObjectKind::Extension, schema, name, def));
        }
        Ok(out)
    }

    async fn enums(&self) -> Result<Vec<SchemaObject>> {
        let sql = format!(
            "SELECT n.nspname::text, t.typname::text, \
                    array_agg(e.enumlabel::text ORDER BY e.enumsortorder) \
             FROM pg_type t \
             JOIN pg_enum e ON t.oid = e.enumtypid \
             JOIN pg_namespace n ON t.typnamespace = n.oid \
             WHERE t.typtype = 'e' AND {} AND {} \
             GROUP BY n.nspname, t.typname \
             ORDER BY n.nspname, t.typname",
            user_schema("n.nspname"),
            not_extension_member("t.oid")
        );
        let mut out = Vec::new();
        for row in self.conn.query(&sql, &[]).await? {
            let schema: String = row.try_get(0)?;
            let name: String = row.try_get(1)?;
            let labels: Vec<String> = row.try_get(2)?;
            let labels: Vec<String> = labels.iter().map(|l| quote_literal(l)).collect();
            let def = format!(
                "CREATE TYPE {} AS ENUM (\n    {}\n);",
                quote_qualified(&schema, &name),
                labels.join(",\n    ")
            );
            out.push(SchemaObject::new(ObjectKind::Enum, schema, name, def));
        }
        Ok(out)
    }

    async fn domains(&self) -> Result<Vec<SchemaObject>> {
        let sql = format!(
            "SELECT n.nspname::text, t.typname::text, \
                    format_type(t.typbasetype, t.typtypmod), \
                    t.typnotnull, t.typdefault, t.oid \
             FROM pg_type t \
             JOIN pg_namespace n ON t.typnamespace = n.oid \
             WHERE t.typtype = 'd' AND {} AND {} \
             ORDER BY n.nspname, t.typname",
            user_schema("n.nspname"),
            not_extension_member("t.oid")
        );
        let constraints_sql = "SELECT pg_get_constraintdef(c.oid, true) \
                               FROM pg_constraint c \
                               WHERE c.contypid = $1 AND c.contype = 'c' \
                               ORDER BY c.conname";

        let mut out = Vec::new();
        for row in self.conn.query(&sql, &[]).await? {
            let schema: String = row.try_get(0)?;
            let name: String = row.try_get(1)?;
            let base_type: String = row.try_get(2)?;
            let not_null: bool = row.try_get(3)?;
            let default: Option<String> = row.try_get(4)?;
            let oid: u32 = row.try_get(5)?;

            let mut def = format!(
                "CREATE DOMAIN {} AS {}",
                quote_qualified(&schema, &name),
                base_type
            );
            if not_null {
                def.push_str(" NOT NULL");
            }
            if let Some(default) = default.filter(|d| !d.is_empty()) {
                def.push_str(" DEFAULT ");
                def.push_str(&default);
            }
            for c in self.conn.query(constraints_sql, &[&oid]).await? {
                let clause: String = c.try_get(0)?;
                def.push_str("\n    ");
                def.push_str(&clause);
            }
            def.push(';');
            out.push(SchemaObject::new(ObjectKind::Domain, schema, name, def));
        }
        Ok(out)
    }

    async fn composites(&self) -> Result<Vec<SchemaObject>> {
        // relkind 'c' leaves out the row types every table and view carries
        let sql = format!(
            "SELECT n.nspname::text, t.typname::text, a.attname::text, \
                    format_type(a.atttypid, a.atttypmod) \
             FROM pg_type t \
             JOIN pg_namespace n ON t.typnamespace = n.oid \
             JOIN pg_class c ON c.oid = t.typrelid \
             JOIN pg_attribute a ON a.attrelid = c.oid \
             WHERE t.typtype = 'c' AND c.relkind = 'c' \
               AND a.attnum > 0 AND NOT a.attisdropped \
               AND {} AND {} \
             ORDER BY n.nspname, t.typname, a.attnum",
            user_schema("n.nspname"),
            not_extension_member("t.oid")
        );
        let mut types: IndexMap<(String, String), Vec<String>> = IndexMap::new();
        for row in self.conn.query(&sql, &[]).await? {
            let schema: String = row.try_get(0)?;
            let name: String = row.try_get(1)?;
            let attr: String = row.try_get(2)?;
            let ty: String = row.try_get(3)?;
            types
                .entry((schema, name))
                .or_default()
                .push(format!("    {} {}", Ident(&attr), ty));
        }
        Ok(types
            .into_iter()
            .map(|((schema, name), attrs)| {
                let def = format!(
                    "CREATE TYPE {} AS (\n{}\n);",
                    quote_qualified(&schema, &name),
                    attrs.join(",\n")
                );
                SchemaObject::new(ObjectKind::Composite, schema, name, def)
            })
            .collect())
    }

    async fn sequences(&self) -> Result<Vec<SchemaObject>> {
        let sql = format!(
            "SELECT s.schemaname::text, s.sequencename::text, \
                    s.start_value, s.increment_by, s.min_value, s.max_value, \
                    s.cache_size, s.cycle, \
                    dep.deptype::text, tn.nspname::text, tc.relname::text \
             FROM pg_sequences s \
             JOIN pg_namespace sn ON sn.nspname = s.schemaname \
             JOIN pg_class sc ON sc.relnamespace = sn.oid AND sc.relname = s.sequencename \
             LEFT JOIN pg_depend dep ON dep.classid = 'pg_class'::regclass \
                  AND dep.objid = sc.oid \
                  AND dep.refclassid = 'pg_class'::regclass \
                  AND dep.deptype IN ('a', 'i') \
             LEFT JOIN pg_class tc ON tc.oid = dep.refobjid \
             LEFT JOIN pg_namespace tn ON tn.oid = tc.relnamespace \
             WHERE {} \
             ORDER BY s.schemaname, s.sequencename",
            user_schema("s.schemaname")
        );
        let mut out = Vec::new();
        for row in self.conn.query(&sql, &[]).await? {
            let schema: String = row.try_get(0)?;
            let name: String = row.try_get(1)?;
            let deptype: Option<String> = row.try_get(8)?;
            let owner_schema: Option<String> = row.try_get(9)?;
            let owner_table: Option<String> = row.try_get(10)?;

            // identity columns recreate their own sequence
            if deptype.as_deref() == Some("i") {
                continue;
            }
            if let (Some(s), Some(t)) = (&owner_schema, &owner_table)
                && self.exclude.contains(s, t)
            {
                continue;
            }

            let params = SequenceParams {
                start: row.try_get(2)?,
                increment: row.try_get(3)?,
                min: row.try_get(4)?,
                max: row.try_get(5)?,
                cache: row.try_get(6)?,
                cycle: row.try_get(7)?,
            };
            let def = params.render(&schema, &name);
            out.push(SchemaObject::new(ObjectKind::Sequence, schema, name, def));
        }
        Ok(out)
    }

    async fn sequence_owners(&self) -> Result<Vec<SchemaObject>> {
        // deptype 'a' is the OWNED BY link; identity sequences use 'i'
        let sql = format!(
            "SELECT sn.nspname::text, sc.relname::text, \
                    tn.nspname::text, tc.relname::text, a.attname::text \
             FROM pg_depend dep \
             JOIN pg_class sc ON sc.oid = dep.objid AND sc.relkind = 'S' \
             JOIN pg_namespace sn ON sn.oid = sc.relnamespace \
             JOIN pg_class tc ON tc.oid = dep.refobjid \
             JOIN pg_namespace tn ON tn.oid = tc.relnamespace \
             JOIN pg_attribute a ON a.attrelid = tc.oid AND a.attnum = dep.refobjsubid \
             WHERE dep.classid = 'pg_class'::regclass \
               AND dep.refclassid = 'pg_class'::regclass \
               AND dep.deptype = 'a' AND {} \
             ORDER BY sn.nspname, sc.relname",
            user_schema("sn.nspname")
        );
        let mut out = Vec::new();
        for row in self.conn.query(&sql, &[]).await? {
            let schema: String = row.try_get(0)?;
            let name: String = row.try_get(1)?;
            let owner = TableRef::new(row.try_get::<_, String>(2)?, row.try_get::<_, String>(3)?);
            let column: String = row.try_get(4)?;
            if self.exclude.contains_table(&owner) {
                continue;
            }
            let def = render_sequence_owner(&schema, &name, &owner, &column);
            out.push(SchemaObject::new(ObjectKind::SequenceOwner, schema, name, def));
        }
        Ok(out)
    }

    async fn functions(&self, kind: ObjectKind, language: &str) -> Result<Vec<SchemaObject>> {
        let sql = format!(
            "SELECT n.nspname::text, p.proname::text, pg_get_functiondef(p.oid) \
             FROM pg_proc p \
             JOIN pg_namespace n ON p.pronamespace = n.oid \
             JOIN pg_language l ON p.prolang = l.oid \
             WHERE p.prokind IN ('f', 'p') AND {language} AND {} AND {} \
             ORDER BY n.nspname, p.proname, p.oid",
            user_schema("n.nspname"),
            not_extension_member("p.oid")
        );
        let mut out = Vec::new();
        for row in self.conn.query(&sql, &[]).await? {
            let schema: String = row.try_get(0)?;
            let name: String = row.try_get(1)?;
            let body: String = row.try_get(2)?;
            out.push(SchemaObject::new(kind, schema, name, format!("{body};")));
        }
        Ok(out)
    }

    async fn tables(&self) -> Result<Vec<SchemaObject>> {
        let tables_sql = format!(
            "SELECT schemaname::text, tablename::text FROM pg_tables \
             WHERE {} ORDER BY schemaname, tablename",
            user_schema("schemaname")
        );
        let generated_sql = format!(
            "SELECT n.nspname::text, c.relname::text, a.attname::text, \
                    pg_get_expr(d.adbin, d.adrelid) \
             FROM pg_attribute a \
             JOIN pg_class c ON c.oid = a.attrelid \
             JOIN pg_namespace n ON n.oid = c.relnamespace \
             JOIN pg_attrdef d ON d.adrelid = a.attrelid AND d.adnum = a.attnum \
             WHERE a.attnum > 0 AND NOT a.attisdropped AND a.attgenerated = 's' AND {}",
            user_schema("n.nspname")
        );
        // information_schema drops the typmod of array elements
        let arrays_sql = format!(
            "SELECT n.nspname::text, c.relname::text, a.attname::text, \
                    format_type(a.atttypid, a.atttypmod) \
             FROM pg_attribute a \
             JOIN pg_class c ON c.oid = a.attrelid \
             JOIN pg_namespace n ON n.oid = c.relnamespace \
             JOIN pg_type t ON t.oid = a.atttypid \
             WHERE a.attnum > 0 AND NOT a.attisdropped AND t.typcategory = 'A' AND {}",
            user_schema("n.nspname")
        );
        // information_schema columns are domain-typed; cast them to plain types
        let columns_sql = format!(
            "SELECT table_schema::text, table_name::text, column_name::text, \
                    data_type::text, character_maximum_length::int4, \
                    is_nullable::text, column_default::text, \
                    udt_schema::text, udt_name::text, \
                    numeric_precision::int4, numeric_scale::int4, \
                    is_identity::text, identity_generation::text, \
                    domain_schema::text, domain_name::text \
             FROM information_schema.columns \
             WHERE {} \
             ORDER BY table_schema, table_name, ordinal_position",
            user_schema("table_schema")
        );

        let mut generated: HashMap<(String, String, String), String> = HashMap::new();
        for row in self.conn.query(&generated_sql, &[]).await? {
            generated.insert(
                (row.try_get(0)?, row.try_get(1)?, row.try_get(2)?),
                row.try_get(3)?,
            );
        }

        let mut arrays: HashMap<(String, String, String), String> = HashMap::new();
        for row in self.conn.query(&arrays_sql, &[]).await? {
            arrays.insert(
                (row.try_get(0)?, row.try_get(1)?, row.try_get(2)?),
                row.try_get(3)?,
            );
        }

        let mut columns: HashMap<(String, String), Vec<ColumnDef>> = HashMap::new();
        for row in self.conn.query(&columns_sql, &[]).await? {
            let schema: String = row.try_get(0)?;
            let table: String = row.try_get(1)?;
            let mut col = ColumnDef::from_row(&row)?;
            let key = (schema.clone(), table.clone(), col.name.clone());
            col.generated = generated.remove(&key);
            col.array_type = arrays.remove(&key);
            columns.entry((schema, table)).or_default().push(col);
        }

        let mut out = Vec::new();
        for row in self.conn.query(&tables_sql, &[]).await? {
            let schema: String = row.try_get(0)?;
            let name: String = row.try_get(1)?;
            if self.exclude.contains(&schema, &name) {
                continue;
            }
            let cols = columns.remove(&(schema.clone(), name.clone())).unwrap_or_default();
            let def = render_table(&schema, &name, &cols);
            out.push(SchemaObject::new(ObjectKind::Table, schema, name, def));
        }
        Ok(out)
    }

    async fn views(&self) -> Result<Vec<SchemaObject>> {
        let sql = format!(
            "SELECT schemaname::text, viewname::text, definition FROM pg_views \
             WHERE {} ORDER BY schemaname, viewname",
            user_schema("schemaname")
        );
        let mut out = Vec::new();
        for row in self.conn.query(&sql, &[]).await? {
            let schema: String = row.try_get(0)?;
            let name: String = row.try_get(1)?;
            if self.exclude.contains(&schema, &name) {
                continue;
            }
            let definition: String = row.try_get(2)?;
            let body = definition.trim_end().trim_end_matches(';');
            let def = format!("CREATE VIEW {} AS\n{body};", quote_qualified(&schema, &name));
            out.push(SchemaObject::new(ObjectKind::View, schema, name, def));
        }

        let edges = self.view_edges().await?;
        Ok(order_views(out, &edges))
    }

    /// `(view, view it selects from)` pairs, read through the views' rewrite
    /// rules.
    async fn view_edges(&self) -> Result<Vec<FkEdge>> {
        let sql = format!(
            "SELECT DISTINCT vn.nspname::text, v.relname::text, rn.nspname::text, r.relname::text \
             FROM pg_rewrite rw \
             JOIN pg_class v ON v.oid = rw.ev_class AND v.relkind = 'v' \
             JOIN pg_namespace vn ON vn.oid = v.relnamespace \
             JOIN pg_depend dep ON dep.classid = 'pg_rewrite'::regclass \
                  AND dep.objid = rw.oid \
                  AND dep.refclassid = 'pg_class'::regclass \
             JOIN pg_class r ON r.oid = dep.refobjid AND r.relkind = 'v' AND r.oid <> v.oid \
             JOIN pg_namespace rn ON rn.oid = r.relnamespace \
             WHERE {}",
            user_schema("vn.nspname")
        );
        let mut edges = Vec::new();
        for row in self.conn.query(&sql, &[]).await? {
            edges.push(FkEdge::new(
                TableRef::new(row.try_get::<_, String>(0)?, row.try_get::<_, String>(1)?),
                TableRef::new(row.try_get::<_, String>(2)?, row.try_get::<_, String>(3)?),
            ));
        }
        Ok(edges)
    }

    async fn constraints(&self, kind: ObjectKind, contype: char) -> Result<Vec<SchemaObject>> {
        let sql = format!(
            "SELECT n.nspname::text, c.relname::text, con.conname::text, \
                    pg_get_constraintdef(con.oid) \
             FROM pg_constraint con \
             JOIN pg_class c ON con.conrelid = c.oid \
             JOIN pg_namespace n ON c.relnamespace = n.oid \
             WHERE con.contype = '{contype}' AND {} \
             ORDER BY n.nspname, c.relname, con.conname",
            user_schema("n.nspname")
        );
        self.table_scoped(&sql, |table, name, body| {
            SchemaObject::new(
                kind,
                &table.0,
                name,
                format!(
                    "ALTER TABLE {} ADD CONSTRAINT {} {body};",
                    quote_qualified(&table.0, &table.1),
                    quote_ident(name)
                ),
            )
        })
        .await
    }

    async fn indexes(&self) -> Result<Vec<SchemaObject>> {
        let sql = format!(
            "SELECT i.schemaname::text, i.tablename::text, i.indexname::text, i.indexdef \
             FROM pg_indexes i \
             WHERE {} \
               AND NOT EXISTS ( \
                   SELECT 1 FROM pg_constraint con \
                   JOIN pg_namespace cn ON cn.oid = con.connamespace \
                   WHERE con.contype IN ('p', 'u', 'x') \
                     AND con.conname = i.indexname \
                     AND cn.nspname = i.schemaname) \
             ORDER BY i.schemaname, i.tablename, i.indexname",
            user_schema("i.schemaname")
        );
        self.table_scoped(&sql, |table, name, body| {
            SchemaObject::new(ObjectKind::Index, &table.0, name, format!("{body};"))
        })
        .await
    }

    async fn triggers(&self) -> Result<Vec<SchemaObject>> {
        let sql = format!(
            "SELECT n.nspname::text, c.relname::text, t.tgname::text, pg_get_triggerdef(t.oid) \
             FROM pg_trigger t \
             JOIN pg_class c ON t.tgrelid = c.oid \
             JOIN pg_namespace n ON c.relnamespace = n.oid \
             WHERE NOT t.tgisinternal AND {} \
             ORDER BY n.nspname, c.relname, t.tgname",
            user_schema("n.nspname")
        );
        self.table_scoped(&sql, |table, name, body| {
            SchemaObject::new(ObjectKind::Trigger, &table.0, name, format!("{body};"))
        })
        .await
    }

    /// Run a query yielding `(schema, table, name, body)` rows, skip excluded
    /// tables, and build an object from each remaining row.
    async fn table_scoped<F>(&self, sql: &str, build: F) -> Result<Vec<SchemaObject>>
    where
        F: Fn(&(String, String), &str, &str) -> SchemaObject,
    {
        let mut out = Vec::new();
        for row in self.conn.query(sql, &[]).await? {
            let table: (String, String) = (row.try_get(0)?, row.try_get(1)?);
            if self.exclude.contains(&table.0, &table.1) {
                continue;
            }
            let name: String = row.try_get(2)?;
            let body: String = row.try_get(3)?;
            out.push(build(&table, &name, &body));
        }
        Ok(out)
    }
}

struct SequenceParams {
    start: Option<i64>,
    increment: Option<i64>,
    min: Option<i64>,
    max: Option<i64>,
    cache: Option<i64>,
    cycle: Option<bool>,
}

impl SequenceParams {
    fn render(&self, schema: &str, name: &str) -> String {
        let mut def = format!("CREATE SEQUENCE {}", quote_qualified(schema, name));
        let clauses = [
            ("START WITH", self.start),
            ("INCREMENT BY", self.increment),
            ("MINVALUE", self.min),
            ("MAXVALUE", self.max),
            ("CACHE", self.cache),
        ];
        for (keyword, value) in clauses {
            if let Some(v) = value {
                def.push_str(&format!(" {keyword} {v}"));
            }
        }
        if self.cycle == Some(true) {
            def.push_str(" CYCLE");
        }
        def.push(';');
        def
    }
}

fn render_sequence_owner(schema: &str, name: &str, owner: &TableRef, column: &str) -> String {
    format!(
        "ALTER SEQUENCE {} OWNED BY {}.{};",
        quote_qualified(schema, name),
        quote_qualified(&owner.schema, &owner.name),
        Ident(column)
    )
}

/// Put every view after the views it selects from. Views are ordered like
/// tables under foreign keys, so unrelated views stay sorted by name.
pub(crate) fn order_views(views: Vec<SchemaObject>, edges: &[FkEdge]) -> Vec<SchemaObject> {
    let refs: Vec<TableRef> = views
        .iter()
        .map(|v| TableRef::new(v.schema.as_str(), v.name.as_str()))
        .collect();
    let mut by_ref: HashMap<TableRef, SchemaObject> = refs.iter().cloned().zip(views).collect();
    order_tables(&refs, edges)
        .iter()
        .filter_map(|r| by_ref.remove(r))
        .collect()
}

/// One column as `information_schema.columns` describes it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct ColumnDef {
    pub name: String,
    pub data_type: String,
    pub char_max_len: Option<i32>,
    pub nullable: bool,
    pub default: Option<String>,
    pub udt_schema: String,
    pub udt_name: String,
    pub numeric_precision: Option<i32>,
    pub numeric_scale: Option<i32>,
    /// `ALWAYS` or `BY DEFAULT` for identity columns.
    pub identity: Option<String>,
    /// Expression of a stored generated column.
    pub generated: Option<String>,
    /// `(schema, name)` when the column is declared with a domain type.
    pub domain: Option<(String, String)>,
    /// `format_type` of an array column, element typmod included.
    pub array_type: Option<String>,
}

impl ColumnDef {
    /// Build from a `columns_sql` row; columns 2.. hold the column fields.
    fn from_row(row: &Row) -> Result<Self> {
        let is_nullable: String = row.try_get(5)?;
        let is_identity: Option<String> = row.try_get(11)?;
        let identity_generation: Option<String> = row.try_get(12)?;
        let domain_schema: Option<String> = row.try_get(13)?;
        let domain_name: Option<String> = row.try_get(14)?;
        Ok(Self {
            name: row.try_get(2)?,
            data_type: row.try_get(3)?,
            char_max_len: row.try_get(4)?,
            nullable: is_nullable != "NO",
            default: row.try_get(6)?,
            udt_schema: row.try_get(7)?,
            udt_name: row.try_get(8)?,
            numeric_precision: row.try_get(9)?,
            numeric_scale: row.try_get(10)?,
            identity: identity_generation.filter(|_| is_identity.as_deref() == Some("YES")),
            generated: None,
            domain: domain_schema.zip(domain_name),
            array_type: None,
        })
    }

    /// The column's type as it should appear in `CREATE TABLE`.
    pub fn render_type(&self) -> String {
        // data_type reports a domain's base type
        if let Some((schema, name)) = &self.domain {
            return match schema.as_str() {
                "public" => quote_ident(name),
                schema => quote_qualified(schema, name),
            };
        }
        match self.data_type.as_str() {
            "character varying" => match self.char_max_len {
                Some(n) => format!("varchar({n})"),
                None => "varchar".to_string(),
            },
            "character" => match self.char_max_len {
                Some(n) => format!("char({n})"),
                None => "char".to_string(),
            },
            "bit" | "bit varying" => match self.char_max_len {
                Some(n) => format!("{}({n})", self.data_type),
                None => self.data_type.clone(),
            },
            "numeric" => match (self.numeric_precision, self.numeric_scale) {
                (Some(p), Some(s)) => format!("numeric({p},{s})"),
                (Some(p), None) => format!("numeric({p})"),
                _ => "numeric".to_string(),
            },
            "ARRAY" => match &self.array_type {
                Some(ty) => ty.clone(),
                None => {
                    // udt_name of an array type is its element type prefixed by `_`
                    let elem = self.udt_name.strip_prefix('_').unwrap_or(&self.udt_name);
                    format!("{}[]", self.user_type(elem))
                }
            },
            "USER-DEFINED" => self.user_type(&self.udt_name),
            other => other.to_string(),
        }
    }

    fn user_type(&self, name: &str) -> String {
        match self.udt_schema.as_str() {
            "public" | "pg_catalog" => quote_ident(name),
            schema => quote_qualified(schema, name),
        }
    }

    /// Full column definition line, without indentation.
    pub fn render(&self) -> String {
        let mut def = format!("{} {}", Ident(&self.name), self.render_type());
        if let Some(expr) = &self.generated {
            def.push_str(&format!(" GENERATED ALWAYS AS ({expr}) STORED"));
            if !self.nullable {
                def.push_str(" NOT NULL");
            }
        } else if let Some(generation) = &self.identity {
            def.push_str(&format!(" GENERATED {generation} AS IDENTITY"));
        } else {
            if !self.nullable {
                def.push_str(" NOT NULL");
            }
            if let Some(default) = self.default.as_deref().filter(|d| !d.is_empty()) {
                def.push_str(" DEFAULT ");
                def.push_str(default);
            }
        }
        def
    }
}

pub(crate) fn render_table(schema: &str, name: &str, columns: &[ColumnDef]) -> String {
    if columns.is_empty() {
        return format!("CREATE TABLE {} ();", quote_qualified(schema, name));
    }
    let cols: Vec<String> = columns.iter().map(ColumnDef::render).collect();
    format!(
        "CREATE TABLE {} (\n    {}\n);",
        quote_qualified(schema, name),
        cols.join(",\n    ")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn col(name: &str, data_type: &str) -> ColumnDef {
        ColumnDef {
            name: name.to_string(),
            data_type: data_type.to_string(),
            nullable: true,
            udt_schema: "pg_catalog".to_string(),
            ..Default::default()
        }
    }

    // ==================== Column Type Tests ====================

    #[test]
    fn test_varchar_and_char_lengths() {
        let mut c = col("email", "character varying");
        assert_eq!(c.render_type(), "varchar");
        c.char_max_len = Some(255);
        assert_eq!(c.render_type(), "varchar(255)");

        let mut c = col("code", "character");
        c.char_max_len = Some(2);
        assert_eq!(c.render_type(), "char(2)");
    }

    #[test]
    fn test_numeric_precision_and_scale() {
        let mut c = col("price", "numeric");
        assert_eq!(c.render_type(), "numeric");
        c.numeric_precision = Some(10);
        assert_eq!(c.render_type(), "numeric(10)");
        c.numeric_scale = Some(2);
        assert_eq!(c.render_type(), "numeric(10,2)");
    }

    #[test]
    fn test_array_uses_element_name() {
        let mut c = col("tags", "ARRAY");
        c.udt_name = "_text".to_string();
        assert_eq!(c.render_type(), "\"text\"[]");

        c.udt_schema = "app".to_string();
        c.udt_name = "_mood".to_string();
        assert_eq!(c.render_type(), "\"app\".\"mood\"[]");
    }

    #[test]
    fn test_array_keeps_element_typmod() {
        let mut c = col("seen_at", "ARRAY");
        c.udt_name = "_timestamp".to_string();
        c.array_type = Some("timestamp(3) without time zone[]".to_string());
        assert_eq!(c.render_type(), "timestamp(3) without time zone[]");

        c.array_type = Some("numeric(10,2)[]".to_string());
        assert_eq!(c.render_type(), "numeric(10,2)[]");
    }

    #[test]
    fn test_user_defined_is_qualified_outside_public() {
        let mut c = col("status", "USER-DEFINED");
        c.udt_schema = "public".to_string();
        c.udt_name = "mood".to_string();
        assert_eq!(c.render_type(), "\"mood\"");

        c.udt_schema = "billing".to_string();
        c.udt_name = "currency".to_string();
        assert_eq!(c.render_type(), "\"billing\".\"currency\"");
    }

    #[test]
    fn test_domain_wins_over_base_type() {
        let mut c = col("email", "text");
        c.domain = Some(("app".to_string(), "email".to_string()));
        assert_eq!(c.render_type(), "\"app\".\"email\"");
        c.domain = Some(("public".to_string(), "email".to_string()));
        assert_eq!(c.render_type(), "\"email\"");
    }

    #[test]
    fn test_other_types_pass_through() {
        assert_eq!(col("at", "timestamp with time zone").render_type(), "timestamp with time zone");
        assert_eq!(col("n", "integer").render_type(), "integer");
    }

    // ==================== Column Definition Tests ====================

    #[test]
    fn test_not_null_and_default() {
        let mut c = col("id", "integer");
        c.nullable = false;
        c.default = Some("nextval('user_id_seq'::regclass)".to_string());
        assert_eq!(
            c.render(),
            "\"id\" integer NOT NULL DEFAULT nextval('user_id_seq'::regclass)"
        );
    }

    #[test]
    fn test_generated_column_never_has_default() {
        let mut c = col("total", "numeric");
        c.nullable = false;
        c.default = Some("0".to_string());
        c.generated = Some("(price * qty)".to_string());
        assert_eq!(
            c.render(),
            "\"total\" numeric GENERATED ALWAYS AS ((price * qty)) STORED NOT NULL"
        );
    }

    #[test]
    fn test_identity_column() {
        let mut c = col("id", "bigint");
        c.nullable = false;
        c.identity = Some("BY DEFAULT".to_string());
        assert_eq!(c.render(), "\"id\" bigint GENERATED BY DEFAULT AS IDENTITY");
    }

    #[test]
    fn test_render_table() {
        let mut id = col("id", "integer");
        id.nullable = false;
        let name = col("name", "text");
        insta::assert_snapshot!(render_table("public", "user", &[id, name]), @r#"
        CREATE TABLE "public"."user" (
            "id" integer NOT NULL,
            "name" text
        );
        "#);
        assert_eq!(render_table("app", "empty", &[]), "CREATE TABLE \"app\".\"empty\" ();");
    }

    // ==================== Sequence Tests ====================

    #[test]
    fn test_sequence_clauses() {
        let params = SequenceParams {
            start: Some(1),
            increment: Some(1),
            min: Some(1),
            max: Some(i64::MAX),
            cache: Some(1),
            cycle: Some(false),
        };
        assert_eq!(
            params.render("public", "order_no"),
            "CREATE SEQUENCE \"public\".\"order_no\" START WITH 1 INCREMENT BY 1 \
             MINVALUE 1 MAXVALUE 9223372036854775807 CACHE 1;"
        );

        let params = SequenceParams {
            start: Some(10),
            increment: Some(-1),
            min: None,
            max: None,
            cache: None,
            cycle: Some(true),
        };
        assert_eq!(
            params.render("app", "countdown"),
            "CREATE SEQUENCE \"app\".\"countdown\" START WITH 10 INCREMENT BY -1 CYCLE;"
        );
    }

    #[test]
    fn test_sequence_owner() {
        let owner = TableRef::new("public", "user");
        assert_eq!(
            render_sequence_owner("public", "user_id_seq", &owner, "id"),
            "ALTER SEQUENCE \"public\".\"user_id_seq\" OWNED BY \"public\".\"user\".\"id\";"
        );
    }

    // ==================== View Order Tests ====================

    fn view(name: &str, from: &str) -> SchemaObject {
        SchemaObject::new(
            ObjectKind::View,
            "public",
            name,
            format!("CREATE VIEW \"public\".\"{name}\" AS\n SELECT * FROM {from};"),
        )
    }

    #[test]
    fn test_view_follows_the_view_it_reads() {
        let views = vec![
            view("a_summary", "b_detail"),
            view("b_detail", "c_base"),
            view("c_base", "orders"),
            view("d_other", "orders"),
        ];
        let edges = vec![
            FkEdge::new(TableRef::new("public", "a_summary"), TableRef::new("public", "b_detail")),
            FkEdge::new(TableRef::new("public", "b_detail"), TableRef::new("public", "c_base")),
        ];

        let ordered = order_views(views, &edges);
        insta::assert_snapshot!(crate::ddl::assemble(&ordered), @r#"
        -- Views
        CREATE VIEW "public"."c_base" AS
         SELECT * FROM orders;
        CREATE VIEW "public"."b_detail" AS
         SELECT * FROM c_base;
        CREATE VIEW "public"."a_summary" AS
         SELECT * FROM b_detail;
        CREATE VIEW "public"."d_other" AS
         SELECT * FROM orders;
        "#);
    }

    #[test]
    fn test_unrelated_views_stay_sorted() {
        let views = vec![view("a", "t"), view("b", "t")];
        let names: Vec<_> = order_views(views, &[]).into_iter().map(|v| v.name).collect();
        assert_eq!(names, ["a", "b"]);
    }
}
