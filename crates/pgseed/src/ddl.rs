//! Schema dumps assembled from live catalog metadata.
//!
//! Every object the catalog reader finds becomes a [`SchemaObject`] tagged
//! with its [`ObjectKind`]. Assembly walks [`ObjectKind::PHASES`] once, so the
//! creation order of the whole dump is decided in exactly one place:
//!
//! ```text
//! schemas, extensions, types, sequences      (nothing references tables yet)
//! PL/pgSQL functions                         (bodies are not validated on create)
//! tables                                     (defaults may call those functions)
//! sequence ownership                         (needs the owning column)
//! SQL functions, views                       (validated; views in dependency order)
//! primary keys, unique, check, foreign keys  (FKs need the referenced PK/unique)
//! indexes, triggers
//! ```

use tokio_postgres::{Client, IsolationLevel};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::catalog::CatalogReader;
use crate::migrations::DEFAULT_LEDGER;
use crate::traced::ConnectionExt;
use crate::{Error, ExcludeSet, Result};

/// Kind of a dumped schema object. Declaration order is creation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ObjectKind {
    Schema,
    Extension,
    Enum,
    Domain,
    Composite,
    Sequence,
    /// Functions and procedures in any language other than `sql`.
    FunctionEarly,
    Table,
    /// `ALTER SEQUENCE ... OWNED BY` for sequences behind `serial` columns.
    SequenceOwner,
    /// `LANGUAGE sql` functions and procedures.
    FunctionLate,
    View,
    PrimaryKey,
    Unique,
    Check,
    ForeignKey,
    Index,
    Trigger,
}

impl ObjectKind {
    /// Every kind, in the order the dump emits them.
    pub const PHASES: [ObjectKind; 17] = [
        ObjectKind::Schema,
        ObjectKind::Extension,
        ObjectKind::Enum,
        ObjectKind::Domain,
        ObjectKind::Composite,
        ObjectKind::Sequence,
        ObjectKind::FunctionEarly,
        ObjectKind::Table,
        ObjectKind::SequenceOwner,
        ObjectKind::FunctionLate,
        ObjectKind::View,
        ObjectKind::PrimaryKey,
        ObjectKind::Unique,
        ObjectKind::Check,
        ObjectKind::ForeignKey,
        ObjectKind::Index,
        ObjectKind::Trigger,
    ];

    /// Section header written above the phase's statements.
    pub fn title(self) -> &'static str {
        match self {
            ObjectKind::Schema => "Schemas",
            ObjectKind::Extension => "Extensions",
            ObjectKind::Enum => "Enum types",
            ObjectKind::Domain => "Domain types",
            ObjectKind::Composite => "Composite types",
            ObjectKind::Sequence => "Sequences",
            ObjectKind::FunctionEarly => "Functions (PL/pgSQL)",
            ObjectKind::Table => "Tables",
            ObjectKind::SequenceOwner => "Sequence ownership",
            ObjectKind::FunctionLate => "Functions (SQL)",
            ObjectKind::View => "Views",
            ObjectKind::PrimaryKey => "Primary keys",
            ObjectKind::Unique => "Unique constraints",
            ObjectKind::Check => "Check constraints",
            ObjectKind::ForeignKey => "Foreign keys",
            ObjectKind::Index => "Indexes",
            ObjectKind::Trigger => "Triggers",
        }
    }

    /// Name of the phase in error messages ("dumping enum types").
    pub fn noun(self) -> &'static str {
        match self {
            ObjectKind::Schema => "schemas",
            ObjectKind::Extension => "extensions",
            ObjectKind::Enum => "enum types",
            ObjectKind::Domain => "domain types",
            ObjectKind::Composite => "composite types",
            ObjectKind::Sequence => "sequences",
            ObjectKind::FunctionEarly => "early functions",
            ObjectKind::Table => "tables",
            ObjectKind::SequenceOwner => "sequence ownership",
            ObjectKind::FunctionLate => "late functions",
            ObjectKind::View => "views",
            ObjectKind::PrimaryKey => "primary keys",
            ObjectKind::Unique => "unique constraints",
            ObjectKind::Check => "check constraints",
            ObjectKind::ForeignKey => "foreign keys",
            ObjectKind::Index => "indexes",
            ObjectKind::Trigger => "triggers",
        }
    }
}

/// One creatable object and the statement that creates it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaObject {
    pub kind: ObjectKind,
    pub schema: String,
    /// Object name; for constraints and triggers, the constraint/trigger name.
    pub name: String,
    /// Complete statement, including the trailing `;`.
    pub definition: String,
}

impl SchemaObject {
    pub fn new(
        kind: ObjectKind,
        schema: impl Into<String>,
        name: impl Into<String>,
        definition: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            schema: schema.into(),
            name: name.into(),
            definition: definition.into(),
        }
    }
}

/// Render objects as one script, phase by phase.
///
/// Objects keep their relative order within a phase. Empty phases produce no
/// output at all; every other phase is a `-- <title>` line, its statements and
/// a blank line.
pub fn assemble(objects: &[SchemaObject]) -> String {
    let mut parts: Vec<String> = Vec::new();
    for kind in ObjectKind::PHASES {
        let mut in_phase = objects.iter().filter(|o| o.kind == kind).peekable();
        if in_phase.peek().is_none() {
            continue;
        }
        parts.push(format!("-- {}", kind.title()));
        parts.extend(in_phase.map(|o| o.definition.clone()));
        parts.push(String::new());
    }
    parts.join("\n")
}

#[derive(Debug, Clone)]
pub struct DumpOptions {
    /// Tables (and their views, constraints, indexes, triggers, owned
    /// sequences) to leave out.
    pub exclude: ExcludeSet,
    /// Ledger table of the migration runner; never part of a dump.
    pub ledger: String,
    pub cancel: CancellationToken,
}

impl Default for DumpOptions {
    fn default() -> Self {
        Self {
            exclude: ExcludeSet::default(),
            ledger: DEFAULT_LEDGER.to_string(),
            cancel: CancellationToken::new(),
        }
    }
}

impl DumpOptions {
    /// The exclusion set with the ledger added.
    pub fn exclusions(&self) -> ExcludeSet {
        self.exclude.clone().with_ledger(&self.ledger)
    }
}

/// Dump the database's schema as an executable DDL script.
///
/// All catalog reads happen in one `REPEATABLE READ, READ ONLY` transaction,
/// so the result reflects a single snapshot even while other sessions keep
/// migrating. Any failing read aborts the dump; nothing partial is returned.
pub async fn dump_schema(client: &mut Client, opts: &DumpOptions) -> Result<String> {
    let tx = client
        .build_transaction()
        .isolation_level(IsolationLevel::RepeatableRead)
        .read_only(true)
        .start()
        .await
        .map_err(|e| Error::from(e).context("starting schema snapshot"))?;

    let exclude = opts.exclusions();
    let objects = {
        let reader = CatalogReader::new(tx.traced_with(&opts.cancel), &exclude);
        let mut objects = Vec::new();
        for kind in ObjectKind::PHASES {
            let found = reader.read(kind).await.map_err(|e| e.in_phase(kind.noun()))?;
            debug!(phase = kind.noun(), count = found.len(), "read catalog phase");
            objects.extend(found);
        }
        objects
    };

    tx.commit()
        .await
        .map_err(|e| Error::from(e).context("closing schema snapshot"))?;

    info!(objects = objects.len(), "dumped schema");
    Ok(assemble(&objects))
}
