use camino::Utf8PathBuf;
use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("postgres error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    /// A catalog read failed while dumping one phase of the schema.
    #[error("dumping {phase}")]
    Catalog {
        phase: &'static str,
        #[source]
        source: tokio_postgres::Error,
    },

    /// A statement failed inside a capture or replay transaction.
    #[error("{context}")]
    Query {
        context: String,
        #[source]
        source: tokio_postgres::Error,
    },

    #[error("{path}")]
    Io {
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(
        "seed directory {dir} uses the old per-table layout ({found}); \
         regenerate it with `pgseed seed create <name>`"
    )]
    StaleSeedFormat { dir: Utf8PathBuf, found: String },

    #[error("{path}: {reason}")]
    MalformedSeed { path: Utf8PathBuf, reason: String },

    #[error("no seed data found in {dir}")]
    NoSeedData { dir: Utf8PathBuf },

    #[error("seed data references tables missing from the database: {}", tables.join(", "))]
    UnknownTables { tables: Vec<String> },

    #[error("flatten did not complete; the original migration files are in {backup}")]
    FlattenIncomplete {
        backup: Utf8PathBuf,
        #[source]
        source: Box<Error>,
    },

    #[error(
        "tables {first} and {second} both stage into \"{relname}\" \
         (identifiers are cut to 63 bytes); capture them separately"
    )]
    StagingNameClash {
        first: String,
        second: String,
        relname: String,
    },

    #[error("operation cancelled")]
    Cancelled,
}

impl Error {
    /// Attach a description of what was being attempted to a bare postgres
    /// error. Other variants pass through untouched.
    pub fn context(self, context: impl Into<String>) -> Self {
        match self {
            Error::Postgres(source) => Error::Query {
                context: context.into(),
                source,
            },
            other => other,
        }
    }

    /// Like [`Error::context`], for catalog reads during a schema dump.
    pub fn in_phase(self, phase: &'static str) -> Self {
        match self {
            Error::Postgres(source) => Error::Catalog { phase, source },
            other => other,
        }
    }

    /// Build a closure for `map_err` on filesystem calls.
    pub fn io(path: impl Into<Utf8PathBuf>) -> impl FnOnce(std::io::Error) -> Error {
        let path = path.into();
        move |source| Error::Io { path, source }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}
