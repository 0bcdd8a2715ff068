//! Configuration file handling for pgseed.
//!
//! Looks for `.config/pgseed.toml` in the current directory or any parent
//! directory. Values from the file sit below command-line flags and
//! environment variables (clap fills flags from the environment) and above
//! the built-in defaults.

use camino::{Utf8Path, Utf8PathBuf};
use serde::Deserialize;
use thiserror::Error;

/// Where the config file lives, relative to the project root.
pub const CONFIG_FILE: &str = ".config/pgseed.toml";

const DEFAULT_MIGRATIONS_DIR: &str = "migrations";
const DEFAULT_SEED_DIR: &str = "seed";

/// Contents of `.config/pgseed.toml`. Relative paths are resolved against
/// the project root, the directory holding `.config/`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub database_url: Option<String>,
    pub migrations_dir: Option<String>,
    pub seed_dir: Option<String>,
    pub ledger_table: Option<String>,
    /// Tables left out of dumps, captures and baselines.
    pub exclude: Vec<String>,
}

/// Values given on the command line or through the environment.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub database_url: Option<String>,
    pub migrations_dir: Option<Utf8PathBuf>,
    pub seed_dir: Option<Utf8PathBuf>,
    pub ledger_table: Option<String>,
}

/// Fully resolved settings for one invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    database_url: Option<String>,
    pub migrations_dir: Utf8PathBuf,
    pub seed_dir: Utf8PathBuf,
    pub ledger_table: String,
    pub exclude: Vec<String>,
    /// The config file the settings were read from, if any.
    pub config_path: Option<Utf8PathBuf>,
}

impl Settings {
    /// Merge overrides over an optional config file over the defaults.
    /// `root` is the directory relative file paths are resolved against.
    pub fn resolve(flags: &Overrides, file: Option<(&FileConfig, &Utf8Path)>) -> Self {
        let (file, root) = match file {
            Some((file, root)) => (file.clone(), Some(root)),
            None => (FileConfig::default(), None),
        };
        let from_file = |dir: Option<String>| -> Option<Utf8PathBuf> {
            dir.map(|dir| match root {
                Some(root) if Utf8Path::new(&dir).is_relative() => root.join(dir),
                _ => Utf8PathBuf::from(dir),
            })
        };

        Self {
            database_url: flags.database_url.clone().or(file.database_url),
            migrations_dir: flags
                .migrations_dir
                .clone()
                .or_else(|| from_file(file.migrations_dir))
                .unwrap_or_else(|| DEFAULT_MIGRATIONS_DIR.into()),
            seed_dir: flags
                .seed_dir
                .clone()
                .or_else(|| from_file(file.seed_dir))
                .unwrap_or_else(|| DEFAULT_SEED_DIR.into()),
            ledger_table: flags
                .ledger_table
                .clone()
                .or(file.ledger_table)
                .unwrap_or_else(|| pgseed::DEFAULT_LEDGER.to_string()),
            exclude: file.exclude,
            config_path: None,
        }
    }

    /// The connection URL; only commands that talk to a database need one.
    pub fn database_url(&self) -> Result<&str, ConfigError> {
        self.database_url
            .as_deref()
            .filter(|url| !url.is_empty())
            .ok_or(ConfigError::MissingDatabaseUrl)
    }
}

/// Resolve settings, reading `explicit` or the nearest `.config/pgseed.toml`.
pub fn load(flags: &Overrides, explicit: Option<&Utf8Path>) -> Result<Settings, ConfigError> {
    let config_path = match explicit {
        Some(path) if path.is_file() => Some(path.to_owned()),
        Some(path) => return Err(ConfigError::NotFound(path.to_owned())),
        None => {
            let cwd = std::env::current_dir().map_err(ConfigError::CurrentDir)?;
            let cwd = Utf8PathBuf::try_from(cwd)
                .map_err(|e| ConfigError::CurrentDir(e.into_io_error()))?;
            find_config_file(&cwd)
        }
    };

    let Some(path) = config_path else {
        return Ok(Settings::resolve(flags, None));
    };
    let file = load_file(&path)?;
    let root = project_root(&path);
    let mut settings = Settings::resolve(flags, Some((&file, &root)));
    settings.config_path = Some(path);
    Ok(settings)
}

/// Parse one config file.
pub fn load_file(path: &Utf8Path) -> Result<FileConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_owned(),
        source,
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.to_owned(),
        source,
    })
}

/// Find `.config/pgseed.toml` by searching up the directory tree.
pub fn find_config_file(start: &Utf8Path) -> Option<Utf8PathBuf> {
    start
        .ancestors()
        .map(|dir| dir.join(CONFIG_FILE))
        .find(|candidate| candidate.is_file())
}

/// `<root>/.config/pgseed.toml` resolves against `<root>`; a file anywhere
/// else resolves against its own directory.
fn project_root(config_path: &Utf8Path) -> Utf8PathBuf {
    let dir = config_path.parent().unwrap_or(Utf8Path::new("."));
    match (dir.file_name(), dir.parent()) {
        (Some(".config"), Some(root)) => root.to_owned(),
        _ => dir.to_owned(),
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file {0} does not exist")]
    NotFound(Utf8PathBuf),

    #[error("failed to read {path}")]
    Io {
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}")]
    Parse {
        path: Utf8PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error(
        "database URL required (use --database-url, DATABASE_URL, or database_url in .config/pgseed.toml)"
    )]
    MissingDatabaseUrl,

    #[error("cannot use the current directory")]
    CurrentDir(#[source] std::io::Error),
}
