use std::error::Error as _;

use camino::Utf8PathBuf;
use thiserror::Error;

use crate::config::ConfigError;
use crate::runner::RunnerError;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Pgseed(#[from] pgseed::Error),

    #[error("could not connect to {url}")]
    Connect {
        /// The URL with its password masked.
        url: String,
        #[source]
        source: tokio_postgres::Error,
    },

    #[error(transparent)]
    Runner(#[from] RunnerError),

    #[error("{path}")]
    Io {
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("reading confirmation")]
    Prompt(#[source] std::io::Error),
}

impl CliError {
    /// The error followed by its chain of causes, one per line.
    pub fn format_detailed(&self) -> String {
        let mut out = format!("Error: {self}");
        let mut source = self.source();
        if source.is_some() {
            out.push_str("\n\nCaused by:");
        }
        let mut depth = 0;
        while let Some(err) = source {
            out.push_str(&format!("\n  {depth}: {err}"));
            depth += 1;
            source = err.source();
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_detailed_walks_the_chain() {
        let err = CliError::Io {
            path: "seed/dev/load.sql".into(),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        };
        assert_eq!(
            err.format_detailed(),
            "Error: seed/dev/load.sql\n\nCaused by:\n  0: denied"
        );
    }

    #[test]
    fn test_format_detailed_without_cause() {
        let err = CliError::from(ConfigError::MissingDatabaseUrl);
        assert!(err.format_detailed().starts_with("Error: database URL required"));
        assert!(!err.format_detailed().contains("Caused by"));
    }
}
