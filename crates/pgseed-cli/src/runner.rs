//! The external migration runner.
//!
//! pgseed does not apply migrations itself; `seed apply` hands that to
//! goose around the data load.

use std::process::Output;

use camino::Utf8PathBuf;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("could not run {binary}")]
    Spawn {
        binary: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{binary} {action}` failed ({status}): {output}")]
    Failed {
        binary: String,
        action: &'static str,
        status: String,
        output: String,
    },
}

/// Runs the `goose` binary against a Postgres URL.
#[derive(Debug, Clone)]
pub struct GooseRunner {
    binary: String,
    migrations_dir: Utf8PathBuf,
    database_url: String,
}

impl GooseRunner {
    pub fn new(migrations_dir: impl Into<Utf8PathBuf>, database_url: impl Into<String>) -> Self {
        Self {
            binary: "goose".to_string(),
            migrations_dir: migrations_dir.into(),
            database_url: database_url.into(),
        }
    }

    /// Apply the next pending migration. Having none pending is not an error.
    pub async fn up_by_one(&self) -> Result<(), RunnerError> {
        self.run("up-by-one", true).await
    }

    /// Apply every pending migration.
    pub async fn up(&self) -> Result<(), RunnerError> {
        self.run("up", false).await
    }

    fn command(&self, action: &str) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.arg("-dir")
            .arg(self.migrations_dir.as_str())
            .arg("postgres")
            .arg(&self.database_url)
            .arg(action)
            .kill_on_drop(true);
        cmd
    }

    async fn run(&self, action: &'static str, allow_noop: bool) -> Result<(), RunnerError> {
        info!(action, dir = %self.migrations_dir, "running goose");
        let output = self
            .command(action)
            .output()
            .await
            .map_err(|source| RunnerError::Spawn {
                binary: self.binary.clone(),
                source,
            })?;

        let text = combined_output(&output);
        for line in text.lines() {
            debug!(target: "pgseed::goose", "{line}");
        }

        if output.status.success() {
            return Ok(());
        }
        if allow_noop && is_no_next_version(&text) {
            info!("no pending migration");
            return Ok(());
        }
        Err(RunnerError::Failed {
            binary: self.binary.clone(),
            action,
            status: output.status.to_string(),
            output: text.trim().to_string(),
        })
    }
}

fn combined_output(output: &Output) -> String {
    let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
    text.push_str(&String::from_utf8_lossy(&output.stderr));
    text
}

/// goose exits non-zero from `up-by-one` when everything is applied.
fn is_no_next_version(output: &str) -> bool {
    output.contains("no next version")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_line() {
        let runner = GooseRunner::new("db/migrations", "postgres://localhost/app");
        let cmd = runner.command("up-by-one");
        let args: Vec<_> = cmd
            .as_std()
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(cmd.as_std().get_program(), "goose");
        assert_eq!(
            args,
            ["-dir", "db/migrations", "postgres", "postgres://localhost/app", "up-by-one"]
        );
    }

    #[test]
    fn test_no_next_version_is_recognized() {
        assert!(is_no_next_version(
            "2024/01/01 12:00:00 goose run: no next version found\n"
        ));
        assert!(!is_no_next_version("ERROR 2_users.sql: syntax error"));
    }

    #[tokio::test]
    async fn test_missing_binary_is_a_spawn_error() {
        let mut runner = GooseRunner::new("migrations", "postgres://localhost/app");
        runner.binary = "pgseed-no-such-runner".to_string();
        let err = runner.up().await.unwrap_err();
        assert!(matches!(err, RunnerError::Spawn { .. }), "{err:?}");
    }
}
