//! Clones repositories by running one `&&`-chained shell command, so the
//! first failing clone stops the rest.

use std::path::Path;
use tokio::process::Command;
use tracing::{debug, info};

use crate::config::CloneConfig;
use crate::error::{Error, Result};
use crate::types::RepoRef;

pub struct CloneExecutor {
    git: String,
    fail_on_stderr: bool,
}

impl CloneExecutor {
    pub fn new(git: impl Into<String>, fail_on_stderr: bool) -> Self {
        Self {
            git: git.into(),
            fail_on_stderr,
        }
    }

    pub fn from_config(config: &CloneConfig) -> Self {
        Self::new(config.git.clone(), config.fail_on_stderr)
    }

    pub fn build_command(&self, base_dir: &Path, repos: &[RepoRef]) -> String {
        repos
            .iter()
            .map(|repo| {
                let target = base_dir.join(&repo.name);
                format!(
                    "{} clone {} {}",
                    shell_quote(&self.git),
                    shell_quote(&repo.clone_uri),
                    shell_quote(&target.to_string_lossy())
                )
            })
            .collect::<Vec<_>>()
            .join(" && ")
    }

    /// Returns the combined stdout of the clone chain
    pub async fn clone_all(&self, base_dir: &Path, repos: &[RepoRef]) -> Result<String> {
        if repos.is_empty() {
            info!("Nothing to clone");
            return Ok(String::new());
        }

        let command = self.build_command(base_dir, repos);
        info!("Cloning {} repositories into {}", repos.len(), base_dir.display());
        debug!("Running: {}", command);

        let output = Command::new("sh")
            .arg("-c")
            .arg(&command)
            .output()
            .await
            .map_err(|e| Error::Clone(format!("failed to start shell: {}", e)))?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();

        if !output.status.success() {
            return Err(Error::Clone(format!("{} ({})", stderr, output.status)));
        }

        if !stderr.is_empty() {
            if self.fail_on_stderr {
                return Err(Error::Clone(stderr));
            }
            debug!("git stderr: {}", stderr);
        }

        Ok(stdout)
    }
}

/// Single-quote for `sh`
fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}
