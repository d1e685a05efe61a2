use anyhow::{bail, Context, Result};
use tokio::process::Command;
use tokio::time;

/// Upper bound on how long a reload may take.
const RELOAD_TIMEOUT: time::Duration = time::Duration::from_secs(10);

/// Reloads the nginx master process.
pub(crate) struct Manager {
    command: String,
}

// === impl Manager ===

impl Manager {
    pub fn new() -> Self {
        Self::with_command("nginx")
    }

    fn with_command(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }

    pub async fn reload(&self) -> Result<()> {
        let status = time::timeout(
            RELOAD_TIMEOUT,
            Command::new(&self.command).args(["-s", "reload"]).status(),
        )
        .await
        .context("nginx reload timed out")?
        .with_context(|| format!("failed to run {}", self.command))?;

        if !status.success() {
            bail!("nginx reload exited with {}", status);
        }
        Ok(())
    }
}
