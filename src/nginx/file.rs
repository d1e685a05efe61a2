use anyhow::{Context, Result};
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use tokio::fs;

/// Mode for the rendered configuration file.
const CONF_MODE: u32 = 0o644;

/// Writes the nginx configuration file with an atomic replace: the contents
/// land in a sibling temp file which is renamed over the target, so nginx
/// never observes a partial configuration.
pub(crate) struct Manager {
    path: PathBuf,
}

// === impl Manager ===

impl Manager {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub async fn write(&self, contents: &[u8]) -> Result<()> {
        let tmp = self.path.with_extension("tmp");

        fs::write(&tmp, contents)
            .await
            .with_context(|| format!("failed to write {}", tmp.display()))?;
        fs::set_permissions(&tmp, std::fs::Permissions::from_mode(CONF_MODE))
            .await
            .with_context(|| format!("failed to chmod {}", tmp.display()))?;
        fs::rename(&tmp, &self.path)
            .await
            .with_context(|| format!("failed to replace {}", self.path.display()))?;

        Ok(())
    }
}
