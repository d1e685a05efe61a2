pub(crate) mod config;
pub(crate) mod file;
pub(crate) mod runtime;

use crate::events::Applier;
use anyhow::Result;
use std::path::PathBuf;

/// The nginx side of an apply: write the rendered configuration, then reload.
pub(crate) struct Nginx {
    files: file::Manager,
    runtime: runtime::Manager,
}

// === impl Nginx ===

impl Nginx {
    pub fn new(conf_path: PathBuf) -> Self {
        Self {
            files: file::Manager::new(conf_path),
            runtime: runtime::Manager::new(),
        }
    }
}

impl Applier for Nginx {
    async fn apply(&mut self, contents: String) -> Result<()> {
        self.files.write(contents.as_bytes()).await?;
        self.runtime.reload().await
    }
}
