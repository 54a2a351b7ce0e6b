//! Pig distribution installer.

use std::path::PathBuf;

use tracing::info;

use super::{fetch::promote, InstallContext, Layout};
use crate::{config::Config, error::SandboxError, printer, utils};

#[derive(Debug, Clone)]
pub struct PigInstaller {
    pub url: String,
    install_root: PathBuf,
    dir: PathBuf,
}

impl PigInstaller {
    pub const ID: &'static str = "pig";

    pub fn new(layout: &Layout, url: impl Into<String>) -> Self {
        Self { url: url.into(), install_root: layout.install_root.clone(), dir: layout.pig_dir() }
    }

    pub fn from_config(layout: &Layout, cfg: &Config) -> Self {
        Self::new(layout, cfg.pig_distro_url())
    }

    pub fn command(&self) -> PathBuf {
        self.dir.join("bin").join("pig")
    }

    /// Only a tree holding the launcher counts as installed.
    pub fn is_installed(&self) -> bool {
        self.command().is_file()
    }

    /// Downloads and unpacks the distribution once. There is no in-place
    /// update; removing the directory forces a reinstall. The tree is only
    /// moved into place once the launcher has been made executable.
    pub async fn install(&self, ctx: &InstallContext) -> Result<(), SandboxError> {
        if self.is_installed() {
            return Ok(());
        }
        printer::action("Installing pig", async {
            let staging = ctx.fetcher.download_and_stage(&self.url, &self.install_root).await?;
            // The archive has been seen to drop the executable bit.
            let staged = staging.path().join(Self::ID).join("bin").join("pig");
            utils::set_mode(&staged, 0o755)
                .map_err(|e| SandboxError::io(format!("marking {} executable", staged.display()), e))?;
            promote(staging, &self.dir)?;
            ctx.ledger.record(Self::ID)?;
            Ok::<_, SandboxError>(())
        })
        .await?;
        info!(dir = %self.dir.display(), "pig installed");
        Ok(())
    }
}
