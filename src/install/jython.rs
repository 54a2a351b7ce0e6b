//! Jython bridge installer, driven through the JVM.

use std::path::{Path, PathBuf};

use tokio::process::Command;
use tracing::{debug, info, warn};

use super::{java::JavaHome, InstallContext, Layout};
use crate::{error::SandboxError, printer, utils};

pub const JYTHON_VERSION: &str = "2.5.2";
const JYTHON_MIRROR: &str = "https://s3.amazonaws.com/hawk-dev-software-mirror/jython/jython-2.5.2/";

pub fn default_installer_url() -> String {
    format!("{JYTHON_MIRROR}jython_installer-{JYTHON_VERSION}.jar")
}

#[derive(Debug, Clone)]
pub struct JythonInstaller {
    pub url: String,
    install_root: PathBuf,
    dir: PathBuf,
    cache_dir: PathBuf,
}

impl JythonInstaller {
    pub const ID: &'static str = "jython";

    pub fn new(layout: &Layout, url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            install_root: layout.install_root.clone(),
            dir: layout.jython_dir(),
            cache_dir: layout.jython_cache_dir(),
        }
    }

    pub fn is_installed(&self) -> bool {
        self.dir.join("jython.jar").exists()
    }

    pub async fn needs_update(&self, ctx: &InstallContext) -> Result<bool, SandboxError> {
        ctx.ledger.needs_update(Self::ID, &self.url, &ctx.fetcher).await
    }

    pub async fn install_or_update(&self, ctx: &InstallContext, java: &JavaHome) -> Result<(), SandboxError> {
        let fresh = ctx.ledger.needs_install(Self::ID) || !self.is_installed();
        if fresh || self.needs_update(ctx).await? {
            self.install(ctx, java).await?;
        } else {
            debug!("jython is up to date");
        }
        Ok(())
    }

    pub async fn install(&self, ctx: &InstallContext, java: &JavaHome) -> Result<(), SandboxError> {
        printer::action("Installing jython", async {
            let jar = ctx.fetcher.download(&self.url, &self.install_root).await?;
            let out = Command::new(&java.binary)
                .arg("-jar")
                .arg(&jar)
                .arg("-s")
                .arg("-d")
                .arg(&self.dir)
                .env("JAVA_HOME", &java.home)
                .output()
                .await;
            remove_installer(&jar);
            let out = out.map_err(|e| SandboxError::io("launching the jython installer", e))?;
            if !out.status.success() {
                return Err(SandboxError::Command {
                    command: format!("java -jar {}", jar.display()),
                    detail: String::from_utf8_lossy(&out.stderr).trim().to_string(),
                });
            }

            // Jython writes its package cache at runtime, possibly as another user.
            std::fs::create_dir_all(&self.cache_dir)
                .and_then(|_| utils::set_mode_recursive(&self.cache_dir, 0o777))
                .map_err(|e| SandboxError::io(format!("preparing {}", self.cache_dir.display()), e))?;
            ctx.ledger.record(Self::ID)?;
            Ok(())
        })
        .await?;
        info!(dir = %self.dir.display(), "jython installed");
        Ok(())
    }
}

fn remove_installer(jar: &Path) {
    if let Err(e) = std::fs::remove_file(jar) {
        warn!(jar = %jar.display(), error = %e, "failed to remove the jython installer");
    }
}
