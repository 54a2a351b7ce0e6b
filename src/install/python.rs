//! Python runtime for UDFs and the per-project virtualenv.

use std::{
    fs,
    path::{Path, PathBuf},
    process::Stdio,
};

use tokio::process::Command;
use tracing::{debug, info, warn};

use super::{fetch::promote, InstallContext, InstallLedger, Layout};
use crate::{
    error::{SandboxError, NO_PYTHON_REMEDIATION},
    printer, utils,
};

pub const PYTHON_OSX_ARCHIVE_URL: &str =
    "https://s3.amazonaws.com/mortar-public-artifacts/mortar-python-osx.tgz";

/// Interpreter names tried on PATH, most preferred first.
pub const PYTHON_CANDIDATES: &[&str] = &["python2.7", "python", "python3"];

#[derive(Debug, Clone)]
pub enum PythonSource {
    /// A relocatable distribution unpacked into the install root.
    Bundled { url: String },
    /// An interpreter already on PATH that can run virtualenv.
    System { candidates: Vec<String> },
}

#[derive(Debug, Clone)]
pub struct PythonInstaller {
    source: PythonSource,
    install_root: PathBuf,
    dir: PathBuf,
    env_dir: PathBuf,
    requirements: PathBuf,
    log_path: PathBuf,
}

impl PythonInstaller {
    pub const ID: &'static str = "python";
    pub const ENV_ID: &'static str = "pythonenv";

    pub fn new(layout: &Layout, source: PythonSource) -> Self {
        Self {
            source,
            install_root: layout.install_root.clone(),
            dir: layout.python_dir(),
            env_dir: layout.python_env_dir(),
            requirements: layout.requirements_path(),
            log_path: layout.pip_log_path(),
        }
    }

    /// OSX gets a bundled interpreter, everything else uses the system one.
    pub fn for_platform(layout: &Layout) -> Self {
        let source = if cfg!(target_os = "macos") {
            PythonSource::Bundled { url: PYTHON_OSX_ARCHIVE_URL.to_string() }
        } else {
            PythonSource::System { candidates: PYTHON_CANDIDATES.iter().map(|s| s.to_string()).collect() }
        };
        Self::new(layout, source)
    }

    pub fn env_dir(&self) -> &Path {
        &self.env_dir
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    fn bundled_command(&self) -> PathBuf {
        self.dir.join("bin").join("python")
    }

    pub fn is_installed(&self) -> bool {
        match &self.source {
            PythonSource::Bundled { .. } => self.bundled_command().is_file(),
            PythonSource::System { candidates } => locate_system_python(candidates, has_virtualenv).is_some(),
        }
    }

    /// Returns the interpreter to use, installing the bundled one if needed.
    pub async fn check_or_install(&self, ctx: &InstallContext) -> Result<PathBuf, SandboxError> {
        match &self.source {
            PythonSource::Bundled { url } => {
                let command = self.bundled_command();
                if !command.is_file() {
                    printer::action("Installing python", async {
                        let staging = ctx.fetcher.download_and_stage(url, &self.install_root).await?;
                        let staged = staging.path().join(Self::ID).join("bin").join("python");
                        utils::set_mode(&staged, 0o755)
                            .map_err(|e| SandboxError::io(format!("marking {} executable", staged.display()), e))?;
                        promote(staging, &self.dir)?;
                        ctx.ledger.record(Self::ID)?;
                        Ok::<_, SandboxError>(())
                    })
                    .await?;
                }
                Ok(command)
            }
            PythonSource::System { candidates } => {
                locate_system_python(candidates, has_virtualenv).ok_or(SandboxError::DependencyMissing {
                    dependency: "python with virtualenv",
                    remediation: NO_PYTHON_REMEDIATION,
                })
            }
        }
    }

    /// True when a manifest exists and was never installed, or was edited
    /// after the last recorded install.
    pub fn requirements_need_install(&self, ledger: &InstallLedger) -> bool {
        let Ok(meta) = fs::metadata(&self.requirements) else {
            return false;
        };
        let Some(installed_at) = ledger.lookup(Self::ENV_ID) else {
            return true;
        };
        let edited = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_secs() as i64)
            .unwrap_or(i64::MAX);
        edited > installed_at
    }

    /// Creates the project virtualenv and installs the requirements manifest
    /// into it when it changed. Output of both steps lands in the pip log.
    pub async fn sync_project_env(&self, ctx: &InstallContext, python: &Path) -> Result<(), SandboxError> {
        fs::create_dir_all(&self.install_root)
            .map_err(|e| SandboxError::io(format!("creating {}", self.install_root.display()), e))?;

        let mut venv = Command::new(python);
        venv.arg("-m").arg("virtualenv").arg(&self.env_dir);
        self.run_logged(venv).await?;

        if !self.requirements_need_install(&ctx.ledger) {
            debug!("python requirements are up to date");
            return Ok(());
        }
        printer::action("Installing python UDF dependencies", async {
            let mut pip = Command::new(self.env_dir.join("bin").join("pip"));
            pip.arg("install")
                .arg("--requirement")
                .arg(&self.requirements)
                .env("VIRTUAL_ENV", &self.env_dir);
            self.run_logged(pip).await?;
            ctx.ledger.record(Self::ENV_ID)?;
            Ok::<_, SandboxError>(())
        })
        .await?;
        info!(env = %self.env_dir.display(), "python requirements installed");
        Ok(())
    }

    async fn run_logged(&self, mut cmd: Command) -> Result<(), SandboxError> {
        let failed = || SandboxError::DependencyInstallFailed { log_path: self.log_path.clone() };
        let out = cmd
            .stdin(Stdio::null())
            .output()
            .await;
        let out = match out {
            Ok(out) => out,
            Err(e) => {
                let _ = fs::write(&self.log_path, format!("failed to launch: {e}\n"));
                return Err(failed());
            }
        };
        let mut log = out.stdout;
        log.extend_from_slice(&out.stderr);
        if let Err(e) = fs::write(&self.log_path, &log) {
            warn!(error = %e, path = %self.log_path.display(), "could not write dependency log");
        }
        if out.status.success() {
            Ok(())
        } else {
            Err(failed())
        }
    }
}

fn has_virtualenv(python: &Path) -> bool {
    std::process::Command::new(python)
        .args(["-m", "virtualenv", "--help"])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

/// First candidate on PATH that also passes `usable`. A candidate that is
/// found but unusable is skipped, never returned as a fallback.
pub fn locate_system_python<S, F>(candidates: &[S], usable: F) -> Option<PathBuf>
where
    S: AsRef<str>,
    F: Fn(&Path) -> bool,
{
    candidates.iter().find_map(|name| {
        let path = utils::find_on_path(name.as_ref())?;
        if usable(&path) {
            Some(path)
        } else {
            debug!(python = %path.display(), "skipping python without virtualenv");
            None
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn layout_in(root: &Path) -> Layout {
        Layout::new(root)
    }

    #[test]
    fn test_requirements_absent_means_no_install() {
        let dir = tempdir().unwrap();
        let layout = layout_in(dir.path());
        let py = PythonInstaller::new(&layout, PythonSource::System { candidates: vec![] });
        let ledger = InstallLedger::new(&layout.install_root);
        assert!(!py.requirements_need_install(&ledger));
    }

    #[test]
    fn test_requirements_without_record_need_install() {
        let dir = tempdir().unwrap();
        let layout = layout_in(dir.path());
        fs::create_dir_all(layout.requirements_path().parent().unwrap()).unwrap();
        fs::write(layout.requirements_path(), "requests\n").unwrap();
        let py = PythonInstaller::new(&layout, PythonSource::System { candidates: vec![] });
        let ledger = InstallLedger::new(&layout.install_root);
        assert!(py.requirements_need_install(&ledger));

        // A record newer than the manifest settles it.
        ledger.record_at(PythonInstaller::ENV_ID, i64::MAX / 2).unwrap();
        assert!(!py.requirements_need_install(&ledger));

        // A record older than the manifest does not.
        ledger.record_at(PythonInstaller::ENV_ID, 0).unwrap();
        assert!(py.requirements_need_install(&ledger));
    }

    #[cfg(unix)]
    #[test]
    fn test_locate_skips_candidates_without_tool() {
        let found = locate_system_python(&["sh", "definitely-not-a-python"], |_| false);
        assert_eq!(found, None);
        let found = locate_system_python(&["definitely-not-a-python", "sh"], |_| true);
        assert!(found.is_some());
    }

    #[tokio::test]
    async fn test_system_python_missing_is_dependency_missing() {
        let dir = tempdir().unwrap();
        let layout = layout_in(dir.path());
        let ctx = InstallContext::new(layout.clone(), std::time::Duration::from_secs(1)).unwrap();
        let py = PythonInstaller::new(
            &layout,
            PythonSource::System { candidates: vec!["definitely-not-a-python".into()] },
        );
        assert!(matches!(
            py.check_or_install(&ctx).await,
            Err(SandboxError::DependencyMissing { .. })
        ));
    }
}
