//! Versioned local dependencies: layout, ledger, fetcher and installers.

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{config::Config, error::SandboxError};

pub mod fetch;
pub mod java;
pub mod jython;
pub mod ledger;
pub mod pig;
pub mod python;

pub use fetch::{Fetcher, RemoteArchiveMeta};
pub use java::{JavaHome, JavaProbe};
pub use jython::JythonInstaller;
pub use ledger::InstallLedger;
pub use pig::PigInstaller;
pub use python::{PythonInstaller, PythonSource};

pub const LOCAL_INSTALL_DIR: &str = ".pigpen-local";

/// Every on-disk location, derived from the project root.
#[derive(Debug, Clone)]
pub struct Layout {
    pub project_root: PathBuf,
    pub install_root: PathBuf,
}

impl Layout {
    pub fn new(project_root: impl Into<PathBuf>) -> Self {
        let project_root = project_root.into();
        let install_root = project_root.join(LOCAL_INSTALL_DIR);
        Self { project_root, install_root }
    }

    pub fn pig_dir(&self) -> PathBuf {
        self.install_root.join("pig")
    }

    pub fn python_dir(&self) -> PathBuf {
        self.install_root.join("python")
    }

    pub fn python_env_dir(&self) -> PathBuf {
        self.install_root.join("pythonenv")
    }

    pub fn jython_dir(&self) -> PathBuf {
        self.install_root.join("jython")
    }

    pub fn jython_cache_dir(&self) -> PathBuf {
        self.jython_dir().join("cachedir")
    }

    pub fn pip_log_path(&self) -> PathBuf {
        self.install_root.join("pip-install.log")
    }

    pub fn requirements_path(&self) -> PathBuf {
        self.project_root.join("udfs").join("python").join("requirements.txt")
    }

    pub fn project_root(&self) -> &Path {
        &self.project_root
    }
}

/// Shared state handed to every installer.
#[derive(Debug, Clone)]
pub struct InstallContext {
    pub layout: Layout,
    pub ledger: InstallLedger,
    pub fetcher: Fetcher,
}

impl InstallContext {
    pub fn new(layout: Layout, connect_timeout: Duration) -> Result<Self, SandboxError> {
        let ledger = InstallLedger::new(&layout.install_root);
        let fetcher = Fetcher::new(connect_timeout)?;
        Ok(Self { layout, ledger, fetcher })
    }

    pub fn from_config(layout: Layout, cfg: &Config) -> Result<Self, SandboxError> {
        let ledger = InstallLedger::new(&layout.install_root);
        let fetcher = Fetcher::from_config(cfg)?;
        Ok(Self { layout, ledger, fetcher })
    }
}

/// What the installers produced, consumed when building the sandbox.
#[derive(Debug, Clone, Default)]
pub struct Installed {
    pub java: Option<JavaHome>,
    pub pig_command: Option<PathBuf>,
    pub python: Option<PathBuf>,
    pub python_env: Option<PathBuf>,
    pub jython_dir: Option<PathBuf>,
}

/// The closed set of dependencies, in install order.
#[derive(Debug, Clone)]
pub enum Component {
    Java(JavaProbe),
    Pig(PigInstaller),
    Python(PythonInstaller),
    Jython(JythonInstaller),
}

impl Component {
    /// The default plan for a project: JVM, engine, interpreter, bridge.
    pub fn plan(layout: &Layout, cfg: &Config) -> Vec<Self> {
        vec![
            Self::Java(JavaProbe::from_config(cfg)),
            Self::Pig(PigInstaller::from_config(layout, cfg)),
            Self::Python(PythonInstaller::for_platform(layout)),
            Self::Jython(JythonInstaller::new(layout, jython::default_installer_url())),
        ]
    }

    pub fn id(&self) -> &'static str {
        match self {
            Self::Java(_) => JavaProbe::ID,
            Self::Pig(_) => PigInstaller::ID,
            Self::Python(_) => PythonInstaller::ID,
            Self::Jython(_) => JythonInstaller::ID,
        }
    }

    pub fn is_installed(&self) -> bool {
        match self {
            Self::Java(c) => c.is_installed(),
            Self::Pig(c) => c.is_installed(),
            Self::Python(c) => c.is_installed(),
            Self::Jython(c) => c.is_installed(),
        }
    }

    /// Only the bridge tracks remote versions; the engine has no update path.
    pub async fn needs_update(&self, ctx: &InstallContext) -> Result<bool, SandboxError> {
        match self {
            Self::Jython(c) => c.needs_update(ctx).await,
            Self::Java(_) | Self::Pig(_) | Self::Python(_) => Ok(false),
        }
    }

    /// Detects or installs this component and records its outputs.
    pub async fn install(&self, ctx: &InstallContext, installed: &mut Installed) -> Result<(), SandboxError> {
        match self {
            Self::Java(c) => {
                installed.java = Some(c.check_install()?);
            }
            Self::Pig(c) => {
                c.install(ctx).await?;
                installed.pig_command = Some(c.command());
            }
            Self::Python(c) => {
                let python = c.check_or_install(ctx).await?;
                installed.python = Some(python);
                installed.python_env = Some(c.env_dir().to_path_buf());
            }
            Self::Jython(c) => {
                let java = installed.java.as_ref().ok_or(SandboxError::DependencyMissing {
                    dependency: "java",
                    remediation: crate::error::NO_JAVA_REMEDIATION,
                })?;
                c.install_or_update(ctx, java).await?;
                installed.jython_dir = Some(ctx.layout.jython_dir());
            }
        }
        Ok(())
    }

    pub async fn update(&self, ctx: &InstallContext, installed: &mut Installed) -> Result<(), SandboxError> {
        if self.needs_update(ctx).await? {
            self.install(ctx, installed).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_paths() {
        let layout = Layout::new("/proj");
        assert_eq!(layout.install_root, PathBuf::from("/proj/.pigpen-local"));
        assert_eq!(layout.pig_dir(), PathBuf::from("/proj/.pigpen-local/pig"));
        assert_eq!(layout.jython_cache_dir(), PathBuf::from("/proj/.pigpen-local/jython/cachedir"));
        assert_eq!(layout.requirements_path(), PathBuf::from("/proj/udfs/python/requirements.txt"));
    }

    #[test]
    fn test_plan_order() {
        let cfg = Config::from_map(Vec::<(String, String)>::new());
        let ids: Vec<_> = Component::plan(&Layout::new("/proj"), &cfg).iter().map(Component::id).collect();
        assert_eq!(ids, vec!["java", "pig", "python", "jython"]);
    }
}
