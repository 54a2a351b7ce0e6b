//! JVM discovery. A JVM is never downloaded, only located.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::{
    config::Config,
    error::{SandboxError, NO_JAVA_REMEDIATION},
    utils,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JavaHome {
    pub home: PathBuf,
    pub binary: PathBuf,
}

impl JavaHome {
    /// A home is usable only if it holds a `bin/java` executable.
    pub fn from_home(home: &Path) -> Option<Self> {
        let binary = home.join("bin").join("java");
        if utils::is_executable(&binary) {
            Some(Self { home: home.to_path_buf(), binary })
        } else {
            None
        }
    }
}

#[derive(Debug, Clone)]
pub struct JavaProbe {
    configured_home: Option<PathBuf>,
    discover: bool,
}

impl JavaProbe {
    pub const ID: &'static str = "java";

    pub fn from_config(cfg: &Config) -> Self {
        Self { configured_home: cfg.get_path("JAVA_HOME"), discover: true }
    }

    /// Probe restricted to an explicit home, skipping platform discovery.
    pub fn with_home(home: Option<PathBuf>) -> Self {
        Self { configured_home: home, discover: false }
    }

    pub fn is_installed(&self) -> bool {
        self.locate().is_some()
    }

    pub fn locate(&self) -> Option<JavaHome> {
        if let Some(home) = &self.configured_home {
            if let Some(found) = JavaHome::from_home(home) {
                return Some(found);
            }
            debug!(home = %home.display(), "JAVA_HOME has no usable bin/java");
        }
        if !self.discover {
            return None;
        }
        discover_home().and_then(|home| JavaHome::from_home(&home))
    }

    pub fn check_install(&self) -> Result<JavaHome, SandboxError> {
        self.locate().ok_or(SandboxError::DependencyMissing {
            dependency: "java",
            remediation: NO_JAVA_REMEDIATION,
        })
    }
}

#[cfg(target_os = "macos")]
fn discover_home() -> Option<PathBuf> {
    const JAVA_HOME_TOOL: &str = "/usr/libexec/java_home";
    if !Path::new(JAVA_HOME_TOOL).exists() {
        return None;
    }
    let out = std::process::Command::new(JAVA_HOME_TOOL).output().ok()?;
    if !out.status.success() {
        return None;
    }
    let home = String::from_utf8_lossy(&out.stdout).trim().to_string();
    if home.is_empty() {
        None
    } else {
        Some(PathBuf::from(home))
    }
}

/// Resolves `java` on PATH through symlinks and walks up from `bin/java`.
#[cfg(not(target_os = "macos"))]
fn discover_home() -> Option<PathBuf> {
    let java = utils::find_on_path("java")?;
    let real = std::fs::canonicalize(&java).ok()?;
    let home = real.parent()?.parent()?.to_path_buf();
    debug!(home = %home.display(), "discovered java on PATH");
    Some(home)
}
