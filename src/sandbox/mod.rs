//! Environment for invoking pig, and the generated launcher script.

use std::{
    env,
    fmt::Write as _,
    io::Write as _,
    path::{Path, PathBuf},
    process::ExitStatus,
};

use tempfile::NamedTempFile;
use tokio::process::Command;
use tracing::debug;

use crate::{
    config::Config,
    error::{SandboxError, NO_JAVA_REMEDIATION},
    install::{Installed, Layout},
    project::Parameter,
    utils::{self, shell_quote},
};

pub const PIG_LOG_FORMAT: &str = "humanreadable";
pub const EXEC_TYPE: &str = "local";

#[derive(Debug, Clone)]
pub struct SandboxEnvironment {
    pub binary_path: PathBuf,
    /// Exported in this order.
    pub environment_variables: Vec<(String, String)>,
    pub working_directory: PathBuf,
    /// Written to the generated `-propertyFile`.
    pub properties: Vec<(String, String)>,
}

impl SandboxEnvironment {
    pub fn build(layout: &Layout, installed: &Installed, cfg: &Config) -> Result<Self, SandboxError> {
        let java = installed.java.as_ref().ok_or(SandboxError::DependencyMissing {
            dependency: "java",
            remediation: NO_JAVA_REMEDIATION,
        })?;
        let pig_home = layout.pig_dir();
        let binary_path = installed
            .pig_command
            .clone()
            .unwrap_or_else(|| pig_home.join("bin").join("pig"));
        let jython_dir = installed.jython_dir.clone().unwrap_or_else(|| layout.jython_dir());

        let mut vars: Vec<(String, String)> = Vec::new();
        let mut set = |k: &str, v: String| vars.push((k.to_string(), v));
        set("JAVA_HOME", display(&java.home));
        set("PIG_HOME", display(&pig_home));
        set("PIG_CLASSPATH", format!("{}/lib-pig/*", display(&pig_home)));
        set(
            "CLASSPATH",
            format!("{0}/lib/*:{0}/conf/jets3t.properties", display(&pig_home)),
        );
        let inherited_path = env::var("PATH").unwrap_or_default();
        match &installed.python_env {
            Some(env_dir) => {
                set("VIRTUAL_ENV", display(env_dir));
                set("PATH", join_path(&env_dir.join("bin"), &inherited_path));
            }
            None => set("PATH", inherited_path),
        }
        set(
            "PIG_OPTS",
            format!(
                "-Dpython.home={} -Dpython.cachedir={} -Dpython.verbose=error",
                display(&jython_dir),
                display(&layout.jython_cache_dir())
            ),
        );

        let mut properties = Vec::new();
        if let Some(key) = cfg.get("AWS_ACCESS_KEY") {
            properties.push(("fs.s3n.awsAccessKeyId".to_string(), key));
        }
        if let Some(secret) = cfg.get("AWS_SECRET_KEY") {
            properties.push(("fs.s3n.awsSecretAccessKey".to_string(), secret));
        }
        properties.push(("pig.events.logformat".to_string(), PIG_LOG_FORMAT.to_string()));
        properties.push((
            "pig.logfile".to_string(),
            display(&layout.install_root.join("logs")),
        ));

        Ok(Self {
            binary_path,
            environment_variables: vars,
            working_directory: layout.project_root.clone(),
            properties,
        })
    }

    pub fn var(&self, name: &str) -> Option<&str> {
        self.environment_variables
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// The returned file is deleted when dropped.
    pub fn write_property_file(&self) -> Result<NamedTempFile, SandboxError> {
        let mut f = tempfile::Builder::new()
            .prefix("pigpen-properties-")
            .tempfile()
            .map_err(|e| SandboxError::io("creating property file", e))?;
        for (k, v) in &self.properties {
            writeln!(f, "{k}={v}").map_err(|e| SandboxError::io("writing property file", e))?;
        }
        f.flush().map_err(|e| SandboxError::io("writing property file", e))?;
        Ok(f)
    }
}

fn display(p: &Path) -> String {
    p.to_string_lossy().into_owned()
}

fn join_path(first: &Path, rest: &str) -> String {
    if rest.is_empty() {
        display(first)
    } else {
        format!("{}:{rest}", display(first))
    }
}

/// What pig should do with the script.
#[derive(Debug, Clone)]
pub enum EngineMode {
    Run,
    Validate,
    Illustrate {
        alias: String,
        skip_pruning: bool,
        output: PathBuf,
        param_file: PathBuf,
    },
}

#[derive(Debug, Clone)]
pub struct EngineInvocation<'a> {
    pub env: &'a SandboxEnvironment,
    pub mode: &'a EngineMode,
    pub parameters: &'a [Parameter],
    pub script: &'a Path,
    pub property_file: &'a Path,
}

impl EngineInvocation<'_> {
    fn sub_command(&self) -> String {
        let script = shell_quote(&display(self.script));
        match self.mode {
            EngineMode::Run => format!("-f {script}"),
            EngineMode::Validate => format!("-check -f {script}"),
            EngineMode::Illustrate { alias, skip_pruning, output, param_file } => {
                // Parameters must travel inside the illustrate command itself.
                let mut inner = format!(
                    "illustrate -param_file {} -script {} -out {}",
                    shell_quote(&display(param_file)),
                    script,
                    shell_quote(&display(output)),
                );
                if *skip_pruning {
                    inner.push_str(" -skipPruning");
                }
                let _ = write!(inner, " {alias}");
                format!("-e {}", shell_quote(&inner))
            }
        }
    }

    /// Renders the bash launcher: exports, `cd`, then a single pig command.
    pub fn render(&self) -> String {
        let mut out = String::from("#!/bin/bash\nset -e\n\n");
        for (k, v) in &self.env.environment_variables {
            let _ = writeln!(out, "export {k}={}", shell_quote(v));
        }
        let _ = writeln!(out, "\ncd {}", shell_quote(&display(&self.env.working_directory)));

        let mut cmd = format!(
            "exec {} -exectype {EXEC_TYPE}",
            shell_quote(&display(&self.env.binary_path))
        );
        if !matches!(self.mode, EngineMode::Illustrate { .. }) {
            for p in self.parameters {
                let _ = write!(cmd, " -param {}", shell_quote(&format!("{}={}", p.name, p.value)));
            }
        }
        let _ = write!(
            cmd,
            " -propertyFile {} {}",
            shell_quote(&display(self.property_file)),
            self.sub_command()
        );
        out.push_str(&cmd);
        out.push('\n');
        out
    }

    /// Writes the launcher to a temp file and runs it to completion.
    pub async fn execute(&self) -> Result<ExitStatus, SandboxError> {
        let mut script = tempfile::Builder::new()
            .prefix("pigpen-")
            .suffix(".sh")
            .tempfile()
            .map_err(|e| SandboxError::io("creating launcher script", e))?;
        script
            .write_all(self.render().as_bytes())
            .and_then(|_| script.flush())
            .map_err(|e| SandboxError::io("writing launcher script", e))?;
        utils::set_mode(script.path(), 0o755)
            .map_err(|e| SandboxError::io("marking launcher executable", e))?;

        debug!(script = %script.path().display(), "launching pig");
        let status = Command::new("bash")
            .arg(script.path())
            .status()
            .await
            .map_err(|e| SandboxError::io("running bash", e))?;
        Ok(status)
    }
}

/// Writes `NAME=VALUE` lines for pig's `-param_file`.
pub fn write_param_file(parameters: &[Parameter]) -> Result<NamedTempFile, SandboxError> {
    let mut f = tempfile::Builder::new()
        .prefix("pigpen-parameters-")
        .tempfile()
        .map_err(|e| SandboxError::io("creating parameter file", e))?;
    for p in parameters {
        writeln!(f, "{}={}", p.name, p.value).map_err(|e| SandboxError::io("writing parameter file", e))?;
    }
    f.flush().map_err(|e| SandboxError::io("writing parameter file", e))?;
    Ok(f)
}
