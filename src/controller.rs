//! Orders the installers, builds the sandbox and runs pig.

use std::path::Path;

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::{
    config::Config,
    error::SandboxError,
    install::{Component, InstallContext, Installed, Layout, LOCAL_INSTALL_DIR},
    live, printer,
    project::{ensure_gitignored, Parameter, Project, Script},
    sandbox::{write_param_file, EngineInvocation, EngineMode, SandboxEnvironment},
};

pub const DEFAULT_PREVIEW_PORT: u16 = 4567;

pub struct ExecutionController {
    project: Project,
    layout: Layout,
    cfg: Config,
}

impl ExecutionController {
    pub fn new(project: Project, cfg: Config) -> Self {
        let layout = Layout::new(&project.root);
        Self { project, layout, cfg }
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn preview_port(&self) -> u16 {
        self.cfg
            .get_u64("PIGPEN_PREVIEW_PORT")
            .and_then(|p| u16::try_from(p).ok())
            .unwrap_or(DEFAULT_PREVIEW_PORT)
    }

    /// Both AWS keys must be set unless the override flag is.
    pub fn require_aws_keys(&self) -> Result<(), SandboxError> {
        if self.cfg.ignore_aws_keys() {
            return Ok(());
        }
        match (self.cfg.get("AWS_ACCESS_KEY"), self.cfg.get("AWS_SECRET_KEY")) {
            (Some(_), Some(_)) => Ok(()),
            _ => Err(SandboxError::CredentialsMissing),
        }
    }

    /// Brings every dependency up to date, in order: java, pig, python, the
    /// project's python requirements, jython.
    ///
    /// A failed requirements sync does not stop jython from being installed,
    /// but it is still returned as the overall error so nothing runs against
    /// an incomplete environment.
    pub async fn install_and_configure(&self) -> Result<Installed> {
        let ctx = InstallContext::from_config(self.layout.clone(), &self.cfg)?;
        std::fs::create_dir_all(&self.layout.install_root)
            .with_context(|| format!("Failed to create {}", self.layout.install_root.display()))?;

        let mut installed = Installed::default();
        let mut sync_failure = None;
        for component in Component::plan(&self.layout, &self.cfg) {
            debug!(component = component.id(), "checking");
            component.install(&ctx, &mut installed).await?;

            if let (Component::Python(python), Some(interpreter)) = (&component, installed.python.as_deref()) {
                if let Err(e) = python.sync_project_env(&ctx, interpreter).await {
                    warn!(error = %e, "python requirements failed to install");
                    sync_failure = Some(e);
                }
            }
        }

        ensure_gitignored(&self.project, LOCAL_INSTALL_DIR)?;
        if let Some(e) = sync_failure {
            return Err(e.into());
        }
        info!(root = %self.layout.install_root.display(), "local environment ready");
        Ok(installed)
    }

    async fn sandbox(&self) -> Result<SandboxEnvironment> {
        let installed = self.install_and_configure().await?;
        Ok(SandboxEnvironment::build(&self.layout, &installed, &self.cfg)?)
    }

    pub async fn run(&self, script: &Script, parameters: &[Parameter]) -> Result<i32> {
        self.require_aws_keys()?;
        let env = self.sandbox().await?;
        printer::display(&format!("Running {}", script.name));
        self.execute(&env, &EngineMode::Run, parameters, &script.path).await
    }

    pub async fn validate(&self, script: &Script, parameters: &[Parameter]) -> Result<i32> {
        let env = self.sandbox().await?;
        let code = self.execute(&env, &EngineMode::Validate, parameters, &script.path).await?;
        if code == 0 {
            printer::display(&format!("{} is valid", script.name));
        }
        Ok(code)
    }

    /// Writes illustrate's JSON for `alias` to a kept temp file and prints its
    /// path.
    pub async fn illustrate(
        &self,
        script: &Script,
        alias: &str,
        skip_pruning: bool,
        parameters: &[Parameter],
    ) -> Result<i32> {
        self.require_aws_keys()?;
        let env = self.sandbox().await?;

        let param_file = write_param_file(parameters)?;
        let output = tempfile::Builder::new()
            .prefix("pigpen-illustrate-")
            .suffix(".json")
            .tempfile()
            .context("Failed to create illustrate output file")?
            .into_temp_path()
            .keep()
            .context("Failed to keep illustrate output file")?;
        let mode = EngineMode::Illustrate {
            alias: alias.to_string(),
            skip_pruning,
            output: output.clone(),
            param_file: param_file.path().to_path_buf(),
        };

        let code = self.execute(&env, &mode, parameters, &script.path).await?;
        if code == 0 {
            printer::display(&format!("Illustrate results written to {}", output.display()));
        }
        Ok(code)
    }

    pub async fn watch(&self, script: &Script, port: Option<u16>) -> Result<()> {
        self.require_aws_keys()?;
        let env = self.sandbox().await?;
        live::watch(env, script.path.clone(), port.unwrap_or_else(|| self.preview_port())).await
    }

    async fn execute(
        &self,
        env: &SandboxEnvironment,
        mode: &EngineMode,
        parameters: &[Parameter],
        script: &Path,
    ) -> Result<i32> {
        let properties = env.write_property_file()?;
        let invocation = EngineInvocation {
            env,
            mode,
            parameters,
            script,
            property_file: properties.path(),
        };
        let status = invocation.execute().await?;
        debug!(%status, "pig exited");
        Ok(status.code().unwrap_or(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller(pairs: &[(&str, &str)]) -> ExecutionController {
        ExecutionController::new(Project::new("/proj"), Config::from_map(pairs.iter().copied()))
    }

    #[test]
    fn test_credentials_required() {
        let c = controller(&[("AWS_ACCESS_KEY", "AK")]);
        assert!(matches!(c.require_aws_keys(), Err(SandboxError::CredentialsMissing)));

        let c = controller(&[("AWS_ACCESS_KEY", "AK"), ("AWS_SECRET_KEY", "SK")]);
        assert!(c.require_aws_keys().is_ok());
    }

    #[test]
    fn test_override_flag_skips_credentials() {
        let c = controller(&[("PIGPEN_IGNORE_AWS_KEYS", "1")]);
        assert!(c.require_aws_keys().is_ok());
    }

    #[test]
    fn test_preview_port() {
        assert_eq!(controller(&[]).preview_port(), DEFAULT_PREVIEW_PORT);
        assert_eq!(controller(&[("PIGPEN_PREVIEW_PORT", "8080")]).preview_port(), 8080);
        assert_eq!(controller(&[("PIGPEN_PREVIEW_PORT", "99999")]).preview_port(), DEFAULT_PREVIEW_PORT);
    }

    #[tokio::test]
    async fn test_run_without_credentials_installs_nothing() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("s.pig"), "a = LOAD 'x';\n").unwrap();
        let project = Project::new(dir.path());
        let script = Script::resolve(&project, dir.path().join("s.pig").to_str().unwrap()).unwrap();
        let c = ExecutionController::new(project, Config::from_map(Vec::<(String, String)>::new()));

        let err = c.run(&script, &[]).await.unwrap_err();
        assert!(matches!(err.downcast_ref::<SandboxError>(), Some(SandboxError::CredentialsMissing)));
        assert!(!c.layout().install_root.exists());
    }
}
