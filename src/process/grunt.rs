//! Pig's interactive shell.

use std::ffi::OsStr;

use regex::Regex;
use tracing::info;

use super::InteractiveSession;
use crate::{
    error::SandboxError,
    sandbox::{SandboxEnvironment, EXEC_TYPE},
};

pub const GRUNT_PROMPT: &str = "grunt> ";

/// Matches the shell prompt wherever it appears in the output stream.
pub fn prompt() -> Result<Regex, regex::Error> {
    Regex::new(&regex::escape(GRUNT_PROMPT))
}

/// Starts `pig -x local` inside the sandbox and waits for its first prompt.
pub async fn start(env: &SandboxEnvironment) -> Result<InteractiveSession, SandboxError> {
    let prompt = prompt().map_err(|e| SandboxError::Command {
        command: "grunt".into(),
        detail: e.to_string(),
    })?;
    let properties = env.write_property_file()?.into_temp_path();
    let args: [&OsStr; 4] = [
        OsStr::new("-x"),
        OsStr::new(EXEC_TYPE),
        OsStr::new("-propertyFile"),
        properties.as_os_str(),
    ];
    let mut session = InteractiveSession::spawn(
        &env.binary_path,
        args,
        &env.environment_variables,
        &env.working_directory,
        prompt,
    )
    .await?;
    session.hold(properties);
    info!(binary = %env.binary_path.display(), "grunt session started");
    Ok(session)
}
