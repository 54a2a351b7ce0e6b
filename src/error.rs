//! Failure taxonomy for provisioning and live preview.

use std::path::PathBuf;

use thiserror::Error;

pub const NO_JAVA_REMEDIATION: &str = "\
A suitable java installation could not be found. If you already have java installed
please set your JAVA_HOME environment variable before continuing. Otherwise a
java installation will need to be added to your local system.

On OSX run `javac` from the command line to start the installation. On Linux
consult the documentation of your package manager.";

pub const NO_PYTHON_REMEDIATION: &str = "\
A suitable python installation with virtualenv could not be located. Please ensure
python is installed on your local system. If you need a copy of virtualenv it can be
found at https://pypi.python.org/pypi/virtualenv";

#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("{dependency} could not be found")]
    DependencyMissing {
        dependency: &'static str,
        remediation: &'static str,
    },

    #[error("failed to fetch {url}: {reason}")]
    Fetch { url: String, reason: String },

    #[error("unable to set up a python environment with your dependencies")]
    DependencyInstallFailed { log_path: PathBuf },

    #[error("the interactive pig session exited unexpectedly")]
    SessionTerminated,

    #[error("AWS credentials are not set")]
    CredentialsMissing,

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` failed: {detail}")]
    Command { command: String, detail: String },
}

impl SandboxError {
    pub fn fetch(url: &str, reason: impl ToString) -> Self {
        Self::Fetch { url: url.to_string(), reason: reason.to_string() }
    }

    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io { context: context.into(), source }
    }

    /// One actionable message for the user.
    pub fn remediation(&self) -> String {
        match self {
            Self::DependencyMissing { remediation, .. } => (*remediation).to_string(),
            Self::Fetch { .. } => {
                "Check your network connection and run the command again; nothing was recorded as installed.".into()
            }
            Self::DependencyInstallFailed { log_path } => {
                format!("See {} for more details.", log_path.display())
            }
            Self::SessionTerminated => "The session will be restarted on the next edit.".into(),
            Self::CredentialsMissing => "Please specify your aws access key via environment variable AWS_ACCESS_KEY \
                 and your aws secret key via environment variable AWS_SECRET_KEY, \
                 or set PIGPEN_IGNORE_AWS_KEYS to skip this check."
                .into(),
            Self::Io { .. } | Self::Command { .. } => {
                "Fix the problem above and run the command again.".into()
            }
        }
    }
}
