use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug, Clone)]
#[command(name = "pigpen", about = "Run pig scripts in a local sandbox", version)]
pub struct Cli {
    /// Project directory (defaults to the current directory).
    #[arg(long = "project-root", global = true, value_name = "DIR")]
    pub project_root: Option<PathBuf>,

    /// Log filter, e.g. `debug` or `pigpen=trace` (overrides PIGPEN_LOG).
    #[arg(long, global = true, value_name = "FILTER")]
    pub log: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Install or update java, pig, python and jython for this project.
    Configure,

    /// Run a pigscript locally.
    Run {
        #[command(flatten)]
        script: ScriptArgs,
    },

    /// Check a pigscript's syntax.
    Validate {
        #[command(flatten)]
        script: ScriptArgs,
    },

    /// Show sample data flowing through one alias.
    Illustrate {
        #[command(flatten)]
        script: ScriptArgs,

        /// Alias to illustrate.
        alias: String,

        /// Don't prune the illustrate results.
        #[arg(short = 's', long = "skip-pruning")]
        skip_pruning: bool,
    },

    /// Re-illustrate the script in the browser every time it is saved.
    ///
    /// The shell behind the preview takes no pig parameters.
    Watch {
        /// Script name under pigscripts/, or a path to a .pig file.
        #[arg(value_name = "SCRIPT")]
        script: String,

        /// Port for the preview page (overrides PIGPEN_PREVIEW_PORT).
        #[arg(long)]
        port: Option<u16>,
    },
}

#[derive(Args, Debug, Clone)]
pub struct ScriptArgs {
    /// Script name under pigscripts/, or a path to a .pig file.
    #[arg(value_name = "SCRIPT")]
    pub script: String,

    /// Set a pig parameter value (repeatable).
    #[arg(short = 'p', long = "parameter", value_name = "NAME=VALUE", action = clap::ArgAction::Append)]
    pub parameters: Vec<String>,

    /// Load pig parameter values from a file.
    #[arg(short = 'f', long = "param-file", value_name = "FILE")]
    pub param_file: Option<PathBuf>,
}

impl Cli {
    pub fn parse() -> Self {
        <Self as Parser>::parse()
    }
}
