//! Local pig sandbox: versioned dependency installs, one-shot script runs and
//! a live illustrate mode backed by a long-running grunt shell.

pub mod config;
pub mod controller;
pub mod error;
pub mod install;
pub mod live;
pub mod printer;
pub mod process;
pub mod project;
pub mod sandbox;
pub mod utils;

pub use config::Config;
pub use controller::ExecutionController;
pub use error::SandboxError;
