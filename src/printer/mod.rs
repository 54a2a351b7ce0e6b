//! User-facing output: progress lines and taxonomy errors. Logs go through
//! `tracing` instead.

use std::future::Future;
use std::io::{self, Write};

use is_terminal::IsTerminal;
use owo_colors::OwoColorize;

use crate::error::SandboxError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tone {
    Plain,
    Ok,
    Failed,
}

/// Colours only when stdout is a terminal.
pub struct StatusPrinter {
    color: bool,
}

impl StatusPrinter {
    pub fn stdout() -> Self {
        Self { color: io::stdout().is_terminal() }
    }

    pub fn line(&self, tone: Tone, text: &str) {
        match (self.color, tone) {
            (true, Tone::Ok) => println!("{}", text.green()),
            (true, Tone::Failed) => println!("{}", text.red()),
            _ => println!("{text}"),
        }
    }
}

pub fn display(text: &str) {
    StatusPrinter::stdout().line(Tone::Plain, text);
}

/// Prints `label... ` before awaiting `fut`, then `done` or `failed`.
pub async fn action<T, E, F>(label: &str, fut: F) -> Result<T, E>
where
    F: Future<Output = Result<T, E>>,
{
    print!("{label}... ");
    let _ = io::stdout().flush();
    let res = fut.await;
    let printer = StatusPrinter::stdout();
    match &res {
        Ok(_) => printer.line(Tone::Ok, "done"),
        Err(_) => printer.line(Tone::Failed, "failed"),
    }
    res
}

/// Renders a taxonomy error as a single message plus its remediation.
pub fn print_sandbox_error(err: &SandboxError) {
    if io::stderr().is_terminal() {
        eprintln!("{} {}", "error:".red().bold(), err);
    } else {
        eprintln!("error: {err}");
    }
    eprintln!("{}", err.remediation());
}

pub fn print_error(err: &anyhow::Error) {
    if let Some(sandbox) = err.downcast_ref::<SandboxError>() {
        print_sandbox_error(sandbox);
        return;
    }
    if io::stderr().is_terminal() {
        eprintln!("{} {:#}", "error:".red().bold(), err);
    } else {
        eprintln!("error: {err:#}");
    }
}
