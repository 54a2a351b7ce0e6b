//! Live mode: re-illustrate a script in a running grunt shell on every save.

use std::{future::Future, path::PathBuf};

use anyhow::{Context, Result};
use futures::future::{FutureExt as _, LocalBoxFuture, OptionFuture};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::{
    error::SandboxError,
    printer,
    process::{grunt, InteractiveSession},
    sandbox::SandboxEnvironment,
};

pub mod diff;
pub mod hub;
pub mod server;
pub mod watcher;

pub use diff::{Batch, Directive, ScriptDiffEngine, ScriptState, Statement};
pub use hub::NotificationHub;
pub use server::{Preview, Subscribe};
pub use watcher::ScriptWatcher;

type StartSession = Box<dyn Fn() -> LocalBoxFuture<'static, Result<InteractiveSession, SandboxError>>>;

/// Diff, send and extract the preview for one script, keeping the session
/// and the record of what it has been sent.
pub struct Pipeline {
    script: PathBuf,
    engine: ScriptDiffEngine,
    start: StartSession,
    session: Option<InteractiveSession>,
    state: ScriptState,
}

impl Pipeline {
    pub fn new<F, Fut>(script: impl Into<PathBuf>, start: F) -> Self
    where
        F: Fn() -> Fut + 'static,
        Fut: Future<Output = Result<InteractiveSession, SandboxError>> + 'static,
    {
        Self {
            script: script.into(),
            engine: ScriptDiffEngine::new(),
            start: Box::new(move || start().boxed_local()),
            session: None,
            state: ScriptState::default(),
        }
    }

    /// Runs pig's shell from `env`.
    pub fn grunt(script: impl Into<PathBuf>, env: SandboxEnvironment) -> Self {
        Self::new(script, move || {
            let env = env.clone();
            async move { grunt::start(&env).await }
        })
    }

    pub fn state(&self) -> &ScriptState {
        &self.state
    }

    /// Sends whatever changed since the last successful run. `Ok(None)` when
    /// there was nothing to send or nothing to preview.
    ///
    /// A dead session is replaced before diffing, and the state is reset with
    /// it so the new shell receives the whole script.
    pub async fn run(&mut self) -> Result<Option<Preview>, SandboxError> {
        let source = tokio::fs::read_to_string(&self.script)
            .await
            .map_err(|e| SandboxError::io(format!("reading {}", self.script.display()), e))?;

        let live = match self.session.take() {
            Some(mut s) => {
                if s.is_alive() {
                    Some(s)
                } else {
                    warn!("pig session exited, starting a new one");
                    None
                }
            }
            None => None,
        };
        let session = match live {
            Some(s) => s,
            None => {
                self.state.reset();
                (self.start)().await?
            }
        };
        let session = self.session.insert(session);

        let mut next = self.state.clone();
        let batch = self.engine.diff(&source, &mut next);
        if batch.is_empty() {
            debug!("no new statements");
            return Ok(None);
        }

        match session.send(&batch.commands()).await {
            Ok(output) => {
                self.state = next;
                Ok(batch.preview_alias().map(|alias| Preview {
                    alias: alias.to_string(),
                    output: output.last_fragment().to_string(),
                }))
            }
            Err(SandboxError::SessionTerminated) => {
                self.session = None;
                self.state.reset();
                Err(SandboxError::SessionTerminated)
            }
            Err(e) => Err(e),
        }
    }

    pub async fn shutdown(mut self) {
        if let Some(session) = self.session.take() {
            session.kill().await;
        }
    }
}

type InFlight = LocalBoxFuture<'static, (Pipeline, Result<Option<Preview>, SandboxError>)>;

/// Single-threaded loop over file changes, long-poll subscriptions, the
/// running pipeline and Ctrl-C. At most one pipeline runs at a time; edits
/// that land meanwhile collapse into one rerun.
pub struct ReactorLoop {
    pipeline: Pipeline,
    watcher: ScriptWatcher,
    subscriptions: mpsc::Receiver<Subscribe>,
    hub: NotificationHub<Preview>,
}

impl ReactorLoop {
    pub fn new(pipeline: Pipeline, watcher: ScriptWatcher, subscriptions: mpsc::Receiver<Subscribe>) -> Self {
        Self { pipeline, watcher, subscriptions, hub: NotificationHub::new() }
    }

    /// Runs until Ctrl-C.
    pub async fn run(self) -> Result<()> {
        self.run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "cannot listen for Ctrl-C");
            }
        })
        .await
    }

    /// Runs until `shutdown` completes or the watcher stops, then kills the
    /// session.
    pub async fn run_until<S: Future<Output = ()>>(self, shutdown: S) -> Result<()> {
        let Self { pipeline, mut watcher, mut subscriptions, mut hub } = self;
        let mut idle = Some(pipeline);
        let mut in_flight: Option<InFlight> = None;
        // The first browser to connect should not wait for an edit.
        let mut rerun = true;

        tokio::pin!(shutdown);

        loop {
            if rerun && in_flight.is_none() {
                if let Some(p) = idle.take() {
                    rerun = false;
                    in_flight = Some(launch(p));
                }
            }

            tokio::select! {
                changed = watcher.changed() => match changed {
                    Some(path) => {
                        printer::display(&format!("Change detected in {}, recalculating illustrate...", path.display()));
                        if in_flight.is_some() {
                            debug!("pipeline busy, coalescing edit");
                        }
                        rerun = true;
                    }
                    None => {
                        warn!("file watcher stopped");
                        break;
                    }
                },
                Some(waiter) = subscriptions.recv() => {
                    hub.register_waiter(waiter);
                }
                Some((p, result)) = OptionFuture::from(in_flight.as_mut()) => {
                    in_flight = None;
                    idle = Some(p);
                    report(result, &mut hub);
                }
                () = &mut shutdown => {
                    info!("interrupted, shutting down");
                    break;
                }
            }
        }

        // An in-flight pipeline owns the session; dropping it kills the child.
        drop(in_flight);
        if let Some(p) = idle {
            p.shutdown().await;
        }
        Ok(())
    }
}

fn launch(mut pipeline: Pipeline) -> InFlight {
    async move {
        let result = pipeline.run().await;
        (pipeline, result)
    }
    .boxed_local()
}

fn report(result: Result<Option<Preview>, SandboxError>, hub: &mut NotificationHub<Preview>) {
    match result {
        Ok(Some(preview)) => {
            let delivered = hub.publish(&preview);
            info!(alias = %preview.alias, delivered, "preview ready");
            printer::display(&format!("Illustrate of {} ready", preview.alias));
        }
        Ok(None) => {}
        Err(e) => {
            if matches!(e, SandboxError::SessionTerminated) {
                warn!("pig session terminated; state reset");
            }
            printer::print_sandbox_error(&e);
        }
    }
}

/// Serves the preview page on `port` and watches `script` until Ctrl-C.
pub async fn watch(env: SandboxEnvironment, script: PathBuf, port: u16) -> Result<()> {
    let listener = server::bind(port)
        .await
        .with_context(|| format!("Failed to listen on port {port}"))?;
    let addr = listener.local_addr().context("Failed to read listen address")?;
    let (tx, rx) = mpsc::channel(64);
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, server::router(tx)).await {
            warn!(error = %e, "preview server stopped");
        }
    });

    let watcher = ScriptWatcher::new(&script)?;
    printer::display(&format!("Watching {}, preview at http://{addr}/", script.display()));
    ReactorLoop::new(Pipeline::grunt(script, env), watcher, rx).run().await
}
