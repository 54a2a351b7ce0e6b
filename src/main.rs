mod cli;

use std::process::ExitCode;

use anyhow::Result;
use cli::{Cli, Command, ScriptArgs};
use pigpen::{
    config::Config,
    controller::ExecutionController,
    printer,
    project::{load_param_file, merge_parameters, parse_parameter, Parameter, Project, Script},
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let args = Cli::parse();
    let cfg = Config::load();
    init_tracing(args.log.as_deref().or(cfg.get("PIGPEN_LOG").as_deref()));

    match dispatch(args, cfg).await {
        Ok(code) => ExitCode::from(u8::try_from(code).unwrap_or(1)),
        Err(e) => {
            printer::print_error(&e);
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(filter: Option<&str>) {
    let filter = EnvFilter::try_new(filter.unwrap_or("warn")).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

async fn dispatch(args: Cli, cfg: Config) -> Result<i32> {
    let root = match args.project_root {
        Some(root) => root,
        None => std::env::current_dir()?,
    };
    let project = Project::new(root);
    let controller = ExecutionController::new(project.clone(), cfg);

    match args.command {
        Command::Configure => {
            controller.install_and_configure().await?;
            printer::display("Your local environment is ready.");
            Ok(0)
        }
        Command::Run { script } => {
            let (script, params) = resolve(&project, &script)?;
            controller.run(&script, &params).await
        }
        Command::Validate { script } => {
            let (script, params) = resolve(&project, &script)?;
            controller.validate(&script, &params).await
        }
        Command::Illustrate { script, alias, skip_pruning } => {
            let (script, params) = resolve(&project, &script)?;
            controller.illustrate(&script, &alias, skip_pruning, &params).await
        }
        Command::Watch { script, port } => {
            let script = Script::resolve(&project, &script)?;
            controller.watch(&script, port).await?;
            Ok(0)
        }
    }
}

fn resolve(project: &Project, args: &ScriptArgs) -> Result<(Script, Vec<Parameter>)> {
    let script = Script::resolve(project, &args.script)?;
    let from_file = match &args.param_file {
        Some(path) => load_param_file(path)?,
        None => Vec::new(),
    };
    let from_cli = args
        .parameters
        .iter()
        .map(|p| parse_parameter(p))
        .collect::<Result<Vec<_>>>()?;
    Ok((script, merge_parameters(from_file, from_cli)))
}
