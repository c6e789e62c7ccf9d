use anyhow::Result;
use clap::Parser;
use stagerun::cli::{Command, RootArgs};
use stagerun::exit_code::ExitCode;
use stagerun::workflow::{self, RunContext};
use tracing_subscriber::EnvFilter;

fn main() -> std::process::ExitCode {
    let args = RootArgs::parse();
    init_logging(args.verbose);
    match dispatch(&args) {
        Ok(code) => code.into(),
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::SystemError.into()
        }
    }
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn dispatch(args: &RootArgs) -> Result<ExitCode> {
    let load = || RunContext::load(args);
    match &args.command {
        Command::Init(init) => workflow::run_init(init),
        Command::Run(run) => workflow::run_batch(&mut load()?, run),
        Command::Status(status) => workflow::run_status(&load()?, status),
        Command::Export(export) => workflow::run_export(&load()?, export),
        Command::Mark(mark) => workflow::run_mark(&load()?, mark),
        Command::ClearCompleted(clear) => workflow::run_clear_completed(&load()?, clear),
    }
}
