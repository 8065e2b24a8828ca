//! Command-line runtime for the `evolve` binary.
//!
//! The runtime parses arguments, installs telemetry, loads the request and
//! policy documents, discovers plugins, and hands everything to the
//! [`evolver_plugins::Orchestrator`]. The outcome is written to stdout as a
//! JSON report; logs go to stderr.
//!
//! Exit codes: `0` when a candidate was accepted, `1` when no candidate was
//! eligible or every candidate was rejected, and `2` for usage errors and
//! unreadable input documents.

use std::ffi::OsString;
use std::io::Write;
use std::process::ExitCode;

use clap::Parser;
use evolver_plugins::process::ProcessExecutor;
use evolver_plugins::{EvolutionRequest, Orchestrator, Policy, PluginRegistry};
use tracing::{debug, info};

mod cli;
mod errors;
mod output;
mod telemetry;


use cli::Cli;
use errors::AppError;
use output::{Report, write_report};

/// Tracing target for the CLI runtime.
const CLI_TARGET: &str = "evolver_cli";

/// Runs the CLI using the provided arguments and output streams.
#[must_use]
pub fn run<I, W, E>(args: I, stdout: &mut W, stderr: &mut E) -> ExitCode
where
    I: IntoIterator<Item = OsString>,
    W: Write,
    E: Write,
{
    let result = Cli::try_parse_from(args)
        .map_err(AppError::CliUsage)
        .and_then(|cli| execute(&cli, stdout));

    match result {
        Ok(exit_code) => exit_code,
        Err(AppError::CliUsage(error)) if !error.use_stderr() => {
            drop(write!(stdout, "{error}"));
            ExitCode::SUCCESS
        }
        Err(error) => {
            drop(writeln!(stderr, "{error}"));
            error.exit_code()
        }
    }
}

fn execute<W: Write>(cli: &Cli, stdout: &mut W) -> Result<ExitCode, AppError> {
    telemetry::initialise(&cli.log_filter, cli.log_format)?;

    let request = EvolutionRequest::load(&cli.request).map_err(AppError::LoadRequest)?;
    let policy = Policy::load(&cli.policy).map_err(AppError::LoadPolicy)?;
    let registry = PluginRegistry::discover(&cli.plugins_dirs);
    debug!(
        target: CLI_TARGET,
        plugins = registry.len(),
        skipped = registry.warnings().len(),
        "registry loaded"
    );

    let executor = ProcessExecutor::new();
    let outcome = Orchestrator::new(&registry, &policy, &executor)
        .with_commit(cli.commit.as_str())
        .evolve(&request, &cli.output_dir);

    let report = Report::from_outcome(&outcome);
    write_report(&report, stdout)?;
    let exit_code = report.exit_code();
    info!(
        target: CLI_TARGET,
        api = %request.api,
        accepted = outcome.is_ok(),
        "evolution run finished"
    );
    Ok(exit_code)
}
