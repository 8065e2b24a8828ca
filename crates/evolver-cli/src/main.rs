//! Entry point for the `evolve` binary.
//!
//! All work happens in [`evolver_cli::run`] so the runtime can be driven from
//! tests with in-memory output streams.

use std::io::{self, StderrLock, StdoutLock};
use std::process::ExitCode;

fn main() -> ExitCode {
    let mut stdout: StdoutLock<'_> = io::stdout().lock();
    let mut stderr: StderrLock<'_> = io::stderr().lock();
    evolver_cli::run(std::env::args_os(), &mut stdout, &mut stderr)
}
