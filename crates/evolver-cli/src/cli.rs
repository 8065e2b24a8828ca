//! Command-line arguments for the `evolve` binary.
//!
//! Every option can also be supplied through an environment variable; an
//! explicit flag wins over the environment, which wins over the built-in
//! default.

use std::path::PathBuf;

use clap::Parser;

use crate::telemetry::LogFormat;

/// Default plugin root, relative to the working directory.
pub(crate) const DEFAULT_PLUGINS_DIR: &str = "plugins";
/// Default policy document.
pub(crate) const DEFAULT_POLICY: &str = "policies/default.json";
/// Default output directory.
pub(crate) const DEFAULT_OUTPUT_DIR: &str = "out";
/// Default log filter directive.
pub(crate) const DEFAULT_LOG_FILTER: &str = "info";

/// Selects, runs, and validates a generator plugin for one request.
#[derive(Parser, Debug)]
#[command(name = "evolve", version)]
pub(crate) struct Cli {
    /// Path to the request document.
    #[arg(value_name = "REQUEST")]
    pub(crate) request: PathBuf,
    /// Plugin root directory. Repeat to add roots; later roots override
    /// earlier ones for plugins with the same name.
    #[arg(
        long = "plugins-dir",
        value_name = "DIR",
        env = "EVOLVE_PLUGINS_DIR",
        value_delimiter = ',',
        default_value = DEFAULT_PLUGINS_DIR
    )]
    pub(crate) plugins_dirs: Vec<PathBuf>,
    /// Policy document controlling ranking, trust, limits, and thresholds.
    #[arg(long, value_name = "FILE", env = "EVOLVE_POLICY", default_value = DEFAULT_POLICY)]
    pub(crate) policy: PathBuf,
    /// Directory receiving trial outputs and the run summary.
    #[arg(
        long = "output-dir",
        value_name = "DIR",
        env = "EVOLVE_OUTPUT_DIR",
        default_value = DEFAULT_OUTPUT_DIR
    )]
    pub(crate) output_dir: PathBuf,
    /// Provenance string recorded in the run summary.
    #[arg(long, value_name = "SHA", env = "GITHUB_SHA", default_value = "")]
    pub(crate) commit: String,
    /// Tracing filter directive, for example `evolver_plugins=debug`.
    #[arg(
        long = "log-filter",
        value_name = "FILTER",
        env = "EVOLVE_LOG_FILTER",
        default_value = DEFAULT_LOG_FILTER
    )]
    pub(crate) log_filter: String,
    /// Log line format written to stderr (`json` or `compact`).
    #[arg(
        long = "log-format",
        value_name = "FORMAT",
        env = "EVOLVE_LOG_FORMAT",
        default_value_t = LogFormat::Json
    )]
    pub(crate) log_format: LogFormat,
}
