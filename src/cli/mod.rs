//! Command-line interface definitions for the `skylift` binary.
//!
//! This module centralises the clap parser structures so both the main binary
//! and the build script can reuse them when generating the manual page.

use camino::Utf8PathBuf;
use clap::Parser;

/// Top-level CLI for the `skylift` binary.
#[derive(Debug, Parser)]
#[command(
    name = "skylift",
    about = "Upload script packages into a cloud Automation account and trigger their execution",
    arg_required_else_help = true
)]
pub(crate) enum Cli {
    /// Upload an artifact and trigger one or more executions.
    #[command(
        name = "run",
        about = "Upload an artifact and trigger one or more executions"
    )]
    Run(RunCommand),
}

/// Arguments for the `skylift run` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct RunCommand {
    /// Path to the artifact to upload.
    ///
    /// A `.zip` file is imported as a module (fire-and-forget); a `.whl`
    /// file first replaces the account's interpreter package and waits for
    /// the import to complete before the per-run imports are triggered.
    #[arg(long, value_name = "PATH")]
    pub(crate) path: Utf8PathBuf,
    /// Number of executions to trigger.
    #[arg(short, long, value_name = "N", default_value_t = 1)]
    pub(crate) count: u32,
    /// Bearer access token for the Automation control plane.
    ///
    /// The token is treated as opaque; skylift never refreshes it and never
    /// writes it to any output.
    #[arg(long, env = "SKYLIFT_ACCESS_TOKEN", hide_env_values = true)]
    pub(crate) token: String,
    /// Emit per-step progress detail.
    #[arg(short, long)]
    pub(crate) verbose: bool,
}
