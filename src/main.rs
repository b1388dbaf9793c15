//! Binary entry point for the skylift CLI.

use std::io::{self, Write};
use std::process;

use camino::Utf8PathBuf;
use clap::Parser;
use thiserror::Error;

use skylift::{
    AutomationConfig, AutomationSession, ExecutionRequest, Executor, ExecutorError, Progress,
    RequestError, SessionError,
};

mod cli;

use cli::{Cli, RunCommand};

#[derive(Debug, Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("artifact path '{0}' does not exist")]
    MissingArtifact(Utf8PathBuf),
    #[error(transparent)]
    Request(#[from] RequestError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Execute(#[from] ExecutorError<SessionError>),
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let exit_code = match dispatch(cli).await {
        Ok(()) => 0,
        Err(err) => {
            report_error(&err);
            1
        }
    };

    process::exit(exit_code);
}

async fn dispatch(cli: Cli) -> Result<(), CliError> {
    match cli {
        Cli::Run(command) => run_command(command).await,
    }
}

async fn run_command(args: RunCommand) -> Result<(), CliError> {
    let progress = Progress::stderr(args.verbose);

    let request = ExecutionRequest::new(args.path, args.count)?;
    if !request.artifact().exists() {
        return Err(CliError::MissingArtifact(request.artifact().to_owned()));
    }

    let config = AutomationConfig::load_without_cli_args()
        .map_err(|err| CliError::Config(err.to_string()))?;
    let session = AutomationSession::connect(config, args.token, progress.clone()).await?;

    let executor = Executor::new(session, progress.clone());
    executor.execute(&request).await?;

    progress.info("skylift finished successfully");
    Ok(())
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "{err}").ok();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_error_renders_cli_error() {
        let mut buffer = Vec::new();
        let err = CliError::MissingArtifact(Utf8PathBuf::from("payload.zip"));
        write_error(&mut buffer, &err);
        let rendered = String::from_utf8(buffer).unwrap_or_default();

        assert!(
            rendered.contains("artifact path 'payload.zip' does not exist"),
            "rendered: {rendered}"
        );
    }

    #[tokio::test]
    async fn run_command_rejects_unsupported_extension() {
        let result = run_command(RunCommand {
            path: Utf8PathBuf::from("script.ps1"),
            count: 1,
            token: String::from("token"),
            verbose: false,
        })
        .await;

        assert!(
            matches!(
                result,
                Err(CliError::Request(RequestError::UnsupportedArtifact { ref extension }))
                    if extension == "ps1"
            ),
            "unexpected result: {result:?}"
        );
    }

    #[tokio::test]
    async fn run_command_rejects_missing_artifact() {
        let dir = tempfile::tempdir().unwrap_or_else(|err| panic!("tempdir: {err}"));
        let path = Utf8PathBuf::from_path_buf(dir.path().join("absent.zip"))
            .unwrap_or_else(|path| panic!("non-utf8 temp path: {}", path.display()));

        let result = run_command(RunCommand {
            path,
            count: 1,
            token: String::from("token"),
            verbose: false,
        })
        .await;

        assert!(
            matches!(result, Err(CliError::MissingArtifact(_))),
            "unexpected result: {result:?}"
        );
    }
}
