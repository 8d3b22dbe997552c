//! gamebridge - privileged host for legacy game sessions
//!
//! Provides:
//! - A single-session launcher that pins a program to one CPU core and
//!   cleans up every helper process it leaves behind
//! - Bounded-retry discovery of the local companion service
//! - A capability bridge that lets an unprivileged UI use both
//!   (`gamebridge serve`)

mod bridge;
mod cli;
mod core;
mod discovery;
mod host;
mod logging;
mod peer;
mod settings;

use clap::Parser;
use cli::{exit_codes, Cli, Commands};
use settings::Settings;

fn main() {
    std::process::exit(run());
}

fn run() -> i32 {
    let cli = Cli::parse();

    let settings = match Settings::load(cli.config.as_deref()) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            return exit_codes::UNEXPECTED_FAILURE;
        }
    };

    let log_file = cli.log_file.as_deref().or(settings.logging.file.as_deref());
    if let Err(e) = logging::init(cli.verbose, cli.json_output, log_file) {
        eprintln!("Failed to initialize logging: {:#}", e);
        return exit_codes::UNEXPECTED_FAILURE;
    }

    // Create tokio runtime for async commands
    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create runtime: {}", e);
            return exit_codes::UNEXPECTED_FAILURE;
        }
    };

    let result = rt.block_on(async {
        match cli.command {
            Commands::Serve(args) => cli::serve::run(args, &settings).await,
            Commands::Launch(args) => cli::launch::run(args, &settings).await,
            Commands::Discover(args) => cli::discover::run(args, &settings).await,
            Commands::Peer(args) => cli::peer::run(args).await,
        }
    });

    match result {
        Ok(()) => exit_codes::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            categorize_error(&e)
        }
    }
}

/// Categorize an error into the appropriate exit code
fn categorize_error(e: &anyhow::Error) -> i32 {
    if e.downcast_ref::<crate::core::InvalidExecutable>().is_some() {
        exit_codes::INVALID_EXECUTABLE
    } else if e.downcast_ref::<host::LaunchError>().is_some() {
        exit_codes::LAUNCH_FAILED
    } else {
        exit_codes::UNEXPECTED_FAILURE
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_categorize_error() {
        let invalid = anyhow::Error::from(crate::core::InvalidExecutable::NotFound(PathBuf::from("x")));
        assert_eq!(categorize_error(&invalid), exit_codes::INVALID_EXECUTABLE);

        let busy = anyhow::Error::from(host::LaunchError::AlreadyRunning);
        assert_eq!(categorize_error(&busy), exit_codes::LAUNCH_FAILED);

        assert_eq!(
            categorize_error(&anyhow::anyhow!("bind failed")),
            exit_codes::UNEXPECTED_FAILURE
        );
    }
}
