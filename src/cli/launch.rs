//! `gamebridge launch`

use std::future::Future;
use std::path::PathBuf;

use clap::Args;

use super::shutdown::ShutdownSignal;
use crate::core::{validate_executable, InvalidExecutable, LaunchRequest};
use crate::host::{ExitReport, Launcher, SessionHandle};
use crate::settings::Settings;

#[derive(Args, Debug)]
pub struct LaunchArgs {
    /// Program path, or a name to look up on PATH
    pub program: String,

    /// Arguments passed to the program (replaces the configured ones)
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub args: Vec<String>,
}

/// Resolve `program` to an executable file
pub fn resolve_program(program: &str) -> Result<PathBuf, InvalidExecutable> {
    let path = PathBuf::from(program);
    if path.components().count() > 1 || path.exists() {
        return validate_executable(path);
    }

    match which::which(program) {
        Ok(found) => validate_executable(found),
        Err(_) => Err(InvalidExecutable::NotFound(path)),
    }
}

pub async fn run(args: LaunchArgs, settings: &Settings) -> anyhow::Result<()> {
    let executable = resolve_program(&args.program)?;
    let arguments = if args.args.is_empty() {
        settings.launcher.arguments.clone()
    } else {
        args.args
    };

    // Registered before the launch so no stop request can slip past
    let mut signals = ShutdownSignal::new()?;

    let launcher = Launcher::new(settings.launcher_options());
    let request = LaunchRequest::new(executable, arguments);
    let session = launcher.start(&request)?;
    tracing::info!(
        session = %session.id(),
        pid = session.pid(),
        mask = %format!("{:#x}", session.affinity_mask()),
        "Program running; Ctrl-C stops it"
    );

    let report = supervise(&launcher, session, signals.recv()).await;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

/// Wait for `session`, stopping it with full cleanup if `stop` fires first
pub async fn supervise<F>(launcher: &Launcher, session: SessionHandle, stop: F) -> ExitReport
where
    F: Future<Output = &'static str>,
{
    let wait = session.wait();
    tokio::pin!(wait);

    tokio::select! {
        report = &mut wait => report,
        reason = stop => {
            tracing::info!(reason, "Stop requested; ending session");
            launcher.shutdown().await;
            wait.await
        }
    }
}
