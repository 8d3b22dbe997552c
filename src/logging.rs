//! Logging configuration using tracing

use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Target used for lines captured from launched programs
pub const CHILD_TARGET: &str = "gamebridge::child";

/// Initialize the logging system
pub fn init(verbose: bool, json: bool, log_file: Option<&Path>) -> anyhow::Result<()> {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    // Plain text, appended across runs. Sits directly on the filter so both
    // branches below share its type.
    let file_layer = match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            Some(fmt::layer().with_ansi(false).with_writer(Arc::new(file)))
        }
        None => None,
    };

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(file_layer)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init()?;
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(file_layer)
            .with(fmt::layer().with_writer(std::io::stderr))
            .try_init()?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_log_directory_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("no-such-dir").join("gamebridge.log");
        assert!(init(false, false, Some(&path)).is_err());
    }

    // The only test that installs the global subscriber
    #[test]
    fn test_file_layer_receives_events() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gamebridge.log");
        init(true, true, Some(&path)).unwrap();

        tracing::info!(target: CHILD_TARGET, pid = 42, "hello from the game");

        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.contains("hello from the game"));
        assert!(written.contains(CHILD_TARGET));
    }
}
