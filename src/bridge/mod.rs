//! Capability bridge
//!
//! The UI runs without OS access. It may only call the three capabilities
//! below, each of which answers with a value or a plain failure sentinel
//! (`None` / `false`). Internal errors and panics are logged here and never
//! cross over to the UI.

pub mod picker;
pub mod server;

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use crate::core::{validate_executable, DiscoveryResult, LaunchRequest, RetryPolicy};
use crate::discovery::DiscoveryClient;
use crate::host::Launcher;

pub use picker::{ConsolePicker, FilePicker, FixedPicker};

/// The privileged side of the bridge
pub struct Bridge {
    launcher: Arc<Launcher>,
    discovery: Arc<DiscoveryClient>,
    policy: RetryPolicy,
    picker: Arc<dyn FilePicker>,
    arguments: Vec<String>,
}

impl Bridge {
    pub fn new(
        launcher: Arc<Launcher>,
        discovery: Arc<DiscoveryClient>,
        policy: RetryPolicy,
        picker: Arc<dyn FilePicker>,
        arguments: Vec<String>,
    ) -> Self {
        Self {
            launcher,
            discovery,
            policy,
            picker,
            arguments,
        }
    }

    /// Ask the user for an executable; `None` if cancelled or unusable
    pub async fn select_executable_file(&self) -> Option<PathBuf> {
        let picker = Arc::clone(&self.picker);
        let picked = guarded("select_executable_file", async move {
            picker.pick_executable().await
        })
        .await?;

        match picked {
            Ok(Some(path)) => match validate_executable(&path) {
                Ok(path) => {
                    tracing::info!(path = %path.display(), "Executable selected");
                    Some(path)
                }
                Err(e) => {
                    tracing::warn!("Selected file rejected: {}", e);
                    None
                }
            },
            Ok(None) => {
                tracing::info!("File selection cancelled");
                None
            }
            Err(e) => {
                tracing::error!("File selection failed: {:#}", e);
                None
            }
        }
    }

    /// Launch `path` and report whether the session ran
    pub async fn launch_in_sandbox(&self, path: &str) -> bool {
        let path = match validate_executable(path) {
            Ok(path) => path,
            Err(e) => {
                tracing::warn!("Launch refused: {}", e);
                return false;
            }
        };

        let request = LaunchRequest::new(path, self.arguments.iter().cloned());
        let launcher = Arc::clone(&self.launcher);
        let outcome = guarded("launch_in_sandbox", async move { launcher.launch(&request).await }).await;

        match outcome {
            Some(Ok(report)) => {
                tracing::info!(
                    pid = report.pid,
                    state = %report.state,
                    exit_code = ?report.exit_code,
                    "Sandboxed session finished"
                );
                true
            }
            Some(Err(e)) => {
                tracing::warn!(reason = e.reason(), "Launch failed: {}", e);
                false
            }
            None => false,
        }
    }

    /// Companion service address; never fails
    pub async fn discover_service(&self) -> DiscoveryResult {
        let discovery = Arc::clone(&self.discovery);
        let policy = self.policy;
        guarded("discover_service", async move { discovery.discover(&policy).await })
            .await
            .unwrap_or_else(DiscoveryResult::fallback)
    }
}

/// Run one capability on its own task so a panic stays on this side
async fn guarded<F, T>(capability: &'static str, work: F) -> Option<T>
where
    F: Future<Output = T> + Send + 'static,
    T: Send + 'static,
{
    match tokio::spawn(work).await {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::error!(capability, "Capability aborted: {}", e);
            None
        }
    }
}
