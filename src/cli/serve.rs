//! `gamebridge serve`

use std::path::PathBuf;
use std::sync::Arc;

use clap::Args;

use super::shutdown::ShutdownSignal;
use crate::bridge::{server, Bridge, ConsolePicker, FilePicker, FixedPicker};
use crate::discovery::DiscoveryClient;
use crate::host::Launcher;
use crate::peer::{OfflinePeer, PeerClient, PeerModule};
use crate::settings::Settings;

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Address the bridge listens on
    #[arg(long)]
    pub bind: Option<String>,

    /// Answer every file selection with this executable
    #[arg(long)]
    pub executable: Option<PathBuf>,
}

fn picker_for(args: &ServeArgs, settings: &Settings) -> Arc<dyn FilePicker> {
    match args
        .executable
        .clone()
        .or_else(|| settings.launcher.default_executable.clone())
    {
        Some(path) => Arc::new(FixedPicker::new(Some(path))),
        None => Arc::new(ConsolePicker),
    }
}

pub async fn run(args: ServeArgs, settings: &Settings) -> anyhow::Result<()> {
    let mut signals = ShutdownSignal::new()?;
    let launcher = Arc::new(Launcher::new(settings.launcher_options()));
    let discovery = Arc::new(DiscoveryClient::new(settings.discovery.url.clone())?);
    let policy = settings.retry_policy();

    tracing::info!(url = discovery.url(), "Looking up companion service");
    let service = discovery.discover(&policy).await;
    if service.is_fallback() {
        tracing::warn!(%service, "Companion service not found; UI will use the fallback address");
    } else {
        tracing::info!(%service, "Companion service");
    }

    let peer: Arc<dyn PeerModule> = Arc::new(OfflinePeer::new());
    match PeerClient::new(Arc::clone(&peer)).info().await {
        Ok(info) => tracing::info!(id = %info.id, addresses = ?info.addresses, "Peer node ready"),
        Err(e) => tracing::info!("Peer networking unavailable: {}", e),
    }

    let bridge = Arc::new(Bridge::new(
        Arc::clone(&launcher),
        discovery,
        policy,
        picker_for(&args, settings),
        settings.launcher.arguments.clone(),
    ));

    let bind = args.bind.as_deref().unwrap_or(&settings.bridge.bind);
    let listener = server::bind(bind).await?;

    tokio::select! {
        _ = server::serve(listener, bridge, peer) => {}
        signal = signals.recv() => tracing::info!(signal, "Shutting down"),
    }

    stop_session(&launcher).await;
    Ok(())
}

/// Same cleanup as a natural exit
async fn stop_session(launcher: &Launcher) {
    if let Some(active) = launcher.active().filter(|handle| !handle.state.is_terminal()) {
        tracing::info!(
            pid = active.pid,
            core = ?active.pinned_core(),
            state = %active.state,
            "Stopping running session"
        );
    }
    launcher.shutdown().await;
}
