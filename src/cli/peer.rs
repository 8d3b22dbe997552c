//! `gamebridge peer`

use clap::{Args, Subcommand};

use crate::peer::{OfflinePeer, PeerClient, PeerModule};

#[derive(Args, Debug)]
pub struct PeerArgs {
    #[command(subcommand)]
    pub command: PeerCommand,
}

#[derive(Subcommand, Debug)]
pub enum PeerCommand {
    /// Show this node's peer id and addresses
    Info,

    /// Connect to another node, e.g. /ip4/10.0.0.9/tcp/9201/p2p/<peer-id>
    Connect { address: String },
}

pub async fn run(args: PeerArgs) -> anyhow::Result<()> {
    let output = execute(&PeerClient::new(OfflinePeer::new()), args.command).await?;
    println!("{output}");
    Ok(())
}

async fn execute<M: PeerModule>(client: &PeerClient<M>, command: PeerCommand) -> anyhow::Result<String> {
    match command {
        PeerCommand::Info => {
            let info = client.info().await?;
            Ok(serde_json::to_string_pretty(&info)?)
        }
        PeerCommand::Connect { address } => {
            let reply = client.connect(&address).await?;
            tracing::info!(%address, "Peer connect: {}", reply);
            Ok(reply)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::PeerError;

    #[tokio::test]
    async fn test_offline_node() {
        let client = PeerClient::new(OfflinePeer::new());

        let err = execute(&client, PeerCommand::Info).await.unwrap_err();
        assert!(matches!(err.downcast_ref::<PeerError>(), Some(PeerError::Unavailable)));

        let err = execute(
            &client,
            PeerCommand::Connect {
                address: "/ip4/10.0.0.9/tcp/9201/p2p/QmOther".to_string(),
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err.downcast_ref::<PeerError>(), Some(PeerError::Rejected(_))));
    }

    #[tokio::test]
    async fn test_bad_address_never_reaches_the_module() {
        let client = PeerClient::new(OfflinePeer::new());
        let err = execute(
            &client,
            PeerCommand::Connect {
                address: "10.0.0.9:9201".to_string(),
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err.downcast_ref::<PeerError>(), Some(PeerError::InvalidAddress(_))));
    }
}
