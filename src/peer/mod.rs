//! Peer-to-peer module boundary
//!
//! The networking module itself is opaque. It answers with loosely typed
//! text (JSON for peer info, free text for connect results), which is turned
//! into typed records here before anything else in the host sees it.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;

/// Reply the module gives when no node is running
pub const NO_NODE_REPLY: &str = "No P2P node available";

/// Buffered notifications per subscriber
const MESSAGE_BUFFER: usize = 64;

#[derive(Debug, Error)]
pub enum PeerError {
    #[error("No peer-to-peer node is running")]
    Unavailable,

    #[error("Malformed peer info: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Invalid peer address: {0}")]
    InvalidAddress(String),

    #[error("Peer connection rejected: {0}")]
    Rejected(String),
}

/// Surface the networking module exposes
#[async_trait]
pub trait PeerModule: Send + Sync {
    /// JSON text `{id, addresses, connected}` or an error sentence
    async fn peer_info_json(&self) -> String;

    /// Result text, or error text embedded in the same string
    async fn connect_to_peer(&self, address: &str) -> String;

    /// Stream of messages received from peers
    fn subscribe(&self) -> broadcast::Receiver<String>;
}

#[async_trait]
impl<M: PeerModule + ?Sized> PeerModule for Arc<M> {
    async fn peer_info_json(&self) -> String {
        (**self).peer_info_json().await
    }

    async fn connect_to_peer(&self, address: &str) -> String {
        (**self).connect_to_peer(address).await
    }

    fn subscribe(&self) -> broadcast::Receiver<String> {
        (**self).subscribe()
    }
}

/// This node as seen by the networking module
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerInfo {
    pub id: String,
    pub addresses: Vec<String>,
    #[serde(default)]
    pub connected: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl PeerInfo {
    pub fn parse(text: &str) -> Result<Self, PeerError> {
        if text.trim() == NO_NODE_REPLY {
            return Err(PeerError::Unavailable);
        }
        Ok(serde_json::from_str(text)?)
    }
}

/// A multiaddr-style peer address ending in `/p2p/<peer-id>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerAddress {
    raw: String,
    peer_id: String,
}

impl PeerAddress {
    pub fn parse(text: &str) -> Result<Self, PeerError> {
        let raw = text.trim();
        if !raw.starts_with('/') {
            return Err(PeerError::InvalidAddress(format!(
                "'{raw}' does not start with '/'"
            )));
        }

        let peer_id = raw
            .rsplit_once("/p2p/")
            .map(|(_, id)| id)
            .filter(|id| !id.is_empty() && !id.contains('/'))
            .ok_or_else(|| PeerError::InvalidAddress(format!("'{raw}' has no /p2p/<id> part")))?;

        Ok(Self {
            raw: raw.to_string(),
            peer_id: peer_id.to_string(),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }
}

/// Typed wrapper around a [`PeerModule`]
pub struct PeerClient<M> {
    module: M,
}

impl<M: PeerModule> PeerClient<M> {
    pub fn new(module: M) -> Self {
        Self { module }
    }

    pub async fn info(&self) -> Result<PeerInfo, PeerError> {
        PeerInfo::parse(&self.module.peer_info_json().await)
    }

    /// Connect to `address`, refusing our own peer id
    pub async fn connect(&self, address: &str) -> Result<String, PeerError> {
        let address = PeerAddress::parse(address)?;

        if let Ok(own) = self.info().await {
            if own.id == address.peer_id() {
                return Err(PeerError::Rejected("cannot connect to own address".to_string()));
            }
            if own.connected.iter().any(|peer| peer == address.peer_id()) {
                return Ok(format!("already connected to {}", address.peer_id()));
            }
        }

        let reply = self.module.connect_to_peer(address.as_str()).await;
        if reply.trim_start().to_lowercase().starts_with("error") || reply.trim() == NO_NODE_REPLY {
            return Err(PeerError::Rejected(reply));
        }
        Ok(reply)
    }
}

/// Stand-in used when no networking node runs in this host
pub struct OfflinePeer {
    messages: broadcast::Sender<String>,
}

impl OfflinePeer {
    pub fn new() -> Self {
        let (messages, _) = broadcast::channel(MESSAGE_BUFFER);
        Self { messages }
    }
}

impl Default for OfflinePeer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PeerModule for OfflinePeer {
    async fn peer_info_json(&self) -> String {
        NO_NODE_REPLY.to_string()
    }

    async fn connect_to_peer(&self, _address: &str) -> String {
        NO_NODE_REPLY.to_string()
    }

    fn subscribe(&self) -> broadcast::Receiver<String> {
        self.messages.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakePeer {
        info: String,
        reply: String,
        messages: broadcast::Sender<String>,
    }

    impl FakePeer {
        fn new(info: &str, reply: &str) -> Self {
            Self {
                info: info.to_string(),
                reply: reply.to_string(),
                messages: broadcast::channel(4).0,
            }
        }
    }

    #[async_trait]
    impl PeerModule for FakePeer {
        async fn peer_info_json(&self) -> String {
            self.info.clone()
        }

        async fn connect_to_peer(&self, _address: &str) -> String {
            self.reply.clone()
        }

        fn subscribe(&self) -> broadcast::Receiver<String> {
            self.messages.subscribe()
        }
    }

    const INFO: &str = r#"{"id":"QmSelf","addresses":["/ip4/10.0.0.5/tcp/9201/p2p/QmSelf"],"connected":["QmOld"],"name":"host-a"}"#;

    #[test]
    fn test_parse_peer_info() {
        let info = PeerInfo::parse(INFO).unwrap();
        assert_eq!(info.id, "QmSelf");
        assert_eq!(info.addresses.len(), 1);
        assert_eq!(info.connected, vec!["QmOld".to_string()]);
        assert_eq!(info.name.as_deref(), Some("host-a"));
    }

    #[test]
    fn test_parse_peer_info_errors() {
        assert!(matches!(PeerInfo::parse(NO_NODE_REPLY), Err(PeerError::Unavailable)));
        assert!(matches!(PeerInfo::parse("{\"id\":1}"), Err(PeerError::Malformed(_))));
        assert!(matches!(PeerInfo::parse("garbage"), Err(PeerError::Malformed(_))));
    }

    #[test]
    fn test_parse_peer_address() {
        let addr = PeerAddress::parse("/ip4/10.0.0.9/tcp/9201/p2p/QmOther").unwrap();
        assert_eq!(addr.peer_id(), "QmOther");
        assert_eq!(addr.as_str(), "/ip4/10.0.0.9/tcp/9201/p2p/QmOther");

        assert!(PeerAddress::parse("10.0.0.9:9201").is_err());
        assert!(PeerAddress::parse("/ip4/10.0.0.9/tcp/9201").is_err());
        assert!(PeerAddress::parse("/ip4/10.0.0.9/tcp/9201/p2p/").is_err());
    }

    #[tokio::test]
    async fn test_connect_refuses_own_address() {
        let client = PeerClient::new(FakePeer::new(INFO, "Connected"));
        let err = client
            .connect("/ip4/10.0.0.5/tcp/9201/p2p/QmSelf")
            .await
            .unwrap_err();
        assert!(matches!(err, PeerError::Rejected(_)));
    }

    #[tokio::test]
    async fn test_connect_reports_module_errors() {
        let client = PeerClient::new(FakePeer::new(INFO, "Error connecting to peer: timeout"));
        let err = client
            .connect("/ip4/10.0.0.9/tcp/9201/p2p/QmOther")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("timeout"));

        let client = PeerClient::new(FakePeer::new(INFO, "Connected"));
        let reply = client.connect("/ip4/10.0.0.9/tcp/9201/p2p/QmOther").await.unwrap();
        assert_eq!(reply, "Connected");

        let reply = client.connect("/ip4/10.0.0.8/tcp/9201/p2p/QmOld").await.unwrap();
        assert!(reply.contains("already connected"));
    }

    #[tokio::test]
    async fn test_offline_peer() {
        let client = PeerClient::new(OfflinePeer::new());
        assert!(matches!(client.info().await, Err(PeerError::Unavailable)));
        assert!(client
            .connect("/ip4/10.0.0.9/tcp/9201/p2p/QmOther")
            .await
            .is_err());
    }
}
