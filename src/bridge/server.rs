//! Bridge transport for the UI process.
//!
//! Listens on a loopback TCP port and speaks newline-delimited JSON:
//! ```json
//! {"id":1,"op":"select_executable_file"}
//! {"id":2,"op":"launch_in_sandbox","path":"C:\\Games\\war3.exe"}
//! {"id":3,"op":"discover_service"}
//! ```
//! Every request gets `{"id":..,"result":..}` back, possibly out of order.
//! Messages from the peer module are pushed as `{"event":"message","data":..}`.
//! A line longer than [`MAX_REQUEST_LINE`] closes the connection.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};

use super::Bridge;
use crate::peer::PeerModule;

/// Default bridge address
pub const DEFAULT_BIND: &str = "127.0.0.1:19400";

/// Pending outbound lines per connection
const OUTBOUND_BUFFER: usize = 32;

/// Longest request line accepted, newline excluded
pub const MAX_REQUEST_LINE: usize = 64 * 1024;

/// Pause after a failed accept (e.g. out of file descriptors)
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// The named operations a UI may invoke
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Capability {
    SelectExecutableFile,
    LaunchInSandbox { path: String },
    DiscoverService,
}

#[derive(Debug, Serialize)]
struct Response {
    id: Value,
    result: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'static str>,
}

#[derive(Debug, Serialize)]
struct Event<'a> {
    event: &'static str,
    data: &'a str,
}

/// Parse one request line into its id and capability
pub fn parse_request(line: &str) -> Option<(Value, Capability)> {
    let value: Value = serde_json::from_str(line).ok()?;
    let id = value.get("id").cloned().unwrap_or(Value::Null);
    let capability = serde_json::from_value(value).ok()?;
    Some((id, capability))
}

/// Bind the bridge listener
pub async fn bind(addr: &str) -> anyhow::Result<TcpListener> {
    let listener = TcpListener::bind(addr).await?;
    let local = listener.local_addr()?;
    if !local.ip().is_loopback() {
        tracing::warn!(%local, "Bridge is reachable from other machines");
    }
    tracing::info!(%local, "Bridge listening");
    Ok(listener)
}

/// Accept UI connections until the listener fails
pub async fn serve(listener: TcpListener, bridge: Arc<Bridge>, peer: Arc<dyn PeerModule>) {
    loop {
        let (stream, remote) = match listener.accept().await {
            Ok(conn) => conn,
            Err(e) => {
                tracing::warn!("Bridge accept error: {e}");
                tokio::time::sleep(ACCEPT_BACKOFF).await;
                continue;
            }
        };

        tracing::info!(%remote, "UI connected");
        let bridge = Arc::clone(&bridge);
        let messages = peer.subscribe();
        tokio::spawn(handle_connection(stream, remote, bridge, messages));
    }
}

async fn handle_connection(
    stream: TcpStream,
    remote: SocketAddr,
    bridge: Arc<Bridge>,
    mut messages: broadcast::Receiver<String>,
) {
    let (reader, mut writer) = stream.into_split();
    let (tx, mut rx) = mpsc::channel::<String>(OUTBOUND_BUFFER);

    let writer_task = tokio::spawn(async move {
        while let Some(line) = rx.recv().await {
            if writer.write_all(line.as_bytes()).await.is_err()
                || writer.write_all(b"\n").await.is_err()
            {
                break;
            }
        }
    });

    let events_tx = tx.clone();
    let events_task = tokio::spawn(async move {
        loop {
            match messages.recv().await {
                Ok(message) => {
                    let event = Event {
                        event: "message",
                        data: &message,
                    };
                    let Ok(line) = serde_json::to_string(&event) else {
                        continue;
                    };
                    if events_tx.send(line).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(%remote, skipped, "UI fell behind on peer messages");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        let limit = MAX_REQUEST_LINE as u64 + 1;
        match (&mut reader).take(limit).read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(%remote, "Bridge read error: {e}");
                break;
            }
        }

        if buf.len() > MAX_REQUEST_LINE && !buf.ends_with(b"\n") {
            tracing::warn!(%remote, limit = MAX_REQUEST_LINE, "Bridge request too large; closing");
            send(&tx, Response {
                id: Value::Null,
                result: Value::Null,
                error: Some("request too large"),
            })
            .await;
            break;
        }

        let line = String::from_utf8_lossy(&buf);
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let Some((id, capability)) = parse_request(line) else {
            tracing::warn!(%remote, "Bridge: unrecognised request: {line}");
            send(&tx, Response {
                id: Value::Null,
                result: Value::Null,
                error: Some("malformed request"),
            })
            .await;
            continue;
        };

        tracing::debug!(%remote, ?capability, "Bridge request");
        let bridge = Arc::clone(&bridge);
        let tx = tx.clone();
        tokio::spawn(async move {
            let result = dispatch(&bridge, capability).await;
            send(&tx, Response {
                id,
                result,
                error: None,
            })
            .await;
        });
    }

    tracing::info!(%remote, "UI disconnected");
    events_task.abort();
    drop(tx);
    let _ = writer_task.await;
}

async fn dispatch(bridge: &Bridge, capability: Capability) -> Value {
    match capability {
        Capability::SelectExecutableFile => bridge
            .select_executable_file()
            .await
            .map(|path| Value::String(path.display().to_string()))
            .unwrap_or(Value::Null),
        Capability::LaunchInSandbox { path } => Value::Bool(bridge.launch_in_sandbox(&path).await),
        Capability::DiscoverService => {
            serde_json::to_value(bridge.discover_service().await).unwrap_or(Value::Null)
        }
    }
}

async fn send(tx: &mpsc::Sender<String>, response: Response) {
    match serde_json::to_string(&response) {
        Ok(line) => {
            let _ = tx.send(line).await;
        }
        Err(e) => tracing::error!("Could not encode bridge response: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::FixedPicker;
    use crate::core::RetryPolicy;
    use crate::discovery::DiscoveryClient;
    use crate::host::Launcher;
    use async_trait::async_trait;
    use std::time::Duration;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

    struct ChattyPeer {
        messages: broadcast::Sender<String>,
    }

    #[async_trait]
    impl PeerModule for ChattyPeer {
        async fn peer_info_json(&self) -> String {
            "{}".to_string()
        }

        async fn connect_to_peer(&self, _address: &str) -> String {
            "Connected".to_string()
        }

        fn subscribe(&self) -> broadcast::Receiver<String> {
            self.messages.subscribe()
        }
    }

    async fn start_server() -> (SocketAddr, broadcast::Sender<String>) {
        let (messages, _) = broadcast::channel(8);
        let peer = Arc::new(ChattyPeer {
            messages: messages.clone(),
        });
        let bridge = Arc::new(Bridge::new(
            Arc::new(Launcher::default()),
            Arc::new(DiscoveryClient::new("http://127.0.0.1:9/server-info").unwrap()),
            RetryPolicy::new(1, Duration::from_millis(50)),
            Arc::new(FixedPicker::new(None)),
            Vec::new(),
        ));

        let listener = bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(serve(listener, bridge, peer));
        (addr, messages)
    }

    async fn roundtrip(
        lines: &mut tokio::io::Lines<BufReader<tokio::net::tcp::OwnedReadHalf>>,
        writer: &mut tokio::net::tcp::OwnedWriteHalf,
        request: &str,
    ) -> Value {
        writer.write_all(format!("{request}\n").as_bytes()).await.unwrap();
        let line = tokio::time::timeout(Duration::from_secs(5), lines.next_line())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        serde_json::from_str(&line).unwrap()
    }

    #[test]
    fn test_parse_request() {
        assert_eq!(
            parse_request(r#"{"id":7,"op":"discover_service"}"#),
            Some((Value::from(7), Capability::DiscoverService))
        );
        assert_eq!(
            parse_request(r#"{"id":"a","op":"launch_in_sandbox","path":"/g/game"}"#),
            Some((
                Value::from("a"),
                Capability::LaunchInSandbox {
                    path: "/g/game".to_string()
                }
            ))
        );
        assert_eq!(
            parse_request(r#"{"op":"select_executable_file"}"#),
            Some((Value::Null, Capability::SelectExecutableFile))
        );
    }

    #[test]
    fn test_parse_request_rejects_unknown_ops() {
        assert_eq!(parse_request(r#"{"id":1,"op":"run_shell","cmd":"rm"}"#), None);
        assert_eq!(parse_request(r#"{"id":1,"op":"launch_in_sandbox"}"#), None);
        assert_eq!(parse_request("not json"), None);
    }

    #[tokio::test]
    async fn test_requests_over_tcp() {
        let (addr, _messages) = start_server().await;
        let stream = TcpStream::connect(addr).await.unwrap();
        let (reader, mut writer) = stream.into_split();
        let mut lines = BufReader::new(reader).lines();

        let reply = roundtrip(&mut lines, &mut writer, r#"{"id":1,"op":"discover_service"}"#).await;
        assert_eq!(reply["id"], 1);
        assert_eq!(reply["result"]["host"], "127.0.0.1");
        assert_eq!(reply["result"]["port"], 8080);

        let reply = roundtrip(&mut lines, &mut writer, r#"{"id":2,"op":"select_executable_file"}"#).await;
        assert_eq!(reply["id"], 2);
        assert!(reply["result"].is_null());

        let reply = roundtrip(
            &mut lines,
            &mut writer,
            r#"{"id":3,"op":"launch_in_sandbox","path":"/no/such/game"}"#,
        )
        .await;
        assert_eq!(reply["id"], 3);
        assert_eq!(reply["result"], false);

        let reply = roundtrip(&mut lines, &mut writer, "{broken").await;
        assert!(reply["id"].is_null());
        assert_eq!(reply["error"], "malformed request");
    }

    #[tokio::test]
    async fn test_peer_messages_are_pushed() {
        let (addr, messages) = start_server().await;
        let stream = TcpStream::connect(addr).await.unwrap();
        let (reader, mut writer) = stream.into_split();
        let mut lines = BufReader::new(reader).lines();

        // Ensures the connection is subscribed before publishing
        roundtrip(&mut lines, &mut writer, r#"{"id":1,"op":"select_executable_file"}"#).await;

        messages.send("game hosted by QmOther".to_string()).unwrap();
        let line = tokio::time::timeout(Duration::from_secs(5), lines.next_line())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        let event: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(event["event"], "message");
        assert_eq!(event["data"], "game hosted by QmOther");
    }

    #[tokio::test]
    async fn test_oversized_request_closes_the_connection() {
        let (addr, _messages) = start_server().await;
        let stream = TcpStream::connect(addr).await.unwrap();
        let (reader, mut writer) = stream.into_split();
        let mut lines = BufReader::new(reader).lines();

        // One byte over the limit and still no newline
        writer.write_all(&vec![b'a'; MAX_REQUEST_LINE + 1]).await.unwrap();

        let line = tokio::time::timeout(Duration::from_secs(5), lines.next_line())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        let reply: Value = serde_json::from_str(&line).unwrap();
        assert!(reply["id"].is_null());
        assert_eq!(reply["error"], "request too large");

        let end = tokio::time::timeout(Duration::from_secs(5), lines.next_line())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(end, None);
    }

    #[tokio::test]
    async fn test_request_at_the_limit_is_accepted() {
        let (addr, _messages) = start_server().await;
        let stream = TcpStream::connect(addr).await.unwrap();
        let (reader, mut writer) = stream.into_split();
        let mut lines = BufReader::new(reader).lines();

        let head = r#"{"id":1,"op":"discover_service","pad":""#;
        let tail = r#""}"#;
        let pad = "x".repeat(MAX_REQUEST_LINE - head.len() - tail.len());
        let request = format!("{head}{pad}{tail}");
        assert_eq!(request.len(), MAX_REQUEST_LINE);

        let reply = roundtrip(&mut lines, &mut writer, &request).await;
        assert_eq!(reply["id"], 1);
        assert_eq!(reply["result"]["port"], 8080);
    }
}
