//! WebSocket exec transport (`v5.channel.k8s.io`).
//!
//! Each binary message starts with a channel byte followed by payload:
//! 1 is stdout, 2 is stderr, 3 is the JSON status. The server closes the
//! socket once the command has exited and the status has been sent.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::StatusCode;
use reqwest::header::{
    CONNECTION, SEC_WEBSOCKET_ACCEPT, SEC_WEBSOCKET_KEY, SEC_WEBSOCKET_PROTOCOL,
    SEC_WEBSOCKET_VERSION, UPGRADE,
};
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::error::ProtocolError;
use tokio_tungstenite::tungstenite::handshake::client::generate_key;
use tokio_tungstenite::tungstenite::handshake::derive_accept_key;
use tokio_tungstenite::tungstenite::protocol::Role;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tracing::{debug, instrument, trace};

use super::status::StatusProtocol;
use super::{
    ExecTarget, RemoteCommandResult, StreamTransport, classify_request_error, upgrade_refused,
};
use crate::cluster::KubeClient;
use crate::error::StreamError;

/// Subprotocol offered during the upgrade.
pub const V5_CHANNEL_PROTOCOL: &str = "v5.channel.k8s.io";

const STDOUT_CHANNEL: u8 = 1;
const STDERR_CHANNEL: u8 = 2;
const STATUS_CHANNEL: u8 = 3;

/// Exec over a WebSocket upgrade of a `GET` request.
pub struct WebSocketTransport {
    client: Arc<KubeClient>,
}

impl WebSocketTransport {
    #[must_use]
    pub fn new(client: Arc<KubeClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl StreamTransport for WebSocketTransport {
    fn name(&self) -> &'static str {
        "websocket"
    }

    #[instrument(skip_all, fields(pod = %target.pod))]
    async fn stream(
        &self,
        target: &ExecTarget,
        command: &[String],
        output: &mut RemoteCommandResult,
    ) -> Result<(), StreamError> {
        let url = self
            .client
            .exec_url(&target.namespace, &target.pod, &target.container, command)
            .map_err(|e| StreamError::Protocol(e.to_string()))?;

        let key = generate_key();
        let response = self
            .client
            .upgrade_client()
            .get(url)
            .header(CONNECTION, "Upgrade")
            .header(UPGRADE, "websocket")
            .header(SEC_WEBSOCKET_VERSION, "13")
            .header(SEC_WEBSOCKET_KEY, &key)
            .header(SEC_WEBSOCKET_PROTOCOL, V5_CHANNEL_PROTOCOL)
            .send()
            .await
            .map_err(classify_request_error)?;

        if response.status() != StatusCode::SWITCHING_PROTOCOLS {
            return Err(upgrade_refused(response).await);
        }

        let negotiated = response
            .headers()
            .get(SEC_WEBSOCKET_PROTOCOL)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        if negotiated != V5_CHANNEL_PROTOCOL {
            return Err(StreamError::UpgradeFailed {
                status: Some(StatusCode::SWITCHING_PROTOCOLS.as_u16()),
                reason: format!("server negotiated unsupported subprotocol '{negotiated}'"),
            });
        }

        let accept_ok = response
            .headers()
            .get(SEC_WEBSOCKET_ACCEPT)
            .is_some_and(|v| v.as_bytes() == derive_accept_key(key.as_bytes()).as_bytes());
        if !accept_ok {
            return Err(StreamError::Protocol(String::from(
                "invalid Sec-WebSocket-Accept in upgrade response",
            )));
        }

        let upgraded = response.upgrade().await.map_err(|e| StreamError::UpgradeFailed {
            status: None,
            reason: e.to_string(),
        })?;
        debug!(protocol = %negotiated, "WebSocket exec stream established");

        let mut socket = WebSocketStream::from_raw_socket(upgraded, Role::Client, None).await;
        let mut status = Vec::new();

        while let Some(message) = socket.next().await {
            match message {
                Ok(Message::Binary(frame)) => demux(&frame, output, &mut status),
                Ok(Message::Close(frame)) => {
                    trace!(?frame, "Server closed exec stream");
                    break;
                }
                Ok(_) => {}
                Err(
                    WsError::ConnectionClosed
                    | WsError::Protocol(ProtocolError::ResetWithoutClosingHandshake),
                ) => break,
                Err(e) => return Err(e.into()),
            }
        }

        StatusProtocol::for_subprotocol(&negotiated).decode(&status)
    }
}

/// Routes one channel-prefixed message to its buffer.
fn demux(frame: &[u8], output: &mut RemoteCommandResult, status: &mut Vec<u8>) {
    let Some((&channel, payload)) = frame.split_first() else {
        return;
    };

    match channel {
        STDOUT_CHANNEL => output.stdout.extend_from_slice(payload),
        STDERR_CHANNEL => output.stderr.extend_from_slice(payload),
        STATUS_CHANNEL => status.extend_from_slice(payload),
        other => trace!(channel = other, len = payload.len(), "Ignoring message on unused channel"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_demux_routes_channels() {
        let mut output = RemoteCommandResult::default();
        let mut status = Vec::new();

        demux(b"\x01total 0\n", &mut output, &mut status);
        demux(b"\x02warning\n", &mut output, &mut status);
        demux(b"\x01drwxr-xr-x\n", &mut output, &mut status);
        demux(b"\x03{\"status\":\"Success\"}", &mut output, &mut status);

        assert_eq!(output.stdout, b"total 0\ndrwxr-xr-x\n");
        assert_eq!(output.stderr, b"warning\n");
        assert_eq!(status, br#"{"status":"Success"}"#);
    }

    #[test]
    fn test_demux_ignores_empty_and_unknown() {
        let mut output = RemoteCommandResult::default();
        let mut status = Vec::new();

        demux(b"", &mut output, &mut status);
        demux(b"\x01", &mut output, &mut status);
        demux(b"\x04{\"Width\":80}", &mut output, &mut status);
        demux(b"\xffclose", &mut output, &mut status);

        assert_eq!(output, RemoteCommandResult::default());
        assert!(status.is_empty());
    }
}
