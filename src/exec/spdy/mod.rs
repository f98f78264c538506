//! SPDY/3.1 exec transport.
//!
//! The client upgrades a `POST` to the exec sub-resource, then opens one
//! stream per channel: error (status), stdout and stderr. The server sends
//! the output as data frames and half-closes each stream when the command
//! exits.

mod frame;

use std::sync::Arc;

use async_trait::async_trait;
use bytes::BytesMut;
use reqwest::StatusCode;
use reqwest::header::{CONNECTION, UPGRADE};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, instrument, trace};

use self::frame::{Frame, HeaderCompressor};
use super::status::StatusProtocol;
use super::{
    ExecTarget, RemoteCommandResult, StreamTransport, classify_request_error, upgrade_refused,
};
use crate::cluster::KubeClient;
use crate::error::StreamError;

const SPDY_PROTOCOL: &str = "SPDY/3.1";
const STREAM_PROTOCOL_VERSION: &str = "x-stream-protocol-version";

/// Channel subprotocols offered, most preferred first.
const OFFERED_PROTOCOLS: [&str; 3] = [
    "v4.channel.k8s.io",
    "v3.channel.k8s.io",
    "v2.channel.k8s.io",
];

const ERROR_STREAM: u32 = 1;
const STDOUT_STREAM: u32 = 3;
const STDERR_STREAM: u32 = 5;

const READ_CHUNK: usize = 16 * 1024;

/// Exec over a SPDY/3.1 upgrade of a `POST` request.
pub struct SpdyTransport {
    client: Arc<KubeClient>,
}

impl SpdyTransport {
    #[must_use]
    pub fn new(client: Arc<KubeClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl StreamTransport for SpdyTransport {
    fn name(&self) -> &'static str {
        "spdy"
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

        let mut request = self
            .client
            .upgrade_client()
            .post(url)
            .header(CONNECTION, "Upgrade")
            .header(UPGRADE, SPDY_PROTOCOL);
        for protocol in OFFERED_PROTOCOLS {
            request = request.header(STREAM_PROTOCOL_VERSION, protocol);
        }
        let response = request.send().await.map_err(classify_request_error)?;

        if response.status() != StatusCode::SWITCHING_PROTOCOLS {
            return Err(upgrade_refused(response).await);
        }

        let upgraded_to = response
            .headers()
            .get(UPGRADE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        if !upgraded_to.eq_ignore_ascii_case(SPDY_PROTOCOL) {
            return Err(StreamError::UpgradeFailed {
                status: Some(StatusCode::SWITCHING_PROTOCOLS.as_u16()),
                reason: format!("server switched to '{upgraded_to}' instead of {SPDY_PROTOCOL}"),
            });
        }

        let negotiated = response
            .headers()
            .get(STREAM_PROTOCOL_VERSION)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();

        let upgraded = response.upgrade().await.map_err(|e| StreamError::UpgradeFailed {
            status: None,
            reason: e.to_string(),
        })?;
        debug!(protocol = %negotiated, "SPDY exec stream established");

        let mut session = Session::new(upgraded);
        session.open_streams().await?;
        let status = session.run(output).await?;

        StatusProtocol::for_subprotocol(&negotiated).decode(&status)
    }
}

/// Client side of one SPDY connection carrying a single exec.
struct Session<S> {
    io: S,
    buf: BytesMut,
    compressor: HeaderCompressor,
    error_open: bool,
    stdout_open: bool,
    stderr_open: bool,
}

impl<S: AsyncRead + AsyncWrite + Unpin> Session<S> {
    fn new(io: S) -> Self {
        Self {
            io,
            buf: BytesMut::with_capacity(READ_CHUNK),
            compressor: HeaderCompressor::new(),
            error_open: true,
            stdout_open: true,
            stderr_open: true,
        }
    }

    /// Sends `SYN_STREAM` for the error, stdout and stderr channels.
    async fn open_streams(&mut self) -> Result<(), StreamError> {
        for (id, kind) in [
            (ERROR_STREAM, "error"),
            (STDOUT_STREAM, "stdout"),
            (STDERR_STREAM, "stderr"),
        ] {
            let block = self
                .compressor
                .compress(&frame::header_block(&[("streamtype", kind)]))?;
            let syn = frame::encode_syn_stream(id, 0, &block)?;
            self.io.write_all(&syn).await?;
            trace!(stream = id, kind, "Opened stream");
        }
        self.io.flush().await?;
        Ok(())
    }

    fn finished(&self) -> bool {
        !self.error_open && !self.stdout_open && !self.stderr_open
    }

    fn close(&mut self, stream_id: u32) {
        match stream_id {
            ERROR_STREAM => self.error_open = false,
            STDOUT_STREAM => self.stdout_open = false,
            STDERR_STREAM => self.stderr_open = false,
            _ => {}
        }
    }

    /// Pumps frames until every stream is closed, the server goes away, or
    /// the connection ends. Returns the bytes of the error stream.
    async fn run(mut self, output: &mut RemoteCommandResult) -> Result<Vec<u8>, StreamError> {
        let mut status = Vec::new();

        loop {
            while let Some(frame) = frame::decode(&mut self.buf)? {
                match frame {
                    Frame::Data {
                        stream_id,
                        fin,
                        payload,
                    } => {
                        match stream_id {
                            ERROR_STREAM => status.extend_from_slice(&payload),
                            STDOUT_STREAM => output.stdout.extend_from_slice(&payload),
                            STDERR_STREAM => output.stderr.extend_from_slice(&payload),
                            other => trace!(stream = other, "Data on unknown stream"),
                        }
                        if !payload.is_empty() {
                            self.acknowledge(stream_id, payload.len()).await?;
                        }
                        if fin {
                            self.close(stream_id);
                        }
                    }
                    Frame::Headers { stream_id, fin } if fin => self.close(stream_id),
                    Frame::RstStream {
                        stream_id,
                        status: code,
                    } => {
                        trace!(stream = stream_id, code, "Stream reset by server");
                        self.close(stream_id);
                    }
                    Frame::Ping { id } => {
                        self.io.write_all(&frame::encode_ping(id)).await?;
                        self.io.flush().await?;
                    }
                    Frame::GoAway {
                        last_stream_id,
                        status: code,
                    } => {
                        debug!(last_stream_id, code, "Server sent GOAWAY");
                        return Ok(status);
                    }
                    Frame::WindowUpdate { stream_id, delta } => {
                        trace!(stream = stream_id, delta, "Window update");
                    }
                    Frame::SynStream { stream_id, .. } => {
                        trace!(stream = stream_id, "Ignoring server-initiated stream");
                    }
                    Frame::Headers { .. } => {}
                    Frame::Ignored { kind } => trace!(kind, "Ignoring control frame"),
                }

                if self.finished() {
                    return Ok(status);
                }
            }

            self.buf.reserve(READ_CHUNK);
            if self.io.read_buf(&mut self.buf).await? == 0 {
                trace!("Connection closed by server");
                return Ok(status);
            }
        }
    }

    /// Reopens the receive window for consumed data on the stream and the
    /// connection.
    async fn acknowledge(&mut self, stream_id: u32, len: usize) -> Result<(), StreamError> {
        let delta = u32::try_from(len).unwrap_or(u32::MAX);
        self.io
            .write_all(&frame::encode_window_update(stream_id, delta))
            .await?;
        self.io
            .write_all(&frame::encode_window_update(0, delta))
            .await?;
        self.io.flush().await?;
        Ok(())
    }
}
