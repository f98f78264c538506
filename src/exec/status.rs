//! Decoding of the exec status (error) channel.

use crate::cluster::Status;
use crate::error::StreamError;

/// How the server reports the command's final status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusProtocol {
    /// `v4.channel.k8s.io` and later: a JSON meta/v1 Status.
    Structured,
    /// `v1`-`v3`: free text, empty on success.
    PlainText,
}

impl StatusProtocol {
    /// Picks the decoding for a negotiated channel subprotocol.
    #[must_use]
    pub fn for_subprotocol(name: &str) -> Self {
        match name {
            "v4.channel.k8s.io" | "v5.channel.k8s.io" => Self::Structured,
            _ => Self::PlainText,
        }
    }

    /// Converts the accumulated status channel into the command's outcome.
    ///
    /// An empty channel means the server closed without reporting a failure.
    ///
    /// # Errors
    ///
    /// Returns `StreamError::Remote` for a reported failure, or
    /// `StreamError::Protocol` if structured status is not valid JSON.
    pub fn decode(self, raw: &[u8]) -> Result<(), StreamError> {
        if raw.iter().all(u8::is_ascii_whitespace) {
            return Ok(());
        }

        match self {
            Self::PlainText => Err(StreamError::Remote(
                String::from_utf8_lossy(raw).trim().to_string(),
            )),
            Self::Structured => {
                let status: Status = serde_json::from_slice(raw).map_err(|e| {
                    StreamError::Protocol(format!("error stream protocol error: {e}"))
                })?;

                if status.is_success() {
                    return Ok(());
                }
                if let Some(code) = status.exit_code() {
                    return Err(StreamError::Remote(format!(
                        "command terminated with non-zero exit code: {code}"
                    )));
                }
                Err(StreamError::Remote(
                    status
                        .message
                        .filter(|m| !m.is_empty())
                        .unwrap_or_else(|| String::from("error stream protocol error: unknown error")),
                ))
            }
        }
    }
}
