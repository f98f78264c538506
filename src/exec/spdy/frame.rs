//! SPDY/3.1 framing: the subset an exec client sends and understands.
//!
//! Control frames:
//!
//! ```text
//! +----------------------------------+
//! |1| version (15) |   type (16)     |
//! +----------------------------------+
//! | flags (8) |     length (24)      |
//! +----------------------------------+
//! ```
//!
//! Data frames carry a 31-bit stream id in place of version and type.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use flate2::{Compress, Compression, FlushCompress};

use crate::error::StreamError;

pub(crate) const SPDY_VERSION: u16 = 3;
pub(crate) const FLAG_FIN: u8 = 0x01;

const HEADER_LEN: usize = 8;
const CONTROL_BIT: u32 = 0x8000_0000;
const STREAM_ID_MASK: u32 = 0x7fff_ffff;
const MAX_LENGTH: usize = 0x00ff_ffff;

/// Control frame types from SPDY/3.1 section 2.6.
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ControlType {
    SynStream = 1,
    SynReply = 2,
    RstStream = 3,
    Settings = 4,
    Ping = 6,
    GoAway = 7,
    Headers = 8,
    WindowUpdate = 9,
}

impl TryFrom<u16> for ControlType {
    type Error = u16;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        use ControlType::*;
        Ok(match value {
            1 => SynStream,
            2 => SynReply,
            3 => RstStream,
            4 => Settings,
            6 => Ping,
            7 => GoAway,
            8 => Headers,
            9 => WindowUpdate,
            other => return Err(other),
        })
    }
}

/// A decoded frame. Header blocks are not decompressed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Frame {
    Data {
        stream_id: u32,
        fin: bool,
        payload: Bytes,
    },
    SynStream {
        stream_id: u32,
        fin: bool,
    },
    /// `SYN_REPLY` or `HEADERS`; both may half-close the stream.
    Headers {
        stream_id: u32,
        fin: bool,
    },
    RstStream {
        stream_id: u32,
        status: u32,
    },
    Ping {
        id: u32,
    },
    GoAway {
        last_stream_id: u32,
        status: u32,
    },
    WindowUpdate {
        stream_id: u32,
        delta: u32,
    },
    /// `SETTINGS` and unknown control types.
    Ignored {
        kind: u16,
    },
}

/// Takes one complete frame off the front of `buf`.
///
/// Returns `Ok(None)` while the frame is still incomplete.
pub(crate) fn decode(buf: &mut BytesMut) -> Result<Option<Frame>, StreamError> {
    if buf.len() < HEADER_LEN {
        return Ok(None);
    }

    let word = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
    let flags = buf[4];
    let length = (usize::from(buf[5]) << 16) | (usize::from(buf[6]) << 8) | usize::from(buf[7]);
    if buf.len() < HEADER_LEN + length {
        buf.reserve(HEADER_LEN + length - buf.len());
        return Ok(None);
    }

    buf.advance(HEADER_LEN);
    let mut body = buf.split_to(length).freeze();
    let fin = flags & FLAG_FIN != 0;

    if word & CONTROL_BIT == 0 {
        return Ok(Some(Frame::Data {
            stream_id: word & STREAM_ID_MASK,
            fin,
            payload: body,
        }));
    }

    let version = ((word >> 16) & 0x7fff) as u16;
    if version != SPDY_VERSION {
        return Err(StreamError::Protocol(format!(
            "unsupported SPDY version {version}"
        )));
    }

    let kind = (word & 0xffff) as u16;
    let Ok(control) = ControlType::try_from(kind) else {
        return Ok(Some(Frame::Ignored { kind }));
    };

    let frame = match control {
        ControlType::SynStream => Frame::SynStream {
            stream_id: read_id(&mut body, control)?,
            fin,
        },
        ControlType::SynReply | ControlType::Headers => Frame::Headers {
            stream_id: read_id(&mut body, control)?,
            fin,
        },
        ControlType::RstStream => Frame::RstStream {
            stream_id: read_id(&mut body, control)?,
            status: read_u32(&mut body, control)?,
        },
        ControlType::Ping => Frame::Ping {
            id: read_u32(&mut body, control)?,
        },
        ControlType::GoAway => Frame::GoAway {
            last_stream_id: read_id(&mut body, control)?,
            status: read_u32(&mut body, control)?,
        },
        ControlType::WindowUpdate => Frame::WindowUpdate {
            stream_id: read_id(&mut body, control)?,
            delta: read_u32(&mut body, control)? & STREAM_ID_MASK,
        },
        ControlType::Settings => Frame::Ignored { kind },
    };
    Ok(Some(frame))
}

fn read_u32(body: &mut Bytes, control: ControlType) -> Result<u32, StreamError> {
    if body.remaining() < 4 {
        return Err(StreamError::Protocol(format!("truncated {control:?} frame")));
    }
    Ok(body.get_u32())
}

fn read_id(body: &mut Bytes, control: ControlType) -> Result<u32, StreamError> {
    Ok(read_u32(body, control)? & STREAM_ID_MASK)
}

fn put_control_header(out: &mut BytesMut, control: ControlType, flags: u8, length: usize) {
    out.put_u16(0x8000 | SPDY_VERSION);
    out.put_u16(control as u16);
    out.put_u8(flags);
    put_length(out, length);
}

fn put_length(out: &mut BytesMut, length: usize) {
    out.put_u8((length >> 16) as u8);
    out.put_u8((length >> 8) as u8);
    out.put_u8(length as u8);
}

/// `SYN_STREAM` with an already compressed header block.
pub(crate) fn encode_syn_stream(
    stream_id: u32,
    flags: u8,
    header_block: &[u8],
) -> Result<Bytes, StreamError> {
    let length = 10 + header_block.len();
    if length > MAX_LENGTH {
        return Err(StreamError::Protocol(String::from("header block too large")));
    }

    let mut out = BytesMut::with_capacity(HEADER_LEN + length);
    put_control_header(&mut out, ControlType::SynStream, flags, length);
    out.put_u32(stream_id & STREAM_ID_MASK);
    out.put_u32(0); // associated stream
    out.put_u8(0); // priority (3 bits) + unused
    out.put_u8(0); // slot
    out.put_slice(header_block);
    Ok(out.freeze())
}

pub(crate) fn encode_ping(id: u32) -> Bytes {
    let mut out = BytesMut::with_capacity(HEADER_LEN + 4);
    put_control_header(&mut out, ControlType::Ping, 0, 4);
    out.put_u32(id);
    out.freeze()
}

pub(crate) fn encode_window_update(stream_id: u32, delta: u32) -> Bytes {
    let mut out = BytesMut::with_capacity(HEADER_LEN + 8);
    put_control_header(&mut out, ControlType::WindowUpdate, 0, 8);
    out.put_u32(stream_id & STREAM_ID_MASK);
    out.put_u32(delta & STREAM_ID_MASK);
    out.freeze()
}

#[cfg(test)]
pub(crate) fn encode_data(stream_id: u32, fin: bool, payload: &[u8]) -> Bytes {
    let mut out = BytesMut::with_capacity(HEADER_LEN + payload.len());
    out.put_u32(stream_id & STREAM_ID_MASK);
    out.put_u8(if fin { FLAG_FIN } else { 0 });
    put_length(&mut out, payload.len());
    out.put_slice(payload);
    out.freeze()
}

/// Serializes name/value pairs into an uncompressed SPDY/3 header block.
pub(crate) fn header_block(pairs: &[(&str, &str)]) -> Vec<u8> {
    let mut out = Vec::new();
    out.put_u32(pairs.len() as u32);
    for (name, value) in pairs {
        out.put_u32(name.len() as u32);
        out.put_slice(name.as_bytes());
        out.put_u32(value.len() as u32);
        out.put_slice(value.as_bytes());
    }
    out
}

/// Compression context shared by every header block sent on a session.
///
/// No preset dictionary is announced, so peers decode the blocks without one.
pub(crate) struct HeaderCompressor {
    zlib: Compress,
}

impl HeaderCompressor {
    pub(crate) fn new() -> Self {
        Self {
            zlib: Compress::new(Compression::default(), true),
        }
    }

    /// Compresses one block and sync-flushes so it can be decoded alone.
    pub(crate) fn compress(&mut self, block: &[u8]) -> Result<Vec<u8>, StreamError> {
        let start = self.zlib.total_in();
        let mut out = Vec::with_capacity(block.len() + 64);

        loop {
            if out.len() == out.capacity() {
                out.reserve(64);
            }
            let consumed = (self.zlib.total_in() - start) as usize;
            self.zlib
                .compress_vec(&block[consumed..], &mut out, FlushCompress::Sync)
                .map_err(|e| StreamError::Protocol(format!("header compression failed: {e}")))?;

            let consumed = (self.zlib.total_in() - start) as usize;
            if consumed == block.len() && out.len() < out.capacity() {
                return Ok(out);
            }
        }
    }
}
