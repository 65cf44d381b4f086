//! Binary protocol for the per-profile inception socket.
//!
//! ## Wire Format
//!
//! ```text
//! [4-byte length][1-byte type][4-byte seq][payload]
//! ```
//!
//! - **length**: big-endian u32, size of (type + seq + payload)
//! - **type**: u8 message type
//! - **seq**: big-endian u32, echoed by the server in its reply
//! - **payload**: type-specific binary data
//!
//! ## Message Types
//!
//! | Type | Direction | Name         | Payload |
//! |------|-----------|--------------|---------|
//! | 0x01 | C→S       | xdg_open     | `[4B url_len][url]` |
//! | 0x02 | C→S       | run_workload | `[4B workload_len][workload][4B args_len][args]` |
//! | 0x03 | C→S       | flatpak_run  | `[4B workload_len][workload][4B args_len][args]` |
//! | 0x80 | S→C       | ok           | (empty) |
//! | 0xFF | S→C       | error        | `[2B error_len][error]` |
//!
//! There is no version negotiation: both ends ship in the same binary.

/// Where a profile's socket is mounted inside its workload containers.
/// Its presence is how the client knows it runs inside a profile.
pub const IN_PROFILE_SOCKET: &str = "/tmp/qube.sock";

/// Header size (4-byte length prefix).
pub const HEADER_SIZE: usize = 4;

/// Maximum message body size (1 MB). Requests carry a URL or a short
/// argument string, never bulk data.
pub const MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// Minimum body size: type (1) + seq (4).
pub const MIN_BODY_SIZE: usize = 5;

// Message type constants.
pub const MSG_XDG_OPEN: u8 = 0x01;
pub const MSG_RUN_WORKLOAD: u8 = 0x02;
pub const MSG_FLATPAK_RUN: u8 = 0x03;
pub const MSG_OK: u8 = 0x80;
pub const MSG_ERROR: u8 = 0xFF;

/// Protocol error.
#[derive(Debug, Clone)]
pub enum ProtocolError {
    MessageTooLarge(usize),
    MessageTooSmall(usize),
    InvalidPayload(&'static str),
    UnknownMessage(u8),
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MessageTooLarge(size) => write!(f, "message too large: {size}"),
            Self::MessageTooSmall(size) => write!(f, "message too small: {size}"),
            Self::InvalidPayload(msg) => write!(f, "invalid payload: {msg}"),
            Self::UnknownMessage(t) => write!(f, "unknown message type: 0x{t:02X}"),
        }
    }
}

impl std::error::Error for ProtocolError {}

/// Read a `u16` from `data` at `offset`. Returns `None` if out of bounds.
fn read_u16_at(data: &[u8], offset: usize) -> Option<u16> {
    let bytes: [u8; 2] = data.get(offset..offset + 2)?.try_into().ok()?;
    Some(u16::from_be_bytes(bytes))
}

/// Read a `u32` from `data` at `offset`. Returns `None` if out of bounds.
fn read_u32_at(data: &[u8], offset: usize) -> Option<u32> {
    let bytes: [u8; 4] = data.get(offset..offset + 4)?.try_into().ok()?;
    Some(u32::from_be_bytes(bytes))
}

/// Read a `[4B len][utf-8]` string at `offset`. Returns the string and the
/// offset just past it.
fn read_str_at<'a>(
    data: &'a [u8],
    offset: usize,
    what: &'static str,
) -> Result<(&'a str, usize), ProtocolError> {
    let len = read_u32_at(data, offset).ok_or(ProtocolError::InvalidPayload(what))? as usize;
    let start = offset + 4;
    let bytes = data
        .get(start..start + len)
        .ok_or(ProtocolError::InvalidPayload(what))?;
    let s = std::str::from_utf8(bytes).map_err(|_| ProtocolError::InvalidPayload(what))?;
    Ok((s, start + len))
}

fn push_str(buf: &mut Vec<u8>, s: &str) {
    buf.extend_from_slice(&(s.len() as u32).to_be_bytes());
    buf.extend_from_slice(s.as_bytes());
}

/// A raw decoded message.
#[derive(Debug, Clone)]
pub struct RawMessage {
    pub msg_type: u8,
    pub seq: u32,
    pub payload: Vec<u8>,
}

/// A decoded client request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    XdgOpen { url: String },
    RunWorkload { workload: String, args: String },
    FlatpakRun { workload: String, args: String },
}

impl Request {
    /// Method name as it appears in logs.
    pub fn method(&self) -> &'static str {
        match self {
            Self::XdgOpen { .. } => "XdgOpen",
            Self::RunWorkload { .. } => "RunWorkload",
            Self::FlatpakRun { .. } => "FlatpakRun",
        }
    }

    /// Encode into a full framed message with the given sequence number.
    pub fn encode(&self, seq: u32) -> Result<Vec<u8>, ProtocolError> {
        match self {
            Self::XdgOpen { url } => encode(MSG_XDG_OPEN, seq, &encode_xdg_open(url)),
            Self::RunWorkload { workload, args } => {
                encode(MSG_RUN_WORKLOAD, seq, &encode_workload(workload, args))
            }
            Self::FlatpakRun { workload, args } => {
                encode(MSG_FLATPAK_RUN, seq, &encode_workload(workload, args))
            }
        }
    }

    /// Decode a request from a raw message.
    pub fn decode(msg: &RawMessage) -> Result<Self, ProtocolError> {
        match msg.msg_type {
            MSG_XDG_OPEN => {
                let url = decode_xdg_open(&msg.payload)?;
                Ok(Self::XdgOpen {
                    url: url.to_string(),
                })
            }
            MSG_RUN_WORKLOAD => {
                let (workload, args) = decode_workload(&msg.payload)?;
                Ok(Self::RunWorkload {
                    workload: workload.to_string(),
                    args: args.to_string(),
                })
            }
            MSG_FLATPAK_RUN => {
                let (workload, args) = decode_workload(&msg.payload)?;
                Ok(Self::FlatpakRun {
                    workload: workload.to_string(),
                    args: args.to_string(),
                })
            }
            other => Err(ProtocolError::UnknownMessage(other)),
        }
    }
}

// ---------------------------------------------------------------------------
// Encode
// ---------------------------------------------------------------------------

/// Encode a raw message: `[4-byte length][1-byte type][4-byte seq][payload]`.
pub fn encode(msg_type: u8, seq: u32, payload: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    let body_len = 1 + 4 + payload.len();
    if body_len > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::MessageTooLarge(body_len));
    }
    let mut buf = Vec::with_capacity(HEADER_SIZE + body_len);
    buf.extend_from_slice(&(body_len as u32).to_be_bytes());
    buf.push(msg_type);
    buf.extend_from_slice(&seq.to_be_bytes());
    buf.extend_from_slice(payload);
    Ok(buf)
}

/// Encode xdg_open payload: `[4B url_len][url]`.
pub fn encode_xdg_open(url: &str) -> Vec<u8> {
    let mut p = Vec::with_capacity(4 + url.len());
    push_str(&mut p, url);
    p
}

/// Encode run_workload / flatpak_run payload:
/// `[4B workload_len][workload][4B args_len][args]`.
pub fn encode_workload(workload: &str, args: &str) -> Vec<u8> {
    let mut p = Vec::with_capacity(8 + workload.len() + args.len());
    push_str(&mut p, workload);
    push_str(&mut p, args);
    p
}

/// Encode error payload: `[2B error_len][error]`.
///
/// Messages longer than 65535 bytes are cut at the last char boundary that
/// fits, so the payload always decodes as UTF-8.
pub fn encode_error(message: &str) -> Vec<u8> {
    let mut end = message.len().min(u16::MAX as usize);
    while !message.is_char_boundary(end) {
        end -= 1;
    }
    let msg = message.get(..end).unwrap_or_default().as_bytes();
    let mut p = Vec::with_capacity(2 + msg.len());
    p.extend_from_slice(&(msg.len() as u16).to_be_bytes());
    p.extend_from_slice(msg);
    p
}

// ---------------------------------------------------------------------------
// Decode
// ---------------------------------------------------------------------------

/// Decode xdg_open payload. Returns the URL.
pub fn decode_xdg_open(payload: &[u8]) -> Result<&str, ProtocolError> {
    read_str_at(payload, 0, "xdg_open url truncated").map(|(url, _)| url)
}

/// Decode run_workload / flatpak_run payload. Returns `(workload, args)`.
pub fn decode_workload(payload: &[u8]) -> Result<(&str, &str), ProtocolError> {
    let (workload, next) = read_str_at(payload, 0, "workload name truncated")?;
    let (args, _) = read_str_at(payload, next, "workload args truncated")?;
    Ok((workload, args))
}

/// Decode error payload. Returns the error message.
pub fn decode_error(payload: &[u8]) -> Result<&str, ProtocolError> {
    let msg_len = read_u16_at(payload, 0)
        .ok_or(ProtocolError::InvalidPayload("error payload too short"))?
        as usize;
    std::str::from_utf8(
        payload
            .get(2..2 + msg_len)
            .ok_or(ProtocolError::InvalidPayload("error message truncated"))?,
    )
    .map_err(|_| ProtocolError::InvalidPayload("invalid UTF-8 in error"))
}

// ---------------------------------------------------------------------------
// Decoder (buffered, handles partial reads)
// ---------------------------------------------------------------------------

/// Buffered message decoder for streaming data.
pub struct Decoder {
    buf: Vec<u8>,
}

impl Decoder {
    pub fn new() -> Self {
        Self {
            buf: Vec::with_capacity(4 * 1024),
        }
    }

    /// Feed data and extract complete messages.
    pub fn decode(&mut self, data: &[u8]) -> Result<Vec<RawMessage>, ProtocolError> {
        self.buf.extend_from_slice(data);
        let mut messages = Vec::new();
        let mut offset = 0;

        while offset + HEADER_SIZE <= self.buf.len() {
            let length = match read_u32_at(&self.buf, offset) {
                Some(v) => v as usize,
                None => break,
            };

            if length > MAX_MESSAGE_SIZE {
                self.buf.clear();
                return Err(ProtocolError::MessageTooLarge(length));
            }
            if length < MIN_BODY_SIZE {
                self.buf.clear();
                return Err(ProtocolError::MessageTooSmall(length));
            }

            let total = HEADER_SIZE + length;
            if offset + total > self.buf.len() {
                break;
            }

            let Some(&msg_type) = self.buf.get(offset + HEADER_SIZE) else {
                break;
            };
            let Some(seq) = read_u32_at(&self.buf, offset + HEADER_SIZE + 1) else {
                break;
            };
            let payload = self
                .buf
                .get(offset + HEADER_SIZE + MIN_BODY_SIZE..offset + total)
                .unwrap_or_default()
                .to_vec();

            messages.push(RawMessage {
                msg_type,
                seq,
                payload,
            });
            offset += total;
        }

        if offset > 0 {
            self.buf.drain(..offset);
        }

        Ok(messages)
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}
