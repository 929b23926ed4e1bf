//! DSS wire codec
//!
//! Every message is a frame: a little-endian `u32` length that counts the
//! 4-byte header itself, followed by the payload. The first payload byte is
//! the message type.
//!
//! A listing query exchanges three frames:
//!
//! - `WHATS_UP` (server greeting): flags, protocol version, network version
//! - `LISTING` (client request): echoes the version fields back
//! - `LIST_SERVER` (server reply): name, info, news, icon, player counts

use dssb_core::{DssError, Result, ServerSnapshot};
use std::borrow::Cow;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Client listing request
pub const MSG_LISTING: u8 = 0;
/// Server greeting
pub const MSG_WHATS_UP: u8 = 1;
/// Server listing reply
pub const MSG_LIST_SERVER: u8 = 2;

/// Greeting flag: the server expects a TLS upgrade before the listing request
pub const FLAG_USE_SSL: u8 = 1;

/// Service account used to request the listing. Not a real login.
pub const LISTING_USERNAME: &str = "__dsslist";

/// Length prefix size
pub const FRAME_HEADER_LEN: usize = 4;

/// Handshake state announced by the server and echoed in the listing request
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Greeting {
    /// Raw flags byte
    pub flags: u8,

    /// Protocol version
    pub protocol_version: u32,

    /// Network version, kept as raw bytes so the echo is exact
    pub network_version: Vec<u8>,
}

impl Greeting {
    pub fn requires_tls(&self) -> bool {
        self.flags & FLAG_USE_SSL != 0
    }

    pub fn network_version_str(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.network_version)
    }
}

/// Bounds-checked reader over a frame payload
struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a [u8], pos: usize) -> Self {
        Self { buf, pos }
    }

    fn take(&mut self, n: usize, what: &str) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&end| end <= self.buf.len())
            .ok_or_else(|| DssError::Protocol(format!("truncated {what}")))?;
        let bytes = &self.buf[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    fn u8(&mut self, what: &str) -> Result<u8> {
        Ok(self.take(1, what)?[0])
    }

    fn u16_le(&mut self, what: &str) -> Result<u16> {
        let b = self.take(2, what)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u32_le(&mut self, what: &str) -> Result<u32> {
        let b = self.take(4, what)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn cstring(&mut self, what: &str) -> Result<String> {
        let rest = &self.buf[self.pos..];
        let nul = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| DssError::Protocol(format!("unterminated {what}")))?;
        let s = String::from_utf8_lossy(&rest[..nul]).into_owned();
        self.pos += nul + 1;
        Ok(s)
    }

    fn rest(&mut self) -> &'a [u8] {
        let bytes = &self.buf[self.pos..];
        self.pos = self.buf.len();
        bytes
    }
}

/// Check the frame header and message type, returning a cursor past the type byte.
fn open_frame<'a>(frame: &'a [u8], expected: u8, name: &str) -> Result<Cursor<'a>> {
    let mut cursor = Cursor::new(frame, 0);
    let declared = cursor.u32_le("frame header")? as usize;
    if declared != frame.len() {
        return Err(DssError::Protocol(format!(
            "frame declares {} bytes, got {}",
            declared,
            frame.len()
        )));
    }

    let msg_type = cursor.u8("message type")?;
    if msg_type != expected {
        return Err(DssError::Protocol(format!(
            "expected {name} (type {expected}), got type {msg_type}"
        )));
    }
    Ok(cursor)
}

/// Prefix a payload with its frame length.
pub fn frame(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(FRAME_HEADER_LEN + payload.len());
    out.extend_from_slice(&((FRAME_HEADER_LEN + payload.len()) as u32).to_le_bytes());
    out.extend_from_slice(payload);
    out
}

/// Decode a `WHATS_UP` frame.
pub fn decode_greeting(frame: &[u8]) -> Result<Greeting> {
    let mut cursor = open_frame(frame, MSG_WHATS_UP, "WHATS_UP")?;
    let flags = cursor.u8("greeting flags")?;
    let protocol_version = cursor.u32_le("protocol version")?;
    let network_version = cursor.rest().to_vec();

    Ok(Greeting {
        flags,
        protocol_version,
        network_version,
    })
}

/// Encode a `WHATS_UP` frame (server side).
pub fn encode_greeting(greeting: &Greeting) -> Vec<u8> {
    let mut payload = Vec::with_capacity(6 + greeting.network_version.len());
    payload.push(MSG_WHATS_UP);
    payload.push(greeting.flags);
    payload.extend_from_slice(&greeting.protocol_version.to_le_bytes());
    payload.extend_from_slice(&greeting.network_version);
    frame(&payload)
}

/// Encode the `LISTING` request that answers `greeting`.
pub fn encode_listing_request(greeting: &Greeting) -> Vec<u8> {
    let mut payload =
        Vec::with_capacity(7 + greeting.network_version.len() + LISTING_USERNAME.len());
    payload.push(MSG_LISTING);
    payload.extend_from_slice(&greeting.protocol_version.to_le_bytes());
    payload.extend_from_slice(&greeting.network_version);
    payload.push(0);
    payload.push(1); // authenticated
    payload.extend_from_slice(LISTING_USERNAME.as_bytes());
    frame(&payload)
}

/// Decode a `LISTING` request back into the greeting fields it echoes and the
/// account name it carries (server side).
pub fn decode_listing_request(frame: &[u8]) -> Result<(Greeting, String)> {
    let mut cursor = open_frame(frame, MSG_LISTING, "LISTING")?;
    let protocol_version = cursor.u32_le("protocol version")?;

    let rest = &frame[cursor.pos..];
    let nul = rest
        .iter()
        .position(|&b| b == 0)
        .ok_or_else(|| DssError::Protocol("unterminated network version".into()))?;
    let network_version = rest[..nul].to_vec();
    cursor.pos += nul + 1;

    let authenticated = cursor.u8("authenticated flag")?;
    if authenticated != 1 {
        return Err(DssError::Protocol(format!(
            "unexpected authenticated flag {authenticated}"
        )));
    }
    let username = String::from_utf8_lossy(cursor.rest()).into_owned();

    Ok((
        Greeting {
            flags: 0,
            protocol_version,
            network_version,
        },
        username,
    ))
}

/// Decode a `LIST_SERVER` frame.
pub fn decode_list_server(frame: &[u8]) -> Result<ServerSnapshot> {
    let mut cursor = open_frame(frame, MSG_LIST_SERVER, "LIST_SERVER")?;

    let name = cursor.cstring("name")?;
    let info = cursor.cstring("info")?;
    let news = cursor.cstring("news")?;

    let icon_len = cursor.u32_le("icon length")? as usize;
    let icon = cursor.take(icon_len, "icon")?.to_vec();

    let players = cursor.u16_le("player count")?;
    let max_players = cursor.u16_le("max player count")?;

    Ok(ServerSnapshot {
        name,
        info,
        news,
        players,
        max_players,
        icon,
    })
}

/// Encode a `LIST_SERVER` frame (server side).
pub fn encode_list_server(snapshot: &ServerSnapshot) -> Vec<u8> {
    let mut payload = Vec::with_capacity(
        16 + snapshot.name.len() + snapshot.info.len() + snapshot.news.len() + snapshot.icon.len(),
    );
    payload.push(MSG_LIST_SERVER);
    for text in [&snapshot.name, &snapshot.info, &snapshot.news] {
        payload.extend_from_slice(text.as_bytes());
        payload.push(0);
    }
    payload.extend_from_slice(&(snapshot.icon.len() as u32).to_le_bytes());
    payload.extend_from_slice(&snapshot.icon);
    payload.extend_from_slice(&snapshot.players.to_le_bytes());
    payload.extend_from_slice(&snapshot.max_players.to_le_bytes());
    frame(&payload)
}

/// Map a read error: EOF inside a frame is a protocol fault, anything else is
/// a network fault.
fn read_error(e: std::io::Error) -> DssError {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        DssError::Protocol("connection closed mid-frame".into())
    } else {
        DssError::Network(e.to_string())
    }
}

/// Read one complete frame, header included. Each read is bounded by `timeout`.
pub async fn read_frame<S>(stream: &mut S, max_frame_size: usize, timeout: Duration) -> Result<Vec<u8>>
where
    S: AsyncRead + Unpin,
{
    let mut header = [0u8; FRAME_HEADER_LEN];
    tokio::time::timeout(timeout, stream.read_exact(&mut header))
        .await
        .map_err(|_| DssError::Timeout(timeout))?
        .map_err(read_error)?;

    let len = u32::from_le_bytes(header) as usize;
    if len < FRAME_HEADER_LEN {
        return Err(DssError::Protocol(format!("frame length {len} is shorter than its header")));
    }
    if len > max_frame_size {
        return Err(DssError::Protocol(format!(
            "frame length {len} exceeds limit {max_frame_size}"
        )));
    }

    let mut frame = vec![0u8; len];
    frame[..FRAME_HEADER_LEN].copy_from_slice(&header);
    tokio::time::timeout(timeout, stream.read_exact(&mut frame[FRAME_HEADER_LEN..]))
        .await
        .map_err(|_| DssError::Timeout(timeout))?
        .map_err(read_error)?;

    Ok(frame)
}

/// Write one frame and flush it.
pub async fn write_frame<S>(stream: &mut S, frame: &[u8], timeout: Duration) -> Result<()>
where
    S: AsyncWrite + Unpin,
{
    tokio::time::timeout(timeout, async {
        stream.write_all(frame).await?;
        stream.flush().await
    })
    .await
    .map_err(|_| DssError::Timeout(timeout))?
    .map_err(|e| DssError::Network(e.to_string()))
}
