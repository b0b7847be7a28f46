//! Fixed-size binary frames and the exact-byte helpers that move them.
//!
//! Every frame is `FRAME_SIZE` bytes, laid out little endian:
//!
//! ```text
//! [u32 kind][i64 time][u32 author_id][16 bytes nickname][4096 bytes body]
//! ```
//!
//! Text fields are UTF-8, zero padded, and always keep at least one trailing
//! NUL byte. There is no length prefix since both ends know the size.

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

pub use crate::error::WireError;

pub const NICK_SIZE: usize = 16;
pub const BODY_SIZE: usize = 4096;
pub const FRAME_SIZE: usize = 4 + 8 + 4 + NICK_SIZE + BODY_SIZE;

/// Body carried by divider entries.
pub const MARK_BODY: &str = "----- mark -----";

const KIND_AT: usize = 0;
const TIME_AT: usize = 4;
const AUTHOR_AT: usize = 12;
const NICK_AT: usize = 16;
const BODY_AT: usize = NICK_AT + NICK_SIZE;

/// Identity the relay assigns to a connection. Zero means "not assigned".
pub type AuthorId = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum FrameKind {
    Normal = 0,
    Join = 1,
    JoinRejected = 2,
    Redact = 3,
    ClearHistory = 4,
    Mark = 5,
    Quit = 6,
}

impl TryFrom<u32> for FrameKind {
    type Error = WireError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => FrameKind::Normal,
            1 => FrameKind::Join,
            2 => FrameKind::JoinRejected,
            3 => FrameKind::Redact,
            4 => FrameKind::ClearHistory,
            5 => FrameKind::Mark,
            6 => FrameKind::Quit,
            other => return Err(WireError::UnknownKind(other)),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub kind: FrameKind,
    pub time: i64,
    pub author_id: AuthorId,
    pub nickname: String,
    pub body: String,
}

impl Frame {
    /// Creates an empty frame of `kind` stamped with the current time.
    pub fn new(kind: FrameKind) -> Self {
        Self {
            kind,
            time: chrono::Utc::now().timestamp(),
            author_id: 0,
            nickname: String::new(),
            body: String::new(),
        }
    }

    pub fn join(nickname: &str) -> Self {
        Self {
            nickname: nickname.to_string(),
            ..Self::new(FrameKind::Join)
        }
    }

    pub fn chat(text: &str) -> Self {
        Self {
            body: text.to_string(),
            ..Self::new(FrameKind::Normal)
        }
    }

    pub fn mark(author_id: AuthorId) -> Self {
        Self {
            author_id,
            body: MARK_BODY.to_string(),
            ..Self::new(FrameKind::Mark)
        }
    }

    pub fn encode(&self) -> [u8; FRAME_SIZE] {
        let mut buf = [0u8; FRAME_SIZE];
        buf[KIND_AT..TIME_AT].copy_from_slice(&(self.kind as u32).to_le_bytes());
        buf[TIME_AT..AUTHOR_AT].copy_from_slice(&self.time.to_le_bytes());
        buf[AUTHOR_AT..NICK_AT].copy_from_slice(&self.author_id.to_le_bytes());
        put_text(&mut buf[NICK_AT..BODY_AT], &self.nickname);
        put_text(&mut buf[BODY_AT..], &self.body);
        buf
    }

    pub fn decode(buf: &[u8; FRAME_SIZE]) -> Result<Self, WireError> {
        let kind = FrameKind::try_from(u32::from_le_bytes(field(buf, KIND_AT)))?;
        Ok(Self {
            kind,
            time: i64::from_le_bytes(field(buf, TIME_AT)),
            author_id: u32::from_le_bytes(field(buf, AUTHOR_AT)),
            nickname: take_text(&buf[NICK_AT..BODY_AT]),
            body: take_text(&buf[BODY_AT..]),
        })
    }
}

fn field<const N: usize>(buf: &[u8; FRAME_SIZE], at: usize) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&buf[at..at + N]);
    out
}

// Truncates on a char boundary and leaves room for the terminating NUL.
fn put_text(dst: &mut [u8], text: &str) {
    let mut end = text.len().min(dst.len() - 1);
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    dst[..end].copy_from_slice(&text.as_bytes()[..end]);
}

fn take_text(src: &[u8]) -> String {
    let end = src.iter().position(|&b| b == 0).unwrap_or(src.len());
    String::from_utf8_lossy(&src[..end]).into_owned()
}

/// Fills `buf` from `reader`, stopping early when the stream ends.
///
/// Returns how many bytes were obtained; anything short of `FRAME_SIZE` must
/// not be interpreted.
pub async fn read_frame<R>(reader: &mut R, buf: &mut [u8; FRAME_SIZE]) -> io::Result<usize>
where
    R: AsyncRead + Unpin,
{
    let mut total = 0;
    while total < FRAME_SIZE {
        match reader.read(&mut buf[total..]).await {
            Ok(0) => break,
            Ok(n) => total += n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        }
    }
    Ok(total)
}

/// Writes the whole encoding of `frame`, stopping early if the peer stops
/// accepting bytes. Returns how many bytes went out.
pub async fn write_frame<W>(writer: &mut W, frame: &Frame) -> io::Result<usize>
where
    W: AsyncWrite + Unpin,
{
    let encoded = frame.encode();
    let mut total = 0;
    while total < FRAME_SIZE {
        match writer.write(&encoded[total..]).await {
            Ok(0) => break,
            Ok(n) => total += n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        }
    }
    if total == FRAME_SIZE {
        writer.flush().await?;
    }
    Ok(total)
}

pub async fn read_message<R>(reader: &mut R) -> Result<Frame, WireError>
where
    R: AsyncRead + Unpin,
{
    let mut buf = [0u8; FRAME_SIZE];
    let got = read_frame(reader, &mut buf).await?;
    if got != FRAME_SIZE {
        return Err(WireError::ShortRead { got });
    }
    Frame::decode(&buf)
}

pub async fn write_message<W>(writer: &mut W, frame: &Frame) -> Result<(), WireError>
where
    W: AsyncWrite + Unpin,
{
    let written = write_frame(writer, frame).await?;
    if written != FRAME_SIZE {
        debug!(written, kind = ?frame.kind, "frame only partially written");
        return Err(WireError::ShortWrite { written });
    }
    Ok(())
}
