// resp-protocol: RESP wire framing for the key-value server.
//
// Two halves: `Frame` models every reply shape the server produces and
// knows how to render itself, and the free functions parse requests out
// of a growing byte buffer.  Decoding is incremental: a partial frame
// yields `None` and consumes nothing, so callers can keep appending
// socket reads to the same buffer.

use thiserror::Error;

/// Decode failure over client input.  Callers treat this as fatal for the
/// connection that produced the bytes.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("invalid frame header byte {0:#04x}")]
    BadHeader(u8),
    #[error("invalid length in frame header")]
    BadLength,
    #[error("expected a bulk string element")]
    ExpectedBulk,
    #[error("missing CRLF after bulk payload")]
    BadTerminator,
}

// ---------------------------------------------------------------------------
// Reply frames
// ---------------------------------------------------------------------------

/// A single RESP value produced by the server.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// `+...\r\n`
    Simple(String),
    /// `-...\r\n`
    Error(String),
    /// `:<n>\r\n`
    Integer(i64),
    /// `$<len>\r\n<bytes>\r\n`
    Bulk(Vec<u8>),
    /// `$-1\r\n`
    NullBulk,
    /// `*<n>\r\n` followed by the element frames
    Array(Vec<Frame>),
    /// `*-1\r\n` — used for blocking-command timeouts
    NullArray,
}

impl Frame {
    pub fn ok() -> Frame {
        Frame::Simple("OK".to_owned())
    }

    pub fn error(message: impl Into<String>) -> Frame {
        Frame::Error(message.into())
    }

    pub fn bulk(payload: impl Into<Vec<u8>>) -> Frame {
        Frame::Bulk(payload.into())
    }

    /// Append the wire rendering of this frame to `out`.
    pub fn encode(&self, out: &mut Vec<u8>) {
        match self {
            Frame::Simple(s) => {
                out.push(b'+');
                out.extend_from_slice(s.as_bytes());
                out.extend_from_slice(b"\r\n");
            }
            Frame::Error(s) => {
                out.push(b'-');
                out.extend_from_slice(s.as_bytes());
                out.extend_from_slice(b"\r\n");
            }
            Frame::Integer(n) => {
                out.push(b':');
                out.extend_from_slice(n.to_string().as_bytes());
                out.extend_from_slice(b"\r\n");
            }
            Frame::Bulk(payload) => {
                out.push(b'$');
                out.extend_from_slice(payload.len().to_string().as_bytes());
                out.extend_from_slice(b"\r\n");
                out.extend_from_slice(payload);
                out.extend_from_slice(b"\r\n");
            }
            Frame::NullBulk => out.extend_from_slice(b"$-1\r\n"),
            Frame::Array(elements) => {
                out.push(b'*');
                out.extend_from_slice(elements.len().to_string().as_bytes());
                out.extend_from_slice(b"\r\n");
                for element in elements {
                    element.encode(out);
                }
            }
            Frame::NullArray => out.extend_from_slice(b"*-1\r\n"),
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.encode(&mut out);
        out
    }
}

/// Render a command as an array of bulk strings — the form clients send
/// and the form the master propagates to replicas.
pub fn encode_command<A: AsRef<[u8]>>(args: &[A]) -> Vec<u8> {
    let mut out = Vec::new();
    out.push(b'*');
    out.extend_from_slice(args.len().to_string().as_bytes());
    out.extend_from_slice(b"\r\n");
    for arg in args {
        Frame::Bulk(arg.as_ref().to_vec()).encode(&mut out);
    }
    out
}

// ---------------------------------------------------------------------------
// Request decoding
// ---------------------------------------------------------------------------

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Cursor { buf, pos: 0 }
    }

    /// The next CRLF-terminated line, without its terminator.  `None`
    /// when the terminator has not arrived yet.
    fn line(&mut self) -> Option<&'a [u8]> {
        let rest = &self.buf[self.pos..];
        let end = rest.windows(2).position(|w| w == b"\r\n")?;
        self.pos += end + 2;
        Some(&rest[..end])
    }

    fn take(&mut self, n: usize) -> Option<&'a [u8]> {
        let rest = &self.buf[self.pos..];
        if rest.len() < n {
            return None;
        }
        self.pos += n;
        Some(&rest[..n])
    }
}

fn ascii_i64(digits: &[u8]) -> Result<i64, FrameError> {
    std::str::from_utf8(digits)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or(FrameError::BadLength)
}

/// Parse one command array from the head of `buf`.
///
/// Returns the argument list plus the exact number of wire bytes it
/// occupied (replication offsets are counted from this), or `None` when
/// the buffer holds only a partial frame.  The buffer itself is never
/// modified; the caller drains the consumed prefix.
pub fn parse_command(buf: &[u8]) -> Result<Option<(Vec<Vec<u8>>, usize)>, FrameError> {
    if buf.is_empty() {
        return Ok(None);
    }
    let mut cursor = Cursor::new(buf);
    let Some(header) = cursor.line() else {
        return Ok(None);
    };
    match header.first() {
        Some(b'*') => {}
        Some(&other) => return Err(FrameError::BadHeader(other)),
        None => return Err(FrameError::BadHeader(b'\r')),
    }
    let count = ascii_i64(&header[1..])?;
    if count < 0 {
        return Err(FrameError::BadLength);
    }
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let mut args = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let Some(element) = cursor.line() else {
            return Ok(None);
        };
        if element.first() != Some(&b'$') {
            return Err(FrameError::ExpectedBulk);
        }
        let len = ascii_i64(&element[1..])?;
        if len < 0 {
            return Err(FrameError::ExpectedBulk);
        }
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let Some(payload) = cursor.take(len as usize) else {
            return Ok(None);
        };
        let Some(terminator) = cursor.take(2) else {
            return Ok(None);
        };
        if terminator != b"\r\n" {
            return Err(FrameError::BadTerminator);
        }
        args.push(payload.to_vec());
    }
    Ok(Some((args, cursor.pos)))
}

/// Parse one CRLF-terminated line from the head of `buf`, returning the
/// line body and the bytes consumed.  Used for handshake replies
/// (`+PONG`, `+FULLRESYNC ...`) and the snapshot length header, which are
/// not command arrays.
pub fn parse_line(buf: &[u8]) -> Option<(&[u8], usize)> {
    let end = buf.windows(2).position(|w| w == b"\r\n")?;
    Some((&buf[..end], end + 2))
}
