//! # RESP Framing
//!
//! Purpose: Parse client command frames out of a `BytesMut` read buffer and
//! encode replies, consuming bytes only once a frame is complete.
//!
//! ## Design Principles
//! 1. **Incremental**: An incomplete frame leaves the buffer untouched.
//! 2. **Binary-Safe**: Bulk arguments are raw bytes.
//! 3. **Inline Fallback**: A line not starting with `*` is split on spaces.

use bytes::{Buf, BufMut, BytesMut};

/// Reply written back to a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Simple(String),
    Error(String),
    Integer(i64),
    Bulk(Option<Vec<u8>>),
    Array(Vec<Reply>),
    NullArray,
}

impl Reply {
    pub fn ok() -> Self {
        Reply::Simple("OK".to_string())
    }

    /// Generic `ERR ...` reply.
    pub fn err(message: impl AsRef<str>) -> Self {
        Reply::Error(format!("ERR {}", message.as_ref()))
    }

    pub fn bulk(data: impl Into<Vec<u8>>) -> Self {
        Reply::Bulk(Some(data.into()))
    }

    pub fn nil() -> Self {
        Reply::Bulk(None)
    }

    pub fn encode(&self, out: &mut BytesMut) {
        match self {
            Reply::Simple(text) => {
                out.put_u8(b'+');
                out.put_slice(text.as_bytes());
                out.put_slice(b"\r\n");
            }
            Reply::Error(text) => {
                out.put_u8(b'-');
                out.put_slice(text.as_bytes());
                out.put_slice(b"\r\n");
            }
            Reply::Integer(value) => {
                out.put_u8(b':');
                out.put_slice(value.to_string().as_bytes());
                out.put_slice(b"\r\n");
            }
            Reply::Bulk(None) => out.put_slice(b"$-1\r\n"),
            Reply::Bulk(Some(data)) => {
                out.put_u8(b'$');
                out.put_slice(data.len().to_string().as_bytes());
                out.put_slice(b"\r\n");
                out.put_slice(data);
                out.put_slice(b"\r\n");
            }
            Reply::Array(items) => {
                out.put_u8(b'*');
                out.put_slice(items.len().to_string().as_bytes());
                out.put_slice(b"\r\n");
                for item in items {
                    item.encode(out);
                }
            }
            Reply::NullArray => out.put_slice(b"*-1\r\n"),
        }
    }
}

/// Malformed client frame; the connection is closed after reporting it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolError;

/// Extracts one command from `buf`, or `Ok(None)` until more bytes arrive.
pub fn parse_command(buf: &mut BytesMut) -> Result<Option<Vec<Vec<u8>>>, ProtocolError> {
    if buf.is_empty() {
        return Ok(None);
    }
    let parsed = if buf[0] == b'*' {
        parse_array(buf)?
    } else {
        parse_inline(buf)
    };
    match parsed {
        Some((args, consumed)) => {
            buf.advance(consumed);
            Ok(Some(args))
        }
        None => Ok(None),
    }
}

fn parse_array(buf: &[u8]) -> Result<Option<(Vec<Vec<u8>>, usize)>, ProtocolError> {
    let (header, mut pos) = match line(buf, 0) {
        Some(found) => found,
        None => return Ok(None),
    };
    let count = number(&header[1..])?;
    let mut args = Vec::with_capacity(count);
    for _ in 0..count {
        let (header, next) = match line(buf, pos) {
            Some(found) => found,
            None => return Ok(None),
        };
        if header.first() != Some(&b'$') {
            return Err(ProtocolError);
        }
        let len = number(&header[1..])?;
        let end = next + len;
        if buf.len() < end + 2 {
            return Ok(None);
        }
        if &buf[end..end + 2] != b"\r\n" {
            return Err(ProtocolError);
        }
        args.push(buf[next..end].to_vec());
        pos = end + 2;
    }
    Ok(Some((args, pos)))
}

fn parse_inline(buf: &[u8]) -> Option<(Vec<Vec<u8>>, usize)> {
    let (text, consumed) = line(buf, 0)?;
    let args = text
        .split(|b| *b == b' ')
        .filter(|part| !part.is_empty())
        .map(<[u8]>::to_vec)
        .collect();
    Some((args, consumed))
}

// Returns the line starting at `start` without its CRLF, and the next offset.
fn line(buf: &[u8], start: usize) -> Option<(&[u8], usize)> {
    let rest = buf.get(start..)?;
    let end = rest.windows(2).position(|pair| pair == b"\r\n")?;
    Some((&rest[..end], start + end + 2))
}

fn number(digits: &[u8]) -> Result<usize, ProtocolError> {
    std::str::from_utf8(digits)
        .ok()
        .and_then(|text| text.parse().ok())
        .ok_or(ProtocolError)
}
