//! # RESP2 Encoding and Parsing
//!
//! Purpose: Encode client commands and parse server responses without
//! external dependencies, keeping allocations under control.
//!
//! ## Design Principles
//! 1. **State-Free Parsing**: Responses are parsed top-down with minimal state.
//! 2. **Buffer Reuse**: Caller provides buffers to avoid per-call allocations.
//! 3. **Binary-Safe**: Bulk strings are treated as raw bytes.
//! 4. **Fail Fast**: Invalid framing returns protocol errors immediately.

use std::io::{BufRead, Read};

use crate::error::{ClientError, ClientResult};

/// RESP response value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RespValue {
    /// +OK or +PONG style responses.
    Simple(Vec<u8>),
    /// -ERR ... responses.
    Error(Vec<u8>),
    /// :123 responses.
    Integer(i64),
    /// $... bulk strings, with None for null bulk and null array.
    Bulk(Option<Vec<u8>>),
    /// *... arrays.
    Array(Vec<RespValue>),
}

impl RespValue {
    /// Returns true for a null bulk string or null array.
    pub fn is_nil(&self) -> bool {
        matches!(self, RespValue::Bulk(None))
    }

    /// Returns true for `+OK`.
    pub fn is_ok(&self) -> bool {
        matches!(self, RespValue::Simple(text) if text == b"OK")
    }

    /// Interprets the reply as an integer.
    ///
    /// Integer replies are returned directly; bulk and simple strings are
    /// parsed as decimal. Nil yields `ClientError::Nil`.
    pub fn as_i64(&self) -> ClientResult<i64> {
        match self {
            RespValue::Integer(value) => Ok(*value),
            RespValue::Bulk(Some(data)) | RespValue::Simple(data) => parse_i64(data),
            RespValue::Bulk(None) => Err(ClientError::Nil),
            RespValue::Error(message) => Err(ClientError::Server {
                message: message.clone(),
            }),
            RespValue::Array(_) => Err(ClientError::UnexpectedResponse),
        }
    }

    /// Consumes the reply and returns its payload bytes.
    pub fn into_bytes(self) -> ClientResult<Vec<u8>> {
        match self {
            RespValue::Bulk(Some(data)) | RespValue::Simple(data) => Ok(data),
            RespValue::Integer(value) => Ok(value.to_string().into_bytes()),
            RespValue::Bulk(None) => Err(ClientError::Nil),
            RespValue::Error(message) => Err(ClientError::Server { message }),
            RespValue::Array(_) => Err(ClientError::UnexpectedResponse),
        }
    }

    /// Consumes the reply and returns it as UTF-8 text.
    pub fn into_string(self) -> ClientResult<String> {
        String::from_utf8(self.into_bytes()?).map_err(|_| ClientError::UnexpectedResponse)
    }

    /// Consumes an array reply and returns its items.
    pub fn into_array(self) -> ClientResult<Vec<RespValue>> {
        match self {
            RespValue::Array(items) => Ok(items),
            RespValue::Bulk(None) => Err(ClientError::Nil),
            RespValue::Error(message) => Err(ClientError::Server { message }),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }
}

/// Encodes a RESP2 array command into the provided buffer.
pub fn encode_command(args: &[&[u8]], out: &mut Vec<u8>) {
    out.push(b'*');
    push_usize(out, args.len());
    out.extend_from_slice(b"\r\n");
    for arg in args {
        out.push(b'$');
        push_usize(out, arg.len());
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(arg);
        out.extend_from_slice(b"\r\n");
    }
}

/// Largest bulk string accepted, matching the server's default
/// `proto-max-bulk-len`.
pub const MAX_BULK_LEN: i64 = 512 * 1024 * 1024;
/// Largest array header accepted.
pub const MAX_ARRAY_LEN: i64 = 1 << 32;
/// Deepest array nesting accepted.
pub const MAX_DEPTH: usize = 64;

// Initial reservation cap; larger payloads grow as bytes actually arrive.
const PREALLOC_LIMIT: usize = 64 * 1024;

/// Reads one RESP value from the buffered reader.
///
/// Length headers are checked against `MAX_BULK_LEN`, `MAX_ARRAY_LEN` and
/// `MAX_DEPTH` before anything is allocated.
pub fn read_response<R: BufRead>(reader: &mut R, line_buf: &mut Vec<u8>) -> ClientResult<RespValue> {
    read_value(reader, line_buf, 0)
}

fn read_value<R: BufRead>(
    reader: &mut R,
    line_buf: &mut Vec<u8>,
    depth: usize,
) -> ClientResult<RespValue> {
    read_line(reader, line_buf)?;
    if line_buf.is_empty() {
        return Err(ClientError::Protocol);
    }

    match line_buf[0] {
        b'+' => Ok(RespValue::Simple(line_buf[1..].to_vec())),
        b'-' => Ok(RespValue::Error(line_buf[1..].to_vec())),
        b':' => Ok(RespValue::Integer(parse_i64(&line_buf[1..])?)),
        b'$' => {
            let len = parse_i64(&line_buf[1..])?;
            parse_bulk_len(reader, len, line_buf)
        }
        b'*' => {
            let len = parse_i64(&line_buf[1..])?;
            parse_array_len(reader, len, line_buf, depth)
        }
        _ => Err(ClientError::Protocol),
    }
}

fn parse_bulk_len<R: BufRead>(
    reader: &mut R,
    len: i64,
    line_buf: &mut Vec<u8>,
) -> ClientResult<RespValue> {
    if len < 0 {
        return Ok(RespValue::Bulk(None));
    }
    if len > MAX_BULK_LEN {
        return Err(ClientError::Protocol);
    }
    let len = len as usize;
    let mut data = Vec::with_capacity(len.min(PREALLOC_LIMIT));
    reader.by_ref().take(len as u64).read_to_end(&mut data)?;
    if data.len() != len {
        return Err(ClientError::Io(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "connection closed inside bulk string",
        )));
    }

    let mut crlf = [0u8; 2];
    reader.read_exact(&mut crlf)?;
    if crlf != [b'\r', b'\n'] {
        return Err(ClientError::Protocol);
    }

    line_buf.clear();
    Ok(RespValue::Bulk(Some(data)))
}

fn parse_array_len<R: BufRead>(
    reader: &mut R,
    len: i64,
    line_buf: &mut Vec<u8>,
    depth: usize,
) -> ClientResult<RespValue> {
    if len < 0 {
        return Ok(RespValue::Bulk(None));
    }
    if len == 0 {
        return Ok(RespValue::Array(Vec::new()));
    }
    if len > MAX_ARRAY_LEN || depth >= MAX_DEPTH {
        return Err(ClientError::Protocol);
    }

    let len = len as usize;
    let mut items = Vec::with_capacity(len.min(PREALLOC_LIMIT / std::mem::size_of::<RespValue>()));
    for _ in 0..len {
        items.push(read_value(reader, line_buf, depth + 1)?);
    }
    Ok(RespValue::Array(items))
}

fn read_line<R: BufRead>(reader: &mut R, buf: &mut Vec<u8>) -> ClientResult<()> {
    buf.clear();
    let bytes = reader.read_until(b'\n', buf)?;
    if bytes == 0 {
        return Err(ClientError::Io(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "connection closed by peer",
        )));
    }
    if buf.len() < 2 || buf[buf.len() - 2] != b'\r' {
        return Err(ClientError::Protocol);
    }
    buf.truncate(buf.len() - 2);
    Ok(())
}

fn parse_i64(data: &[u8]) -> ClientResult<i64> {
    let (negative, digits) = match data.split_first() {
        Some((b'-', rest)) => (true, rest),
        _ => (false, data),
    };
    if digits.is_empty() {
        return Err(ClientError::Protocol);
    }

    // Accumulate toward the sign so that i64::MIN parses without overflow.
    let mut value: i64 = 0;
    for &b in digits {
        if !b.is_ascii_digit() {
            return Err(ClientError::Protocol);
        }
        let digit = (b - b'0') as i64;
        value = value
            .checked_mul(10)
            .and_then(|v| {
                if negative {
                    v.checked_sub(digit)
                } else {
                    v.checked_add(digit)
                }
            })
            .ok_or(ClientError::Protocol)?;
    }
    Ok(value)
}

fn push_usize(out: &mut Vec<u8>, mut value: usize) {
    // Digits go into a stack buffer first; no heap traffic per argument.
    let mut buf = [0u8; 20];
    let mut len = 0;
    if value == 0 {
        buf[0] = b'0';
        len = 1;
    } else {
        while value > 0 {
            buf[len] = b'0' + (value % 10) as u8;
            value /= 10;
            len += 1;
        }
    }
    for idx in (0..len).rev() {
        out.push(buf[idx]);
    }
}
