//! # Transport Connection
//!
//! Purpose: One blocking TCP connection speaking RESP2, exposing the four
//! primitives the upper layers build on: `exec` (request/response), and
//! `send` / `flush` / `receive` for pipelining.
//!
//! ## Design Principles
//! 1. **Pending Counter**: The connection knows how many replies are owed, so
//!    `exec` can drain earlier pipelined replies before reading its own.
//! 2. **Buffer Reuse**: Encode and line buffers live on the connection.
//! 3. **Dial Does Setup**: Timeouts, keep-alive, `AUTH` and `SELECT` happen
//!    inside `dial`; a connection that exists is ready for commands.

use std::io::{BufReader, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use socket2::{SockRef, TcpKeepalive};
use tracing::debug;

use crate::config::Options;
use crate::error::{ClientError, ClientResult};
use crate::resp::{encode_command, read_response, RespValue};

/// Buffered commands are written out once the buffer grows past this size.
const SEND_FLUSH_THRESHOLD: usize = 16 * 1024;

/// Single TCP connection with reusable buffers.
pub struct Connection {
    // Buffered reader reduces syscalls while still allowing direct writes.
    reader: BufReader<TcpStream>,
    line_buf: Vec<u8>,
    write_buf: Vec<u8>,
    // Replies owed by the server for commands already sent.
    pending: usize,
    addr: String,
}

impl Connection {
    /// Dials `addr` and prepares the connection according to `options`.
    pub fn dial(addr: &str, options: &Options) -> ClientResult<Self> {
        let stream = connect_stream(addr, options)?;
        if let Some(timeout) = options.read_timeout.filter(|t| !t.is_zero()) {
            stream.set_read_timeout(Some(timeout))?;
        }
        if let Some(timeout) = options.write_timeout.filter(|t| !t.is_zero()) {
            stream.set_write_timeout(Some(timeout))?;
        }
        // Disable Nagle to keep request latency low for small payloads.
        stream.set_nodelay(true)?;
        if !options.keepalive.is_zero() {
            let keepalive = TcpKeepalive::new().with_time(options.keepalive);
            SockRef::from(&stream).set_tcp_keepalive(&keepalive)?;
        }

        let mut conn = Connection {
            reader: BufReader::new(stream),
            line_buf: Vec::with_capacity(128),
            write_buf: Vec::with_capacity(256),
            pending: 0,
            addr: addr.to_string(),
        };

        if let Some(password) = options.password.as_deref() {
            conn.exec(&[b"AUTH", password.as_bytes()])?;
        }
        if options.select != 0 {
            let db = options.select.to_string();
            conn.exec(&[b"SELECT", db.as_bytes()])?;
        }

        debug!(addr, "dialed connection");
        Ok(conn)
    }

    /// Address this connection was dialed to.
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Number of replies still owed by the server.
    pub fn pending(&self) -> usize {
        self.pending
    }

    /// Queues one command. Writes out early when the buffer is large.
    pub fn send(&mut self, args: &[&[u8]]) -> ClientResult<()> {
        encode_command(args, &mut self.write_buf);
        self.pending += 1;
        if self.write_buf.len() >= SEND_FLUSH_THRESHOLD {
            self.write_out()?;
        }
        Ok(())
    }

    /// Writes every queued command to the socket.
    pub fn flush(&mut self) -> ClientResult<()> {
        self.write_out()?;
        self.reader.get_mut().flush()?;
        Ok(())
    }

    /// Reads the next reply. Error replies are returned as values.
    pub fn receive(&mut self) -> ClientResult<RespValue> {
        let reply = read_response(&mut self.reader, &mut self.line_buf)?;
        self.pending = self.pending.saturating_sub(1);
        Ok(reply)
    }

    /// Sends one command and returns its reply.
    ///
    /// Replies owed for earlier `send` calls are drained first; the first
    /// error reply among all of them is returned as `ClientError::Server`.
    pub fn exec(&mut self, args: &[&[u8]]) -> ClientResult<RespValue> {
        self.send(args)?;
        self.flush()?;

        let mut first_error = None;
        let mut reply = RespValue::Bulk(None);
        while self.pending > 0 {
            reply = self.receive()?;
            if let RespValue::Error(message) = &reply {
                if first_error.is_none() {
                    first_error = Some(message.clone());
                }
            }
        }

        match first_error {
            Some(message) => Err(ClientError::Server { message }),
            None => Ok(reply),
        }
    }

    /// Replaces the socket read timeout; `None` blocks indefinitely.
    pub fn set_read_timeout(&mut self, timeout: Option<Duration>) -> ClientResult<()> {
        let timeout = timeout.filter(|t| !t.is_zero());
        self.reader.get_ref().set_read_timeout(timeout)?;
        Ok(())
    }

    /// Duplicates the socket handle so another thread can shut it down.
    pub(crate) fn shutdown_handle(&self) -> std::io::Result<TcpStream> {
        self.reader.get_ref().try_clone()
    }

    /// Shuts the socket down. Errors are ignored; the peer may be gone.
    pub fn close(self) {
        let _ = self.reader.get_ref().shutdown(Shutdown::Both);
        debug!(addr = %self.addr, "closed connection");
    }

    fn write_out(&mut self) -> ClientResult<()> {
        if self.write_buf.is_empty() {
            return Ok(());
        }
        let stream = self.reader.get_mut();
        let result = stream.write_all(&self.write_buf);
        self.write_buf.clear();
        result?;
        Ok(())
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("addr", &self.addr)
            .field("pending", &self.pending)
            .finish()
    }
}

fn connect_stream(addr: &str, options: &Options) -> ClientResult<TcpStream> {
    let addrs: Vec<SocketAddr> = addr
        .to_socket_addrs()
        .map_err(|_| ClientError::InvalidAddress(addr.to_string()))?
        .collect();
    if addrs.is_empty() {
        return Err(ClientError::InvalidAddress(addr.to_string()));
    }

    let mut last_err = None;
    for sock_addr in addrs {
        let attempt = match options.connect_timeout {
            Some(timeout) if !timeout.is_zero() => TcpStream::connect_timeout(&sock_addr, timeout),
            _ => TcpStream::connect(sock_addr),
        };
        match attempt {
            Ok(stream) => return Ok(stream),
            Err(err) => last_err = Some(err),
        }
    }
    Err(ClientError::Io(last_err.unwrap_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::NotConnected, "no address dialed")
    })))
}
