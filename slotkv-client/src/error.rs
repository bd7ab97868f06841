//! # Client Errors
//!
//! Purpose: One error type for every layer of the driver, so pool, router,
//! batch and lock code can propagate with `?` and callers can still tell a
//! capacity problem from a transport failure or a redirection.
//!
//! ## Design Principles
//! 1. **Taxonomy over Strings**: Each failure class gets its own variant.
//! 2. **Sentinels Stay Cheap**: `Nil` marks a missing value, not a failure.
//! 3. **Partial Results Travel With the Error**: A pipeline that stopped on a
//!    domain error still hands back the replies it received.

use std::fmt;

use thiserror::Error;

use crate::resp::RespValue;

/// Result type for the client.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors surfaced by the client.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Network or IO failure while dialing, reading or writing.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// RESP2 framing or parse error.
    #[error("protocol error")]
    Protocol,
    /// Server returned an error reply.
    #[error("server error: {}", String::from_utf8_lossy(.message))]
    Server { message: Vec<u8> },
    /// Response type did not match the expected command response.
    #[error("unexpected response")]
    UnexpectedResponse,
    /// The reply was a null bulk or array. Not a connection failure.
    #[error("nil reply")]
    Nil,
    /// Pool is at capacity and configured to fail instead of waiting.
    #[error("exceeded the max conns")]
    PoolExhausted,
    /// Waiting for a pooled connection passed its deadline.
    #[error("timed out waiting for a pooled connection")]
    PoolTimeout,
    /// The pool was closed.
    #[error("connection pool closed")]
    PoolClosed,
    /// Address could not be resolved into a socket address.
    #[error("invalid address: {0}")]
    InvalidAddress(String),
    /// Invalid or inconsistent options.
    #[error("config error: {0}")]
    Config(String),
    /// A registry name was already taken.
    #[error("duplicate client name: {0}")]
    DuplicateName(String),
    /// No client registered under the requested name.
    #[error("client not found: {0}")]
    ClientNotFound(String),
    /// Caller passed arguments the operation cannot route or execute.
    #[error("argument exception: {0}")]
    InvalidArgument(&'static str),
    /// Scripts must address exactly one key in cluster mode.
    #[error("unsupported script key count {0}, which must be 1 in cluster mode")]
    UnsupportedKeyCount(usize),
    /// A batch command addressed a slot other than the batch's routing slot.
    #[error("key maps to slot {found}, batch is pinned to slot {expected}")]
    CrossSlot { expected: u16, found: u16 },
    /// `CLUSTER SLOTS` returned something that is not a slot table.
    #[error("invalid cluster slots: {0}")]
    InvalidClusterSlots(String),
    /// The installed topology has no node for this slot.
    #[error("slot {0} is not served by any node")]
    SlotUnassigned(u16),
    /// Distributed lock could not be acquired within its tries.
    #[error("failed to acquire lock")]
    LockFailed,
    /// Application error raised by a batch function.
    #[error(transparent)]
    Domain(Box<dyn std::error::Error + Send + Sync>),
    /// A pipeline stopped on a domain error after some commands were sent.
    #[error("pipeline aborted after {} replies: {source}", .replies.len())]
    Partial {
        replies: Vec<RespValue>,
        source: Box<ClientError>,
    },
}

impl ClientError {
    /// Wraps an application error raised inside a batch function.
    pub fn domain<E>(err: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        ClientError::Domain(err.into())
    }

    /// Returns true when the error signals a stale cluster topology.
    ///
    /// `MOVED`/`ASK` replies and connection-level failures both qualify, as do
    /// slots without an owner and pools closed by a concurrent refresh.
    pub fn is_redirect(&self) -> bool {
        match self {
            ClientError::Io(_) => true,
            ClientError::Server { message } => is_redirect_message(message),
            ClientError::SlotUnassigned(_) | ClientError::PoolClosed => true,
            _ => false,
        }
    }

    /// Returns true for the empty-reply sentinel.
    pub fn is_nil(&self) -> bool {
        matches!(self, ClientError::Nil)
    }

    /// Returns the leading word of a server error reply, e.g. `MOVED`.
    pub fn code(&self) -> Option<&[u8]> {
        match self {
            ClientError::Server { message } => {
                let end = message
                    .iter()
                    .position(|b| *b == b' ')
                    .unwrap_or(message.len());
                Some(&message[..end])
            }
            _ => None,
        }
    }
}

/// Returns true for `MOVED ...` and `ASK ...` error payloads.
pub(crate) fn is_redirect_message(message: &[u8]) -> bool {
    message.starts_with(b"MOVED") || message.starts_with(b"ASK")
}

/// Display helper for byte strings in log fields.
pub(crate) struct Lossy<'a>(pub &'a [u8]);

impl fmt::Display for Lossy<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(self.0))
    }
}
