//! # Publish / Subscribe
//!
//! Purpose: Drive one subscription on a dedicated connection, dispatching
//! message frames and confirmation frames to separate callbacks.
//!
//! ## Design Principles
//! 1. **Blocking Loop**: The caller's thread owns the subscription until a
//!    callback breaks or fails.
//! 2. **No Read Deadline**: Subscribers wait for publishers, so the socket read
//!    timeout is cleared for the lifetime of the loop.
//! 3. **Connection Is Spent**: A connection in subscribed mode cannot serve
//!    regular commands again, so callers always discard it afterwards.

use tracing::debug;

use crate::client::{DataFn, MetaFn};
use crate::conn::Connection;
use crate::error::{ClientError, ClientResult, Lossy};
use crate::resp::RespValue;

/// Non-message frame received while subscribed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionEvent {
    /// Frame kind, e.g. `subscribe` or `unsubscribe`.
    pub kind: String,
    /// Channel the frame refers to.
    pub channel: Vec<u8>,
    /// Number of active subscriptions reported by the server.
    pub count: i64,
}

enum Frame {
    Message { channel: Vec<u8>, payload: Vec<u8> },
    Event(SubscriptionEvent),
}

/// Subscribes `conn` to `channel` and pumps frames until a callback stops.
pub(crate) fn run_subscription(
    conn: &mut Connection,
    channel: &[u8],
    on_data: &mut DataFn<'_>,
    on_meta: &mut MetaFn<'_>,
) -> ClientResult<()> {
    conn.set_read_timeout(None)?;
    conn.send(&[b"SUBSCRIBE", channel])?;
    conn.flush()?;
    debug!(channel = %Lossy(channel), addr = conn.addr(), "subscribed");

    loop {
        let reply = conn.receive()?;
        let flow = match parse_frame(reply)? {
            Frame::Message { channel, payload } => on_data(&channel, &payload)?,
            Frame::Event(event) => on_meta(&event)?,
        };
        if flow.is_break() {
            return Ok(());
        }
    }
}

fn parse_frame(reply: RespValue) -> ClientResult<Frame> {
    let items = match reply {
        RespValue::Error(message) => return Err(ClientError::Server { message }),
        other => other.into_array()?,
    };
    let mut items = items.into_iter();
    let kind = items
        .next()
        .ok_or(ClientError::UnexpectedResponse)?
        .into_string()?;

    match kind.as_str() {
        "message" => {
            let channel = next_bytes(&mut items)?;
            let payload = next_bytes(&mut items)?;
            Ok(Frame::Message { channel, payload })
        }
        "pmessage" => {
            let _pattern = next_bytes(&mut items)?;
            let channel = next_bytes(&mut items)?;
            let payload = next_bytes(&mut items)?;
            Ok(Frame::Message { channel, payload })
        }
        _ => {
            let channel = next_bytes(&mut items)?;
            let count = match items.next() {
                Some(value) => value.as_i64()?,
                None => 0,
            };
            Ok(Frame::Event(SubscriptionEvent {
                kind,
                channel,
                count,
            }))
        }
    }
}

fn next_bytes(items: &mut impl Iterator<Item = RespValue>) -> ClientResult<Vec<u8>> {
    items
        .next()
        .ok_or(ClientError::UnexpectedResponse)?
        .into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bulk(data: &[u8]) -> RespValue {
        RespValue::Bulk(Some(data.to_vec()))
    }

    #[test]
    fn parses_message_frames() {
        let frame = parse_frame(RespValue::Array(vec![
            bulk(b"message"),
            bulk(b"news"),
            bulk(b"hello"),
        ]))
        .unwrap();
        match frame {
            Frame::Message { channel, payload } => {
                assert_eq!(channel, b"news");
                assert_eq!(payload, b"hello");
            }
            Frame::Event(_) => panic!("expected message"),
        }
    }

    #[test]
    fn parses_pattern_messages_by_channel() {
        let frame = parse_frame(RespValue::Array(vec![
            bulk(b"pmessage"),
            bulk(b"n*"),
            bulk(b"news"),
            bulk(b"hi"),
        ]))
        .unwrap();
        assert!(matches!(frame, Frame::Message { channel, .. } if channel == b"news"));
    }

    #[test]
    fn parses_confirmation_as_event() {
        let frame = parse_frame(RespValue::Array(vec![
            bulk(b"subscribe"),
            bulk(b"news"),
            RespValue::Integer(1),
        ]))
        .unwrap();
        match frame {
            Frame::Event(event) => {
                assert_eq!(event.kind, "subscribe");
                assert_eq!(event.channel, b"news");
                assert_eq!(event.count, 1);
            }
            Frame::Message { .. } => panic!("expected event"),
        }
    }

    #[test]
    fn error_reply_ends_subscription() {
        let err = parse_frame(RespValue::Error(b"ERR no".to_vec())).err().unwrap();
        assert!(matches!(err, ClientError::Server { .. }));
    }
}
