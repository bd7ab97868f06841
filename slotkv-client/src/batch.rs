//! # Batch Execution
//!
//! Purpose: Run many commands over one borrowed connection with two failure
//! contracts: pipelines may partially succeed, transactions commit all or
//! nothing.
//!
//! ## Design Principles
//! 1. **Accumulator Pattern**: `Op` counts sent commands and remembers the
//!    first transport failure, so the runner knows how many replies it owes.
//! 2. **Protocol Sync First**: After a domain error the runner still reads
//!    every owed reply, so the connection goes back to the pool clean.
//! 3. **Disposition Out-of-Band**: Runners report whether the connection may
//!    be reused separately from the result handed to the caller.

use std::io;

use crate::client::{command_parts, BatchFn};
use crate::config::Options;
use crate::conn::Connection;
use crate::error::{ClientError, ClientResult};
use crate::resp::RespValue;
use crate::slot::slot;

/// Command accumulator handed to batch functions.
pub struct Op<'c> {
    conn: &'c mut Connection,
    options: &'c Options,
    // Cluster batches are pinned to the routing key's slot.
    slot: Option<u16>,
    sent: usize,
    failure: Option<ClientError>,
}

impl<'c> Op<'c> {
    pub(crate) fn new(conn: &'c mut Connection, options: &'c Options, slot: Option<u16>) -> Self {
        Op {
            conn,
            options,
            slot,
            sent: 0,
            failure: None,
        }
    }

    /// Queues `cmd key args...`.
    ///
    /// The key gets the configured suffix and, in cluster batches, must map
    /// to the batch's slot; a mismatch is rejected before anything is sent.
    pub fn cmd(&mut self, cmd: &str, key: &[u8], args: &[&[u8]]) -> ClientResult<()> {
        if self.failure.is_some() {
            return Err(broken_batch());
        }
        let key = self.options.fix_key(key);
        if let Some(expected) = self.slot {
            let found = slot(&key);
            if found != expected {
                return Err(ClientError::CrossSlot { expected, found });
            }
        }
        let parts = command_parts(cmd, &key, args);
        self.send(&parts)
    }

    /// Queues a command verbatim, without key suffix or slot check.
    pub fn raw(&mut self, args: &[&[u8]]) -> ClientResult<()> {
        if self.failure.is_some() {
            return Err(broken_batch());
        }
        self.send(args)
    }

    /// Number of commands sent so far.
    pub fn sent(&self) -> usize {
        self.sent
    }

    fn send(&mut self, parts: &[&[u8]]) -> ClientResult<()> {
        match self.conn.send(parts) {
            Ok(()) => {
                self.sent += 1;
                Ok(())
            }
            Err(err) => {
                self.failure = Some(err);
                Err(broken_batch())
            }
        }
    }
}

/// Result of a batch run plus whether its connection may be reused.
pub(crate) struct BatchRun {
    pub result: ClientResult<Vec<RespValue>>,
    pub reusable: bool,
}

impl BatchRun {
    fn keep(result: ClientResult<Vec<RespValue>>) -> Self {
        BatchRun {
            result,
            reusable: true,
        }
    }

    fn discard(err: ClientError) -> Self {
        BatchRun {
            result: Err(err),
            reusable: false,
        }
    }
}

/// Runs `batch` as a pipeline.
///
/// - transport failure while sending: no replies read, connection discarded;
/// - domain error: owed replies read, returned inside `ClientError::Partial`;
/// - success: one reply per sent command, in order.
pub(crate) fn run_pipeline(
    conn: &mut Connection,
    options: &Options,
    slot: Option<u16>,
    batch: &mut BatchFn<'_>,
) -> BatchRun {
    let (outcome, sent, failure) = accumulate(conn, options, slot, batch);
    if let Some(err) = failure {
        return BatchRun::discard(err);
    }

    let replies = match drain(conn, sent) {
        Ok(replies) => replies,
        Err(err) => return BatchRun::discard(err),
    };

    match outcome {
        Ok(()) => BatchRun::keep(Ok(replies)),
        Err(source) => BatchRun::keep(Err(ClientError::Partial {
            replies,
            source: Box::new(source),
        })),
    }
}

/// Runs `batch` between `MULTI` and `EXEC`, or `DISCARD` on a domain error.
pub(crate) fn run_transaction(
    conn: &mut Connection,
    options: &Options,
    slot: Option<u16>,
    batch: &mut BatchFn<'_>,
) -> BatchRun {
    if let Err(err) = conn.send(&[b"MULTI"]) {
        return BatchRun::discard(err);
    }

    let (outcome, _sent, failure) = accumulate(conn, options, slot, batch);
    if let Some(err) = failure {
        return BatchRun::discard(err);
    }

    if let Err(source) = outcome {
        // Queued commands are dropped server-side; only the connection state
        // decides whether it can be reused.
        return BatchRun {
            reusable: conn.exec(&[b"DISCARD"]).is_ok(),
            result: Err(source),
        };
    }

    match conn.exec(&[b"EXEC"]) {
        Ok(RespValue::Array(items)) => BatchRun::keep(Ok(items)),
        Ok(RespValue::Bulk(None)) => BatchRun::keep(Err(ClientError::Nil)),
        Ok(_) => BatchRun::discard(ClientError::UnexpectedResponse),
        Err(err) => BatchRun::discard(err),
    }
}

fn accumulate(
    conn: &mut Connection,
    options: &Options,
    slot: Option<u16>,
    batch: &mut BatchFn<'_>,
) -> (ClientResult<()>, usize, Option<ClientError>) {
    let mut op = Op::new(conn, options, slot);
    let outcome = batch(&mut op);
    (outcome, op.sent, op.failure)
}

fn drain(conn: &mut Connection, count: usize) -> ClientResult<Vec<RespValue>> {
    if count == 0 {
        return Ok(Vec::new());
    }
    conn.flush()?;
    let mut replies = Vec::with_capacity(count);
    for _ in 0..count {
        replies.push(conn.receive()?);
    }
    Ok(replies)
}

fn broken_batch() -> ClientError {
    ClientError::Io(io::Error::new(
        io::ErrorKind::BrokenPipe,
        "batch connection failed on an earlier send",
    ))
}
