//! # Client Contract
//!
//! Purpose: The one interface callers program against, whether the backing
//! store is a single node (`Pool`) or a sharded cluster (`Cluster`).
//!
//! ## Design Principles
//! 1. **Facade Pattern**: Callers never see pools, slots or retries.
//! 2. **Explicit Routing Key**: Every keyed call names its routing key as a
//!    separate `&[u8]`; nothing is inferred from the argument list.
//! 3. **Object Safe**: The trait is used as `Arc<dyn Client>` by the registry
//!    and the lock, so callbacks are `dyn FnMut`.

use std::ops::ControlFlow;
use std::sync::Arc;

use crate::batch::Op;
use crate::cluster::Cluster;
use crate::config::Options;
use crate::error::ClientResult;
use crate::pool::Pool;
use crate::pubsub::SubscriptionEvent;
use crate::resp::RespValue;
use crate::script::Script;

/// Batch function: issues commands through the accumulator.
///
/// Returning `Err` that did not come from the accumulator is a domain error.
pub type BatchFn<'f> = dyn FnMut(&mut Op<'_>) -> ClientResult<()> + 'f;

/// Called with `(channel, payload)` for every published message.
pub type DataFn<'f> = dyn FnMut(&[u8], &[u8]) -> ClientResult<ControlFlow<()>> + 'f;

/// Called for subscription confirmations and other non-message frames.
pub type MetaFn<'f> = dyn FnMut(&SubscriptionEvent) -> ClientResult<ControlFlow<()>> + 'f;

/// Public client contract.
pub trait Client: std::fmt::Debug + Send + Sync {
    /// Executes `cmd key args...` and returns the reply.
    ///
    /// A missing value is `Ok(RespValue::Bulk(None))`, never an error.
    fn exec(&self, cmd: &str, key: &[u8], args: &[&[u8]]) -> ClientResult<RespValue>;

    /// Runs `batch` as a pipeline on the node owning `key`.
    ///
    /// May partially succeed; see `ClientError::Partial`.
    fn pipeline(&self, key: &[u8], batch: &mut BatchFn<'_>) -> ClientResult<Vec<RespValue>>;

    /// Runs `batch` inside `MULTI`/`EXEC` on the node owning `key`.
    ///
    /// All queued commands commit together or none do.
    fn transaction(&self, key: &[u8], batch: &mut BatchFn<'_>) -> ClientResult<Vec<RespValue>>;

    /// Publishes `message` on `channel`, returning the receiver count.
    fn publish(&self, channel: &[u8], message: &[u8]) -> ClientResult<i64>;

    /// Subscribes to `channel` and blocks, feeding frames to the callbacks
    /// until one of them breaks or returns an error.
    fn subscribe(
        &self,
        channel: &[u8],
        on_data: &mut DataFn<'_>,
        on_meta: &mut MetaFn<'_>,
    ) -> ClientResult<()>;

    /// Evaluates `script` with `keys` and `args`.
    fn eval(&self, script: &Script, keys: &[&[u8]], args: &[&[u8]]) -> ClientResult<RespValue>;

    /// Closes every pooled connection.
    fn close(&self);
}

/// Builds a pool or a cluster client depending on `options.cluster`.
pub fn connect(options: Options) -> ClientResult<Arc<dyn Client>> {
    let options = options.normalize();
    options.validate()?;
    if options.cluster {
        Ok(Arc::new(Cluster::new(options)?))
    } else {
        let addr = options.address[0].clone();
        Ok(Arc::new(Pool::new(addr, options)?))
    }
}

/// Assembles `cmd key args...` into one argument vector.
pub(crate) fn command_parts<'a>(cmd: &'a str, key: &'a [u8], args: &[&'a [u8]]) -> Vec<&'a [u8]> {
    let mut parts = Vec::with_capacity(args.len() + 2);
    parts.push(cmd.as_bytes());
    parts.push(key);
    parts.extend_from_slice(args);
    parts
}
