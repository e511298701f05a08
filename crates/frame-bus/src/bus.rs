use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread::JoinHandle,
    time::Duration,
};

use crossbeam_channel::{Receiver, RecvTimeoutError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BusError {
    #[error("cannot connect to bus at {address}")]
    Connect {
        address: String,
        #[source]
        source: redis::RedisError,
    },
    #[error("subscription to {channel:?} failed: {reason}")]
    Subscribe { channel: String, reason: String },
    #[error("value stored at {key:?} is invalid: {reason}")]
    InvalidValue { key: String, reason: String },
    #[error("bus connection closed")]
    Closed,
    #[error(transparent)]
    Redis(#[from] redis::RedisError),
}

impl BusError {
    /// Whether the error means the link to the bus is gone, as opposed to a
    /// single command being rejected.
    pub fn is_connection_loss(&self) -> bool {
        match self {
            BusError::Connect { .. } | BusError::Closed => true,
            BusError::Redis(err) => {
                err.is_connection_dropped() || err.is_io_error() || err.is_connection_refusal()
            }
            BusError::Subscribe { .. } | BusError::InvalidValue { .. } => false,
        }
    }
}

/// Key/value store plus publish/subscribe channels sharing one connection.
pub trait Bus: Send {
    /// Blocking single round trip; `Ok(None)` when the key is absent.
    fn get(&mut self, key: &str) -> Result<Option<Vec<u8>>, BusError>;

    /// Store a durable value at `key`.
    fn set(&mut self, key: &str, value: &[u8]) -> Result<(), BusError>;

    /// Fire-and-forget publish. Returns how many subscribers received it.
    fn publish(&mut self, channel: &str, payload: &[u8]) -> Result<usize, BusError>;

    /// Register for every payload published on `channel`. Payloads are pushed
    /// onto a queue of at most `capacity` entries drained by the caller.
    fn subscribe(&mut self, channel: &str, capacity: usize) -> Result<Subscription, BusError>;
}

pub type Notification = Result<Vec<u8>, BusError>;

/// Single-consumer handle on a channel subscription.
///
/// Dropping the handle stops delivery; [`Subscription::unsubscribe`] also waits
/// for the delivery thread, if any, to finish its current hand-off.
pub struct Subscription {
    channel: String,
    receiver: Receiver<Notification>,
    stop: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl Subscription {
    pub(crate) fn new(
        channel: String,
        receiver: Receiver<Notification>,
        stop: Arc<AtomicBool>,
        worker: Option<JoinHandle<()>>,
    ) -> Self {
        Self {
            channel,
            receiver,
            stop,
            worker,
        }
    }

    /// Wait up to `timeout` for the next payload. `Ok(None)` means nothing
    /// arrived in time; an error means the subscription can no longer deliver.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Option<Vec<u8>>, BusError> {
        match self.receiver.recv_timeout(timeout) {
            Ok(Ok(payload)) => Ok(Some(payload)),
            Ok(Err(err)) => Err(err),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(BusError::Closed),
        }
    }

    /// Number of payloads queued and not yet consumed.
    pub fn pending(&self) -> usize {
        self.receiver.len()
    }

    pub fn unsubscribe(mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                tracing::warn!(channel = %self.channel, "subscription thread panicked");
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
    }
}
