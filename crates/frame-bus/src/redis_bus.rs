//! Redis-backed [`Bus`]: GET/SET for keyed values, PUBLISH/SUBSCRIBE for frames.
//!
//! Subscriptions get their own connection on a background thread which reads
//! pub/sub messages and forwards them over a bounded channel, so the consumer
//! side never touches the socket.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::Duration,
};

use crossbeam_channel::{SendTimeoutError, Sender, bounded};
use redis::Commands;
use tracing::{debug, warn};

use crate::bus::{Bus, BusError, Notification, Subscription};

pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);
const SUBSCRIPTION_POLL: Duration = Duration::from_millis(200);

pub struct RedisBus {
    client: redis::Client,
    connection: redis::Connection,
}

impl RedisBus {
    /// Open a connection to `host:port`, failing fast when no server answers.
    pub fn connect(host: &str, port: u16) -> Result<Self, BusError> {
        let address = format!("redis://{host}:{port}/");
        let client = redis::Client::open(address.as_str()).map_err(|source| BusError::Connect {
            address: address.clone(),
            source,
        })?;
        let connection = client
            .get_connection_with_timeout(CONNECT_TIMEOUT)
            .map_err(|source| BusError::Connect {
                address: address.clone(),
                source,
            })?;
        debug!("connected to {address}");
        Ok(Self {
            client,
            connection,
        })
    }
}

impl Bus for RedisBus {
    fn get(&mut self, key: &str) -> Result<Option<Vec<u8>>, BusError> {
        Ok(self.connection.get(key)?)
    }

    fn set(&mut self, key: &str, value: &[u8]) -> Result<(), BusError> {
        self.connection.set::<_, _, ()>(key, value)?;
        Ok(())
    }

    fn publish(&mut self, channel: &str, payload: &[u8]) -> Result<usize, BusError> {
        let receivers: i64 = self.connection.publish(channel, payload)?;
        Ok(receivers.max(0) as usize)
    }

    fn subscribe(&mut self, channel: &str, capacity: usize) -> Result<Subscription, BusError> {
        let (tx, rx) = bounded::<Notification>(capacity.max(1));
        let (ready_tx, ready_rx) = bounded::<Result<(), String>>(1);
        let stop = Arc::new(AtomicBool::new(false));

        let client = self.client.clone();
        let thread_channel = channel.to_string();
        let thread_stop = stop.clone();
        let dispatch = tracing::dispatcher::get_default(|current| current.clone());
        let worker = thread::Builder::new()
            .name(format!("bus-subscription-{channel}"))
            .spawn(move || {
                tracing::dispatcher::with_default(&dispatch, || {
                    subscription_loop(client, thread_channel, tx, ready_tx, thread_stop)
                })
            })
            .map_err(|err| BusError::Subscribe {
                channel: channel.to_string(),
                reason: err.to_string(),
            })?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Subscription::new(
                channel.to_string(),
                rx,
                stop,
                Some(worker),
            )),
            Ok(Err(reason)) => {
                let _ = worker.join();
                Err(BusError::Subscribe {
                    channel: channel.to_string(),
                    reason,
                })
            }
            Err(_) => {
                let _ = worker.join();
                Err(BusError::Subscribe {
                    channel: channel.to_string(),
                    reason: "subscription thread exited before subscribing".to_string(),
                })
            }
        }
    }
}

fn subscription_loop(
    client: redis::Client,
    channel: String,
    tx: Sender<Notification>,
    ready_tx: Sender<Result<(), String>>,
    stop: Arc<AtomicBool>,
) {
    let mut connection = match client.get_connection_with_timeout(CONNECT_TIMEOUT) {
        Ok(connection) => connection,
        Err(err) => {
            let _ = ready_tx.send(Err(err.to_string()));
            return;
        }
    };
    let mut pubsub = connection.as_pubsub();
    if let Err(err) = pubsub.subscribe(&channel) {
        let _ = ready_tx.send(Err(err.to_string()));
        return;
    }
    if let Err(err) = pubsub.set_read_timeout(Some(SUBSCRIPTION_POLL)) {
        let _ = ready_tx.send(Err(err.to_string()));
        return;
    }
    let _ = ready_tx.send(Ok(()));
    drop(ready_tx);
    debug!("subscribed to {channel}");

    while !stop.load(Ordering::Relaxed) {
        match pubsub.get_message() {
            Ok(message) => {
                let payload = message.get_payload_bytes().to_vec();
                if !forward(&tx, Ok(payload), &stop) {
                    break;
                }
            }
            Err(err) if err.is_timeout() => continue,
            Err(err) => {
                warn!("subscription to {channel} failed: {err}");
                let _ = forward(&tx, Err(BusError::Redis(err)), &stop);
                break;
            }
        }
    }

    let _ = pubsub.unsubscribe(&channel);
    debug!("unsubscribed from {channel}");
}

/// Hand a notification to the consumer, waiting while the queue is full.
/// Returns `false` once the consumer is gone or a stop was requested.
fn forward(tx: &Sender<Notification>, notification: Notification, stop: &AtomicBool) -> bool {
    let mut pending = notification;
    loop {
        match tx.send_timeout(pending, SUBSCRIPTION_POLL) {
            Ok(()) => return true,
            Err(SendTimeoutError::Timeout(back)) => {
                if stop.load(Ordering::Relaxed) {
                    return false;
                }
                pending = back;
            }
            Err(SendTimeoutError::Disconnected(_)) => return false,
        }
    }
}
