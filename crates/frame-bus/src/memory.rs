//! In-process [`Bus`] used by tests and local demos.
//!
//! Clones share the same store, so one handle can play the camera publisher
//! while another is owned by the pipeline.

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex, MutexGuard,
        atomic::{AtomicBool, Ordering},
    },
};

use crossbeam_channel::{Sender, TrySendError, bounded};

use crate::bus::{Bus, BusError, Notification, Subscription};

#[derive(Clone, Default)]
pub struct MemoryBus {
    inner: Arc<Mutex<State>>,
}

#[derive(Default)]
struct State {
    values: HashMap<String, Vec<u8>>,
    channels: HashMap<String, Vec<Subscriber>>,
    closed: bool,
}

struct Subscriber {
    tx: Sender<Notification>,
    stop: Arc<AtomicBool>,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Active subscribers on `channel`.
    pub fn subscriber_count(&self, channel: &str) -> usize {
        match self.inner.lock() {
            Ok(state) => state
                .channels
                .get(channel)
                .map(|subs| {
                    subs.iter()
                        .filter(|sub| !sub.stop.load(Ordering::SeqCst))
                        .count()
                })
                .unwrap_or(0),
            Err(_) => 0,
        }
    }

    /// Simulate a dropped connection: every subscriber is told the link is
    /// gone and further commands fail.
    pub fn close(&self) {
        if let Ok(mut state) = self.inner.lock() {
            state.closed = true;
            for (_, subscribers) in state.channels.drain() {
                for sub in subscribers {
                    let _ = sub.tx.try_send(Err(BusError::Closed));
                }
            }
        }
    }

    fn state(&self) -> Result<MutexGuard<'_, State>, BusError> {
        let state = self.inner.lock().map_err(|_| BusError::Closed)?;
        if state.closed {
            return Err(BusError::Closed);
        }
        Ok(state)
    }
}

impl Bus for MemoryBus {
    fn get(&mut self, key: &str) -> Result<Option<Vec<u8>>, BusError> {
        Ok(self.state()?.values.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: &[u8]) -> Result<(), BusError> {
        self.state()?.values.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn publish(&mut self, channel: &str, payload: &[u8]) -> Result<usize, BusError> {
        let mut state = self.state()?;
        let Some(subscribers) = state.channels.get_mut(channel) else {
            return Ok(0);
        };

        let mut delivered = 0;
        subscribers.retain(|sub| {
            if sub.stop.load(Ordering::SeqCst) {
                return false;
            }
            match sub.tx.try_send(Ok(payload.to_vec())) {
                Ok(()) => {
                    delivered += 1;
                    true
                }
                // A lagging subscriber misses this payload; the publisher never waits.
                Err(TrySendError::Full(_)) => true,
                Err(TrySendError::Disconnected(_)) => false,
            }
        });
        Ok(delivered)
    }

    fn subscribe(&mut self, channel: &str, capacity: usize) -> Result<Subscription, BusError> {
        let (tx, rx) = bounded(capacity.max(1));
        let stop = Arc::new(AtomicBool::new(false));
        self.state()?
            .channels
            .entry(channel.to_string())
            .or_default()
            .push(Subscriber {
                tx,
                stop: stop.clone(),
            });
        Ok(Subscription::new(channel.to_string(), rx, stop, None))
    }
}
