//! Frame acquisition in both delivery styles against the same bus key.
//!
//! `fetch_once` performs a blocking GET of `<key>`; `subscribe` listens on the
//! channel `<key>` and hands every payload to a single consumer queue. Frame
//! geometry always comes from the `<key>:width`, `<key>:height` and
//! `<key>:channels` side keys, read once when the source is opened.

use std::time::Duration;

use thiserror::Error;
use tracing::debug;

use crate::{
    bus::{Bus, BusError, Subscription},
    types::{FrameError, FrameMetadata, RawFrame},
};

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("camera parameters not found: {key:?} is missing")]
    MissingMetadata { key: String },
    #[error("camera parameter {key:?} is not an unsigned integer: {value:?}")]
    InvalidMetadata { key: String, value: String },
    #[error("no frame stored at {key:?}")]
    NotFound { key: String },
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error(transparent)]
    Bus(#[from] BusError),
}

/// Read `<key>:width`, `<key>:height` and `<key>:channels`.
pub fn read_metadata<B: Bus + ?Sized>(bus: &mut B, key: &str) -> Result<FrameMetadata, SourceError> {
    let width = read_dimension(bus, &format!("{key}:width"))?;
    let height = read_dimension(bus, &format!("{key}:height"))?;
    let channels = read_dimension(bus, &format!("{key}:channels"))?;
    Ok(FrameMetadata::new(width, height, channels))
}

fn read_dimension<B: Bus + ?Sized>(bus: &mut B, key: &str) -> Result<u32, SourceError> {
    let raw = bus.get(key)?.ok_or_else(|| SourceError::MissingMetadata {
        key: key.to_string(),
    })?;
    let text = String::from_utf8_lossy(&raw);
    text.trim()
        .parse::<u32>()
        .map_err(|_| SourceError::InvalidMetadata {
            key: key.to_string(),
            value: text.into_owned(),
        })
}

pub struct FrameSource<B: Bus> {
    bus: B,
    key: String,
    meta: FrameMetadata,
}

impl<B: Bus> FrameSource<B> {
    /// Bind to `key`, reading the frame geometry up front.
    pub fn open(mut bus: B, key: impl Into<String>) -> Result<Self, SourceError> {
        let key = key.into();
        let meta = read_metadata(&mut bus, &key)?;
        debug!(
            "camera {key}: {}x{} with {} channel(s)",
            meta.width, meta.height, meta.channels
        );
        Ok(Self { bus, key, meta })
    }

    pub fn metadata(&self) -> FrameMetadata {
        self.meta
    }

    /// The underlying connection, shared with whoever publishes results.
    pub fn bus_mut(&mut self) -> &mut B {
        &mut self.bus
    }

    /// Fetch the frame currently stored at the key.
    pub fn fetch_once(&mut self) -> Result<RawFrame, SourceError> {
        let payload = self.bus.get(&self.key)?.ok_or_else(|| SourceError::NotFound {
            key: self.key.clone(),
        })?;
        Ok(RawFrame::new(self.meta, payload)?)
    }

    /// Start receiving every frame published on the key's channel.
    pub fn subscribe(&mut self, capacity: usize) -> Result<FrameSubscription, SourceError> {
        let subscription = self.bus.subscribe(&self.key, capacity)?;
        Ok(FrameSubscription {
            subscription,
            meta: self.meta,
        })
    }
}

/// Outcome of waiting on a [`FrameSubscription`].
#[derive(Debug)]
pub enum FrameEvent {
    Frame(RawFrame),
    /// A payload arrived but disagrees with the declared geometry.
    Malformed(FrameError),
    /// Nothing arrived before the timeout.
    Idle,
}

pub struct FrameSubscription {
    subscription: Subscription,
    meta: FrameMetadata,
}

impl FrameSubscription {
    /// Wait for the next published frame. Errors mean the bus link is gone.
    pub fn next_frame(&self, timeout: Duration) -> Result<FrameEvent, BusError> {
        match self.subscription.recv_timeout(timeout)? {
            Some(payload) => match RawFrame::new(self.meta, payload) {
                Ok(frame) => Ok(FrameEvent::Frame(frame)),
                Err(err) => Ok(FrameEvent::Malformed(err)),
            },
            None => Ok(FrameEvent::Idle),
        }
    }

    pub fn pending(&self) -> usize {
        self.subscription.pending()
    }

    /// Stop delivery. A frame already handed out keeps being processed.
    pub fn unsubscribe(self) {
        self.subscription.unsubscribe();
    }
}
