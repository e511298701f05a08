//! Frame ingestion from a shared bus.
//!
//! A camera process stores frame geometry under `<key>:width|height|channels`
//! and either stores the latest frame at `<key>` or publishes every frame on
//! the channel `<key>`. [`FrameSource`] covers both, [`to_luma`] turns a frame
//! into the single-channel plane detectors work on.

pub mod bus;
pub mod luma;
pub mod memory;
pub mod redis_bus;
pub mod source;
pub mod types;

pub use bus::{Bus, BusError, Notification, Subscription};
pub use luma::{LumaBuffer, luma_from_interleaved, to_luma};
pub use memory::MemoryBus;
pub use redis_bus::RedisBus;
pub use source::{FrameEvent, FrameSource, FrameSubscription, SourceError, read_metadata};
pub use types::{FrameError, FrameMetadata, RawFrame};
