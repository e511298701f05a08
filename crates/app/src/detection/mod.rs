//! Marker detection service reading camera frames from a Redis bus.
//!
//! The module is split into focused submodules:
//! - `config`: CLI arguments and the immutable run configuration.
//! - `controller`: Pipeline state machine driving fetch, detect and publish.
//! - `normalize`: Backend-native detections to canonical marker records.
//! - `data`: Marker records and their JSON wire format.
//! - `sink`: Result delivery (store or publish).
//! - `error`: Pipeline error taxonomy.
//! - `telemetry`: Tracing subscriber and metrics recorder.
//! - `show`: Read back stored results.

pub use config::{DetectCliArgs, DetectionConfig};
/// Run the detection service with a ready-made configuration.
pub use pipeline::run;
pub use show::{ShowCliArgs, show_detections};

mod config;
mod controller;
mod data;
mod error;
mod normalize;
mod pipeline;
mod show;
mod sink;
mod telemetry;
