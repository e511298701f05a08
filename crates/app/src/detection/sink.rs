use frame_bus::Bus;
use tracing::debug;

use crate::detection::{config::RunMode, data::DetectionBatch, error::PipelineError};

/// Delivers serialized batches back to the bus.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResultSink {
    mode: RunMode,
    target: String,
}

impl ResultSink {
    pub fn new(mode: RunMode, target: impl Into<String>) -> Self {
        Self {
            mode,
            target: target.into(),
        }
    }

    /// Serialize `batch` and store it (unique mode) or publish it (stream
    /// mode). Returns the document that was sent.
    pub fn publish<B: Bus + ?Sized>(
        &self,
        bus: &mut B,
        batch: &DetectionBatch,
    ) -> Result<String, PipelineError> {
        let document = batch.to_json()?;
        match self.mode {
            RunMode::Unique => {
                bus.set(&self.target, document.as_bytes())?;
                debug!(target_key = %self.target, markers = batch.len(), "stored detections");
            }
            RunMode::Stream => {
                let receivers = bus.publish(&self.target, document.as_bytes())?;
                debug!(
                    channel = %self.target,
                    markers = batch.len(),
                    receivers,
                    "published detections"
                );
            }
        }
        Ok(document)
    }
}
