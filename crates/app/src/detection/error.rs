use frame_bus::{BusError, FrameError, SourceError};
use marker_core::{BackendInitError, DetectError, MarkerKind};
use thiserror::Error;

use crate::detection::controller::PipelineState;

/// Everything that can go wrong between the bus and the published batch.
///
/// Fatal errors end the run; the rest are contained to the frame that
/// produced them.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("cannot talk to the bus")]
    Connection(#[source] BusError),
    #[error("camera parameters not found: {key:?} is missing")]
    MissingMetadata { key: String },
    #[error("camera parameter {key:?} is not an unsigned integer: {value:?}")]
    InvalidMetadata { key: String, value: String },
    #[error("could not fetch image data from {key:?}")]
    FrameNotFound { key: String },
    #[error("frame does not match the declared camera parameters")]
    FrameSizeMismatch(#[from] FrameError),
    #[error("failed to initialise the {} backend", .kind.tag())]
    BackendInit {
        kind: MarkerKind,
        #[source]
        source: BackendInitError,
    },
    #[error("{} backend failed on this frame", .kind.tag())]
    BackendDetection {
        kind: MarkerKind,
        #[source]
        source: DetectError,
    },
    #[error("{} backend panicked", .kind.tag())]
    BackendPanicked { kind: MarkerKind },
    #[error("failed to serialize detections")]
    Serialization(#[from] serde_json::Error),
    #[error("bus rejected a command")]
    Bus(#[source] BusError),
    #[error("invalid pipeline transition {from:?} -> {to:?}")]
    InvalidTransition {
        from: PipelineState,
        to: PipelineState,
    },
}

impl PipelineError {
    /// Whether the run must stop. Per-frame errors return `false`.
    pub fn is_fatal(&self) -> bool {
        match self {
            PipelineError::Connection(_)
            | PipelineError::MissingMetadata { .. }
            | PipelineError::InvalidMetadata { .. }
            | PipelineError::FrameNotFound { .. }
            | PipelineError::BackendInit { .. }
            | PipelineError::InvalidTransition { .. } => true,
            PipelineError::Bus(err) => err.is_connection_loss(),
            PipelineError::FrameSizeMismatch(_)
            | PipelineError::BackendDetection { .. }
            | PipelineError::BackendPanicked { .. }
            | PipelineError::Serialization(_) => false,
        }
    }

    /// Label used for the dropped-frames counter.
    pub fn drop_reason(&self) -> &'static str {
        match self {
            PipelineError::FrameSizeMismatch(_) => "size_mismatch",
            PipelineError::BackendDetection { .. } | PipelineError::BackendPanicked { .. } => {
                "backend"
            }
            PipelineError::Serialization(_) => "serialization",
            PipelineError::Bus(_) => "publish",
            _ => "fatal",
        }
    }
}

impl From<BusError> for PipelineError {
    fn from(err: BusError) -> Self {
        if err.is_connection_loss() {
            PipelineError::Connection(err)
        } else {
            PipelineError::Bus(err)
        }
    }
}

impl From<SourceError> for PipelineError {
    fn from(err: SourceError) -> Self {
        match err {
            SourceError::MissingMetadata { key } => PipelineError::MissingMetadata { key },
            SourceError::InvalidMetadata { key, value } => {
                PipelineError::InvalidMetadata { key, value }
            }
            SourceError::NotFound { key } => PipelineError::FrameNotFound { key },
            SourceError::Frame(err) => PipelineError::FrameSizeMismatch(err),
            SourceError::Bus(err) => err.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn startup_errors_are_fatal() {
        assert!(PipelineError::Connection(BusError::Closed).is_fatal());
        assert!(
            PipelineError::MissingMetadata {
                key: "cam:width".into()
            }
            .is_fatal()
        );
        assert!(
            PipelineError::BackendInit {
                kind: MarkerKind::BoardMarker,
                source: BackendInitError::InvalidFrameSize {
                    width: 0,
                    height: 0
                },
            }
            .is_fatal()
        );
    }

    #[test]
    fn frame_errors_are_contained() {
        let mismatch = PipelineError::FrameSizeMismatch(FrameError::NoChannels);
        assert!(!mismatch.is_fatal());
        assert_eq!(mismatch.drop_reason(), "size_mismatch");

        let detect = PipelineError::BackendDetection {
            kind: MarkerKind::FiducialTag,
            source: DetectError::BufferSize {
                expected: 4,
                actual: 3,
            },
        };
        assert!(!detect.is_fatal());
        assert_eq!(detect.to_string(), "CTag backend failed on this frame");
    }

    #[test]
    fn source_errors_map_onto_the_taxonomy() {
        let err: PipelineError = SourceError::NotFound { key: "cam".into() }.into();
        assert!(matches!(err, PipelineError::FrameNotFound { .. }));
        assert!(err.is_fatal());

        let err: PipelineError = SourceError::Bus(BusError::Closed).into();
        assert!(matches!(err, PipelineError::Connection(_)));

        let err: PipelineError = SourceError::Bus(BusError::InvalidValue {
            key: "k".into(),
            reason: "bad".into(),
        })
        .into();
        assert!(matches!(err, PipelineError::Bus(_)));
        assert!(!err.is_fatal());
    }
}
