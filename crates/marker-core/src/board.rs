use std::path::Path;

use tracing::debug;

use crate::{
    detector::{
        BackendInitError, BoardMarkerDetection, DetectError, DetectorBackend, MarkerKind, Quad,
        RawDetection,
    },
    engine::{BOARD_CODE, EngineConfig, SquareTracker},
    geometry::diagonal_intersection,
};

/// Board marker backend: graded confidence, reported orientation, vertices
/// starting at the marker's bottom-right corner.
pub struct BoardMarkerBackend {
    tracker: SquareTracker,
}

impl BoardMarkerBackend {
    /// Build the tracker for `width x height` frames. A configured calibration
    /// file must exist; its contents are not interpreted.
    pub fn new(
        width: usize,
        height: usize,
        config: EngineConfig,
        calibration: Option<&Path>,
    ) -> Result<Self, BackendInitError> {
        if let Some(path) = calibration {
            if !path.is_file() {
                return Err(BackendInitError::MissingCalibration {
                    path: path.to_path_buf(),
                });
            }
            debug!("board marker calibration: {}", path.display());
        }
        Ok(Self {
            tracker: SquareTracker::new(width, height, config)?,
        })
    }
}

/// Vertex order of this backend: bottom-right, bottom-left, top-left, top-right.
fn native_vertices(corners: &Quad) -> Quad {
    [corners[2], corners[3], corners[0], corners[1]]
}

impl DetectorBackend for BoardMarkerBackend {
    fn kind(&self) -> MarkerKind {
        MarkerKind::BoardMarker
    }

    fn detect(
        &mut self,
        luma: &[u8],
        width: usize,
        height: usize,
    ) -> Result<Vec<RawDetection>, DetectError> {
        let candidates = self.tracker.find(luma, width, height, &BOARD_CODE)?;
        Ok(candidates
            .into_iter()
            .map(|candidate| {
                RawDetection::BoardMarker(BoardMarkerDetection {
                    id: candidate.id as i32,
                    direction_index: candidate.rotation as i32,
                    confidence: candidate.confidence,
                    center: diagonal_intersection(&candidate.corners),
                    vertices: native_vertices(&candidate.corners),
                })
            })
            .collect())
    }
}
