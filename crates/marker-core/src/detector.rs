use std::path::PathBuf;

use thiserror::Error;

/// Image-space point, x then y, in pixel units.
pub type Point = [f32; 2];

/// Four corners of a marker quadrilateral.
pub type Quad = [Point; 4];

/// Detection family, stable across the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MarkerKind {
    BoardMarker,
    FiducialTag,
}

impl MarkerKind {
    /// Short tag used in serialized output.
    pub fn tag(self) -> &'static str {
        match self {
            MarkerKind::BoardMarker => "ARTK",
            MarkerKind::FiducialTag => "CTag",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "ARTK" => Some(MarkerKind::BoardMarker),
            "CTag" => Some(MarkerKind::FiducialTag),
            _ => None,
        }
    }

    /// Numeric backend selector: 0 for board markers, 1 for fiducial tags.
    pub fn from_index(index: u8) -> Option<Self> {
        match index {
            0 => Some(MarkerKind::BoardMarker),
            1 => Some(MarkerKind::FiducialTag),
            _ => None,
        }
    }
}

/// Board marker as reported by its backend.
#[derive(Debug, Clone, PartialEq)]
pub struct BoardMarkerDetection {
    pub id: i32,
    pub direction_index: i32,
    /// Graded confidence in `[0, 1]`.
    pub confidence: f32,
    pub center: Point,
    /// Vertices in the backend's winding order (starting bottom-right).
    pub vertices: Quad,
}

/// Fiducial tag as reported by its backend. No confidence, no orientation.
#[derive(Debug, Clone, PartialEq)]
pub struct FiducialTagDetection {
    pub id: i32,
    /// Corners in the backend's winding order (top-left, clockwise).
    pub corners: Quad,
}

/// Backend-native detection, one variant per family.
#[derive(Debug, Clone, PartialEq)]
pub enum RawDetection {
    BoardMarker(BoardMarkerDetection),
    FiducialTag(FiducialTagDetection),
}

impl RawDetection {
    pub fn kind(&self) -> MarkerKind {
        match self {
            RawDetection::BoardMarker(_) => MarkerKind::BoardMarker,
            RawDetection::FiducialTag(_) => MarkerKind::FiducialTag,
        }
    }

    pub fn id(&self) -> i32 {
        match self {
            RawDetection::BoardMarker(det) => det.id,
            RawDetection::FiducialTag(det) => det.id,
        }
    }

    /// Corners in backend-native order.
    pub fn corners(&self) -> &Quad {
        match self {
            RawDetection::BoardMarker(det) => &det.vertices,
            RawDetection::FiducialTag(det) => &det.corners,
        }
    }

    pub fn corners_mut(&mut self) -> &mut Quad {
        match self {
            RawDetection::BoardMarker(det) => &mut det.vertices,
            RawDetection::FiducialTag(det) => &mut det.corners,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DetectError {
    #[error("backend was initialised for {expected_width}x{expected_height} frames, got {width}x{height}")]
    Dimensions {
        expected_width: usize,
        expected_height: usize,
        width: usize,
        height: usize,
    },
    #[error("luma buffer holds {actual} bytes, {expected} expected")]
    BufferSize { expected: usize, actual: usize },
}

#[derive(Debug, Error)]
pub enum BackendInitError {
    #[error("camera calibration file {} not found", .path.display())]
    MissingCalibration { path: PathBuf },
    #[error("cannot track markers in a {width}x{height} frame")]
    InvalidFrameSize { width: usize, height: usize },
}

/// A marker detection capability.
///
/// Implementations may keep per-process state sized to the frame (label
/// buffers, trackers) and are therefore driven through `&mut self`: one call
/// at a time per instance. Different instances are independent and may run
/// concurrently on the same read-only luma plane.
pub trait DetectorBackend: Send {
    fn kind(&self) -> MarkerKind;

    fn detect(
        &mut self,
        luma: &[u8],
        width: usize,
        height: usize,
    ) -> Result<Vec<RawDetection>, DetectError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_tags_round_trip() {
        for kind in [MarkerKind::BoardMarker, MarkerKind::FiducialTag] {
            assert_eq!(MarkerKind::from_tag(kind.tag()), Some(kind));
        }
        assert_eq!(MarkerKind::from_tag("QR"), None);
    }

    #[test]
    fn backend_indices() {
        assert_eq!(MarkerKind::from_index(0), Some(MarkerKind::BoardMarker));
        assert_eq!(MarkerKind::from_index(1), Some(MarkerKind::FiducialTag));
        assert_eq!(MarkerKind::from_index(2), None);
    }
}
