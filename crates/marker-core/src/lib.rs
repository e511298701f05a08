//! Marker detection primitives.
//!
//! A [`DetectorBackend`] turns a luma plane into backend-native
//! [`RawDetection`]s. Two families ship built in: board markers (graded
//! confidence and orientation) and fiducial tags (id and corners only), both
//! driven by the square engine in [`engine`]. [`CornerRefiner`] optionally
//! tightens reported corners to sub-pixel precision.

pub mod backend;
pub mod board;
pub mod detector;
pub mod engine;
pub mod fiducial;
pub mod geometry;
pub mod refine;

pub use backend::{BackendOptions, build_backend};
pub use board::BoardMarkerBackend;
pub use detector::{
    BackendInitError, BoardMarkerDetection, DetectError, DetectorBackend, FiducialTagDetection,
    MarkerKind, Point, Quad, RawDetection,
};
pub use engine::{BOARD_CODE, EngineConfig, SquareCandidate, SquareCode, SquareTracker, TAG_CODE};
pub use fiducial::FiducialTagBackend;
pub use refine::CornerRefiner;
