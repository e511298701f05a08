use std::path::PathBuf;

use tracing::info;

use crate::{
    board::BoardMarkerBackend,
    detector::{BackendInitError, DetectorBackend, MarkerKind},
    engine::EngineConfig,
    fiducial::FiducialTagBackend,
};

/// Settings shared by every backend built at startup.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BackendOptions {
    pub engine: EngineConfig,
    /// Camera calibration file for board markers.
    pub calibration: Option<PathBuf>,
}

/// Construct the backend for `kind`, sized to `width x height` frames.
pub fn build_backend(
    kind: MarkerKind,
    width: usize,
    height: usize,
    options: &BackendOptions,
) -> Result<Box<dyn DetectorBackend>, BackendInitError> {
    info!("initialising {} backend for {width}x{height} frames", kind.tag());
    Ok(match kind {
        MarkerKind::BoardMarker => Box::new(BoardMarkerBackend::new(
            width,
            height,
            options.engine,
            options.calibration.as_deref(),
        )?),
        MarkerKind::FiducialTag => {
            Box::new(FiducialTagBackend::new(width, height, options.engine)?)
        }
    })
}
