use crate::{
    detector::{
        BackendInitError, DetectError, DetectorBackend, FiducialTagDetection, MarkerKind,
        RawDetection,
    },
    engine::{EngineConfig, SquareTracker, TAG_CODE},
};

/// Fiducial tag backend: id and corners only, corners clockwise from the
/// tag's top-left.
pub struct FiducialTagBackend {
    tracker: SquareTracker,
}

impl FiducialTagBackend {
    pub fn new(width: usize, height: usize, config: EngineConfig) -> Result<Self, BackendInitError> {
        Ok(Self {
            tracker: SquareTracker::new(width, height, config)?,
        })
    }
}

impl DetectorBackend for FiducialTagBackend {
    fn kind(&self) -> MarkerKind {
        MarkerKind::FiducialTag
    }

    fn detect(
        &mut self,
        luma: &[u8],
        width: usize,
        height: usize,
    ) -> Result<Vec<RawDetection>, DetectError> {
        let candidates = self.tracker.find(luma, width, height, &TAG_CODE)?;
        Ok(candidates
            .into_iter()
            .map(|candidate| {
                RawDetection::FiducialTag(FiducialTagDetection {
                    id: candidate.id as i32,
                    corners: candidate.corners,
                })
            })
            .collect())
    }
}
