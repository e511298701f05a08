use marker_core::{RawDetection, geometry::midpoint};

use crate::detection::{config::BoardCornerOrder, data::MarkerRecord};

/// Maps backend-native detections onto [`MarkerRecord`].
#[derive(Clone, Copy, Debug, Default)]
pub struct MarkerNormalizer {
    board_order: BoardCornerOrder,
}

impl MarkerNormalizer {
    pub fn new(board_order: BoardCornerOrder) -> Self {
        Self { board_order }
    }

    pub fn normalize(&self, detection: &RawDetection) -> MarkerRecord {
        match detection {
            RawDetection::BoardMarker(marker) => {
                let order = self.board_order.indices();
                MarkerRecord {
                    id: marker.id,
                    direction_index: marker.direction_index,
                    confidence_percent: confidence_percent(marker.confidence),
                    kind: detection.kind(),
                    center: marker.center,
                    corners: order.map(|i| marker.vertices[i]),
                }
            }
            RawDetection::FiducialTag(tag) => MarkerRecord {
                id: tag.id,
                direction_index: 0,
                confidence_percent: 100,
                kind: detection.kind(),
                center: midpoint(tag.corners[0], tag.corners[2]),
                corners: tag.corners,
            },
        }
    }
}

/// `floor(confidence * 100)`, clamped to `0..=100`. NaN maps to 0.
pub fn confidence_percent(confidence: f32) -> u8 {
    let percent = (f64::from(confidence) * 100.0).floor();
    if percent.is_nan() {
        0
    } else {
        percent.clamp(0.0, 100.0) as u8
    }
}
