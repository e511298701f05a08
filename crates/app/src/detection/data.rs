use marker_core::{MarkerKind, Point, Quad};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Backend-agnostic marker, corners in top-left, top-right, bottom-right,
/// bottom-left order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(into = "WireMarker", try_from = "WireMarker")]
pub struct MarkerRecord {
    pub id: i32,
    pub direction_index: i32,
    /// Always within `0..=100`.
    pub confidence_percent: u8,
    pub kind: MarkerKind,
    pub center: Point,
    pub corners: Quad,
}

/// Markers found in one frame, in backend order then discovery order.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DetectionBatch {
    pub markers: Vec<MarkerRecord>,
}

impl DetectionBatch {
    pub fn len(&self) -> usize {
        self.markers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.markers.is_empty()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_json(payload: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(payload)
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum RecordError {
    #[error("unknown marker type {0:?}")]
    UnknownType(String),
    #[error("expected 8 corner values, got {0}")]
    Corners(usize),
    #[error("expected 2 center values, got {0}")]
    Center(usize),
    #[error("confidence {0} is outside 0-100")]
    Confidence(u32),
}

/// Wire shape of one marker; field order is part of the contract.
#[derive(Serialize, Deserialize)]
struct WireMarker {
    id: i32,
    dir: i32,
    confidence: u32,
    #[serde(rename = "type")]
    kind: String,
    center: Vec<f32>,
    corners: Vec<f32>,
}

impl From<MarkerRecord> for WireMarker {
    fn from(record: MarkerRecord) -> Self {
        Self {
            id: record.id,
            dir: record.direction_index,
            confidence: u32::from(record.confidence_percent),
            kind: record.kind.tag().to_string(),
            center: record.center.to_vec(),
            corners: record.corners.iter().flatten().copied().collect(),
        }
    }
}

impl TryFrom<WireMarker> for MarkerRecord {
    type Error = RecordError;

    fn try_from(wire: WireMarker) -> Result<Self, Self::Error> {
        let kind = MarkerKind::from_tag(&wire.kind).ok_or(RecordError::UnknownType(wire.kind))?;
        let corners: [f32; 8] = wire
            .corners
            .as_slice()
            .try_into()
            .map_err(|_| RecordError::Corners(wire.corners.len()))?;
        let center: Point = wire
            .center
            .as_slice()
            .try_into()
            .map_err(|_| RecordError::Center(wire.center.len()))?;
        let confidence_percent = u8::try_from(wire.confidence)
            .ok()
            .filter(|percent| *percent <= 100)
            .ok_or(RecordError::Confidence(wire.confidence))?;

        Ok(Self {
            id: wire.id,
            direction_index: wire.dir,
            confidence_percent,
            kind,
            center,
            corners: [
                [corners[0], corners[1]],
                [corners[2], corners[3]],
                [corners[4], corners[5]],
                [corners[6], corners[7]],
            ],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn board() -> MarkerRecord {
        MarkerRecord {
            id: 7,
            direction_index: 2,
            confidence_percent: 87,
            kind: MarkerKind::BoardMarker,
            center: [15.0, 15.0],
            corners: [[10.0, 10.0], [20.0, 10.0], [20.0, 20.0], [10.0, 20.0]],
        }
    }

    #[test]
    fn wire_layout_is_stable() {
        let batch = DetectionBatch {
            markers: vec![board()],
        };
        assert_eq!(
            batch.to_json().unwrap(),
            r#"{"markers":[{"id":7,"dir":2,"confidence":87,"type":"ARTK","center":[15.0,15.0],"corners":[10.0,10.0,20.0,10.0,20.0,20.0,10.0,20.0]}]}"#
        );
    }

    #[test]
    fn empty_batch_still_has_markers_array() {
        assert_eq!(
            DetectionBatch::default().to_json().unwrap(),
            r#"{"markers":[]}"#
        );
    }

    #[test]
    fn documents_parse_back_into_records() {
        let doc = br#"{"markers":[{"id":3,"dir":0,"confidence":100,"type":"CTag","center":[1.5,2.5],"corners":[0,0,3,0,3,5,0,5]}]}"#;
        let batch = DetectionBatch::from_json(doc).unwrap();
        assert_eq!(batch.len(), 1);
        let marker = &batch.markers[0];
        assert_eq!(marker.kind, MarkerKind::FiducialTag);
        assert_eq!(marker.corners[2], [3.0, 5.0]);
        assert_eq!(marker.center, [1.5, 2.5]);
    }

    #[test]
    fn malformed_records_are_rejected() {
        let short = br#"{"markers":[{"id":3,"dir":0,"confidence":100,"type":"CTag","center":[1,2],"corners":[0,0,3,0,3,5]}]}"#;
        let err = DetectionBatch::from_json(short).unwrap_err();
        assert!(err.to_string().contains("expected 8 corner values, got 6"));

        let unknown = br#"{"markers":[{"id":3,"dir":0,"confidence":100,"type":"QR","center":[1,2],"corners":[0,0,3,0,3,5,0,5]}]}"#;
        assert!(DetectionBatch::from_json(unknown).is_err());

        let over = br#"{"markers":[{"id":3,"dir":0,"confidence":101,"type":"ARTK","center":[1,2],"corners":[0,0,3,0,3,5,0,5]}]}"#;
        assert!(DetectionBatch::from_json(over).is_err());
    }
}
