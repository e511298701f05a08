use marker_core::{
    BOARD_CODE, BackendOptions, DetectorBackend, MarkerKind, RawDetection, SquareCode, TAG_CODE,
    build_backend,
};

struct Placement {
    code: SquareCode,
    id: u32,
    origin: (usize, usize),
    cell: usize,
    quarter_turns: usize,
}

/// White canvas with each marker painted axis-aligned, rotated clockwise by
/// `quarter_turns`.
fn render(width: usize, height: usize, placements: &[Placement]) -> Vec<u8> {
    let mut luma = vec![255u8; width * height];
    for placement in placements {
        let g = placement.code.grid;
        let mut cells = placement.code.encode(placement.id).unwrap();
        for _ in 0..placement.quarter_turns {
            let mut turned = vec![false; g * g];
            for r in 0..g {
                for c in 0..g {
                    turned[r * g + c] = cells[(g - 1 - c) * g + r];
                }
            }
            cells = turned;
        }
        let (ox, oy) = placement.origin;
        for r in 0..g {
            for c in 0..g {
                let value = if cells[r * g + c] { 255 } else { 0 };
                for y in 0..placement.cell {
                    for x in 0..placement.cell {
                        luma[(oy + r * placement.cell + y) * width + ox + c * placement.cell + x] =
                            value;
                    }
                }
            }
        }
    }
    luma
}

fn board(id: u32, origin: (usize, usize), quarter_turns: usize) -> Placement {
    Placement {
        code: BOARD_CODE,
        id,
        origin,
        cell: 5,
        quarter_turns,
    }
}

fn tag(id: u32, origin: (usize, usize), cell: usize) -> Placement {
    Placement {
        code: TAG_CODE,
        id,
        origin,
        cell,
        quarter_turns: 0,
    }
}

fn backend(kind: MarkerKind, width: usize, height: usize) -> Box<dyn DetectorBackend> {
    build_backend(kind, width, height, &BackendOptions::default()).unwrap()
}

#[test]
fn board_marker_reports_id_orientation_and_vertices() {
    let luma = render(80, 80, &[board(37, (20, 20), 0)]);
    let mut detector = backend(MarkerKind::BoardMarker, 80, 80);
    let detections = detector.detect(&luma, 80, 80).unwrap();
    assert_eq!(detections.len(), 1);

    let RawDetection::BoardMarker(marker) = &detections[0] else {
        panic!("expected a board marker, got {:?}", detections[0]);
    };
    assert_eq!(marker.id, 37);
    assert_eq!(marker.direction_index, 0);
    assert!(marker.confidence > 0.9 && marker.confidence <= 1.0);
    assert_eq!(marker.center, [34.5, 34.5]);
    assert_eq!(
        marker.vertices,
        [[49.5, 49.5], [19.5, 49.5], [19.5, 19.5], [49.5, 19.5]]
    );
}

#[test]
fn board_marker_orientation_follows_rotation() {
    let mut detector = backend(MarkerKind::BoardMarker, 80, 80);
    for turns in 0..4 {
        let luma = render(80, 80, &[board(5, (20, 20), turns)]);
        let detections = detector.detect(&luma, 80, 80).unwrap();
        assert_eq!(detections.len(), 1, "quarter turns {turns}");
        let RawDetection::BoardMarker(marker) = &detections[0] else {
            panic!("expected a board marker");
        };
        assert_eq!(marker.id, 5);
        assert_eq!(marker.direction_index, turns as i32);
    }
}

#[test]
fn fiducial_tag_reports_corners_from_top_left() {
    let luma = render(80, 80, &[tag(613, (20, 20), 5)]);
    let mut detector = backend(MarkerKind::FiducialTag, 80, 80);
    let detections = detector.detect(&luma, 80, 80).unwrap();
    assert_eq!(detections.len(), 1);
    assert_eq!(detections[0].kind(), MarkerKind::FiducialTag);
    assert_eq!(detections[0].id(), 613);
    assert_eq!(
        detections[0].corners(),
        &[[19.5, 19.5], [54.5, 19.5], [54.5, 54.5], [19.5, 54.5]]
    );
}

#[test]
fn families_do_not_cross_detect() {
    let mut boards = backend(MarkerKind::BoardMarker, 80, 80);
    let mut tags = backend(MarkerKind::FiducialTag, 80, 80);

    for id in [0, 1, 37, 63] {
        let luma = render(80, 80, &[board(id, (20, 20), 0)]);
        assert!(tags.detect(&luma, 80, 80).unwrap().is_empty(), "board {id}");
    }
    for id in [0, 1, 613, 1023] {
        let luma = render(80, 80, &[tag(id, (20, 20), 5)]);
        assert!(boards.detect(&luma, 80, 80).unwrap().is_empty(), "tag {id}");
    }
}

#[test]
fn mixed_frame_is_split_by_family() {
    let luma = render(160, 80, &[board(9, (10, 20), 0), tag(300, (90, 15), 6)]);

    let boards = backend(MarkerKind::BoardMarker, 160, 80)
        .detect(&luma, 160, 80)
        .unwrap();
    let tags = backend(MarkerKind::FiducialTag, 160, 80)
        .detect(&luma, 160, 80)
        .unwrap();

    assert_eq!(boards.iter().map(RawDetection::id).collect::<Vec<_>>(), [9]);
    assert_eq!(tags.iter().map(RawDetection::id).collect::<Vec<_>>(), [300]);
    assert_eq!(
        tags[0].corners(),
        &[[89.5, 14.5], [131.5, 14.5], [131.5, 56.5], [89.5, 56.5]]
    );
}

#[test]
fn backend_state_is_reused_across_frames() {
    let mut detector = backend(MarkerKind::FiducialTag, 80, 80);
    let first = render(80, 80, &[tag(1, (20, 20), 5)]);
    let second = render(80, 80, &[tag(2, (10, 12), 5)]);
    assert_eq!(detector.detect(&first, 80, 80).unwrap()[0].id(), 1);
    assert_eq!(detector.detect(&second, 80, 80).unwrap()[0].id(), 2);
    assert!(detector.detect(&vec![255; 80 * 80], 80, 80).unwrap().is_empty());
}
