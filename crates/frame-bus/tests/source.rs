use std::time::Duration;

use frame_bus::{Bus, FrameEvent, FrameSource, MemoryBus, SourceError};

fn camera(width: u32, height: u32, channels: u32) -> MemoryBus {
    let mut bus = MemoryBus::new();
    bus.set("cam:width", width.to_string().as_bytes()).unwrap();
    bus.set("cam:height", height.to_string().as_bytes()).unwrap();
    bus.set("cam:channels", channels.to_string().as_bytes()).unwrap();
    bus
}

#[test]
fn open_reads_side_channel_metadata() {
    let source = FrameSource::open(camera(4, 3, 3), "cam").unwrap();
    let meta = source.metadata();
    assert_eq!((meta.width, meta.height, meta.channels), (4, 3, 3));
}

#[test]
fn missing_metadata_names_the_key() {
    let mut bus = MemoryBus::new();
    bus.set("cam:width", b"4").unwrap();
    let err = FrameSource::open(bus, "cam").err().unwrap();
    match err {
        SourceError::MissingMetadata { key } => assert_eq!(key, "cam:height"),
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn metadata_must_be_numeric() {
    let mut bus = camera(4, 4, 3);
    bus.set("cam:channels", b"three").unwrap();
    assert!(matches!(
        FrameSource::open(bus, "cam"),
        Err(SourceError::InvalidMetadata { .. })
    ));
}

#[test]
fn fetch_once_reports_absent_frame() {
    let mut source = FrameSource::open(camera(2, 2, 1), "cam").unwrap();
    assert!(matches!(source.fetch_once(), Err(SourceError::NotFound { .. })));
}

#[test]
fn fetch_once_validates_payload_size() {
    let mut bus = camera(2, 2, 3);
    bus.set("cam", &[0; 11]).unwrap();
    let mut source = FrameSource::open(bus, "cam").unwrap();
    assert!(matches!(source.fetch_once(), Err(SourceError::Frame(_))));

    source.bus_mut().set("cam", &[9; 12]).unwrap();
    let frame = source.fetch_once().unwrap();
    assert_eq!(frame.data(), &[9; 12]);
}

#[test]
fn subscription_separates_good_and_malformed_frames() {
    let publisher = camera(2, 1, 2);
    let mut source = FrameSource::open(publisher.clone(), "cam").unwrap();
    let subscription = source.subscribe(4).unwrap();

    let mut publisher = publisher;
    publisher.publish("cam", &[1, 2, 3, 4]).unwrap();
    publisher.publish("cam", &[1, 2, 3]).unwrap();

    let timeout = Duration::from_millis(50);
    match subscription.next_frame(timeout).unwrap() {
        FrameEvent::Frame(frame) => assert_eq!(frame.data(), &[1, 2, 3, 4]),
        other => panic!("expected frame, got {other:?}"),
    }
    assert!(matches!(
        subscription.next_frame(timeout).unwrap(),
        FrameEvent::Malformed(_)
    ));
    assert!(matches!(
        subscription.next_frame(timeout).unwrap(),
        FrameEvent::Idle
    ));
    subscription.unsubscribe();
    assert_eq!(publisher.subscriber_count("cam"), 0);
}
