//! `show`: read back the last stored detection document for a camera key.

use std::io::Write;

use anyhow::{Context, Result, bail};
use clap::Args;
use frame_bus::Bus;

use crate::detection::{
    config::{DEFAULT_KEY, result_key},
    data::DetectionBatch,
};

#[derive(Debug, Args)]
pub struct ShowCliArgs {
    /// Camera key whose `<KEY>:detected-markers` document is printed.
    #[arg(short, long, default_value = DEFAULT_KEY)]
    pub key: String,
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,
    #[arg(long, default_value_t = 6379)]
    pub port: u16,
}

/// Fetch and parse the stored batch, then write one line per marker to `out`.
pub fn show_detections<B: Bus + ?Sized>(
    bus: &mut B,
    key: &str,
    out: &mut impl Write,
) -> Result<DetectionBatch> {
    let target = result_key(key);
    let Some(payload) = bus.get(&target)? else {
        bail!("no detections stored at {target:?}");
    };
    let batch = DetectionBatch::from_json(&payload)
        .with_context(|| format!("malformed detection document at {target:?}"))?;

    writeln!(out, "{target}: {} marker(s)", batch.len())?;
    for marker in &batch.markers {
        let [tl, tr, br, bl] = marker.corners;
        writeln!(
            out,
            "{} #{} dir={} conf={}% center=({:.1}, {:.1}) corners=({:.1}, {:.1}) ({:.1}, {:.1}) ({:.1}, {:.1}) ({:.1}, {:.1})",
            marker.kind.tag(),
            marker.id,
            marker.direction_index,
            marker.confidence_percent,
            marker.center[0],
            marker.center[1],
            tl[0],
            tl[1],
            tr[0],
            tr[1],
            br[0],
            br[1],
            bl[0],
            bl[1],
        )?;
    }
    Ok(batch)
}

#[cfg(test)]
mod tests {
    use frame_bus::MemoryBus;

    use super::*;

    #[test]
    fn prints_one_line_per_marker() {
        let mut bus = MemoryBus::new();
        bus.set(
            "cam:detected-markers",
            br#"{"markers":[{"id":5,"dir":2,"confidence":87,"type":"ARTK","center":[15,15],"corners":[10,10,20,10,20,20,10,20]},{"id":9,"dir":0,"confidence":100,"type":"CTag","center":[1,1],"corners":[0,0,2,0,2,2,0,2]}]}"#,
        )
        .unwrap();

        let mut out = Vec::new();
        let batch = show_detections(&mut bus, "cam", &mut out).unwrap();
        assert_eq!(batch.len(), 2);

        let text = String::from_utf8(out).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "cam:detected-markers: 2 marker(s)");
        assert_eq!(
            lines[1],
            "ARTK #5 dir=2 conf=87% center=(15.0, 15.0) corners=(10.0, 10.0) (20.0, 10.0) (20.0, 20.0) (10.0, 20.0)"
        );
        assert!(lines[2].starts_with("CTag #9 dir=0 conf=100%"));
    }

    #[test]
    fn missing_document_is_an_error() {
        let mut bus = MemoryBus::new();
        let err = show_detections(&mut bus, "cam", &mut Vec::new()).unwrap_err();
        assert!(err.to_string().contains("cam:detected-markers"));
    }

    #[test]
    fn short_corner_lists_are_rejected() {
        let mut bus = MemoryBus::new();
        bus.set(
            "cam:detected-markers",
            br#"{"markers":[{"id":5,"dir":2,"confidence":87,"type":"ARTK","center":[15,15],"corners":[10,10,20,10]}]}"#,
        )
        .unwrap();
        let err = show_detections(&mut bus, "cam", &mut Vec::new()).unwrap_err();
        assert!(format!("{err:#}").contains("expected 8 corner values"));
    }
}
