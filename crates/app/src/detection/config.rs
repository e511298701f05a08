//! Configuration parsing for the detection pipeline.
//!
//! CLI arguments are translated once into an immutable `DetectionConfig`
//! which the controller borrows for the whole run.

use std::{net::SocketAddr, path::PathBuf};

use anyhow::{Result, bail};
use clap::{Args, ValueEnum};
use marker_core::{BackendOptions, EngineConfig, MarkerKind};

/// Default bus key holding the camera frame.
pub const DEFAULT_KEY: &str = "custom:image";

/// Key suffix under which results are stored.
pub const RESULT_SUFFIX: &str = ":detected-markers";

pub fn result_key(key: &str) -> String {
    format!("{key}{RESULT_SUFFIX}")
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
/// How frames are acquired and results delivered.
pub enum RunMode {
    /// Fetch the stored frame once, store the result, exit.
    Unique,
    /// Follow every published frame until shutdown.
    Stream,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
/// Board marker vertex permutation into top-left, top-right, bottom-right,
/// bottom-left order.
pub enum BoardCornerOrder {
    /// Native vertices `[2, 3, 0, 1]`.
    #[default]
    #[value(name = "2301")]
    Rotate2301,
    /// Native vertices `[3, 0, 1, 2]`.
    #[value(name = "3012")]
    Rotate3012,
}

impl BoardCornerOrder {
    pub fn indices(self) -> [usize; 4] {
        match self {
            BoardCornerOrder::Rotate2301 => [2, 3, 0, 1],
            BoardCornerOrder::Rotate3012 => [3, 0, 1, 2],
        }
    }
}

#[derive(Clone, Debug)]
/// Canonical configuration shared by every stage in the pipeline.
pub struct DetectionConfig {
    pub host: String,
    pub port: u16,
    /// Bus key of the camera frame; also the subscription channel.
    pub key: String,
    /// Where results go: stored value in unique mode, channel in stream mode.
    pub output_key: String,
    pub mode: RunMode,
    pub verbose: bool,
    /// Backends in processing order, without duplicates.
    pub backends: Vec<MarkerKind>,
    pub backend_options: BackendOptions,
    pub refine_corners: bool,
    pub board_corner_order: BoardCornerOrder,
    /// Capacity of the stream-mode frame queue.
    pub frame_queue: usize,
    pub telemetry: TelemetryOptions,
}

#[derive(Clone, Debug, Default)]
/// Optional telemetry knobs for tracing and metrics.
pub struct TelemetryOptions {
    /// Log at debug level unless `RUST_LOG` says otherwise.
    pub verbose: bool,
    /// Write a Chrome trace JSON file capturing pipeline spans.
    pub chrome_trace_path: Option<PathBuf>,
    /// Serve Prometheus metrics on this address.
    pub metrics_addr: Option<SocketAddr>,
}

/// CLI arguments accepted by the `detect` subcommand.
#[derive(Debug, Args)]
pub struct DetectCliArgs {
    /// Print per-marker diagnostics and the published document.
    #[arg(short, long, action = clap::ArgAction::SetTrue)]
    pub verbose: bool,
    /// Bus key to fetch frames from (and subscribe to in stream mode).
    #[arg(short, long, default_value = DEFAULT_KEY)]
    pub key: String,
    /// Channel results are published on in stream mode [default: <KEY>:detected-markers].
    #[arg(short, long, value_name = "KEY", requires = "stream")]
    pub output: Option<String>,
    /// Bus server host.
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,
    /// Bus server port.
    #[arg(long, default_value_t = 6379)]
    pub port: u16,
    /// Process every published frame until interrupted.
    #[arg(short, long, action = clap::ArgAction::SetTrue)]
    pub stream: bool,
    /// Camera calibration file used by the board marker backend.
    #[arg(short = 'c', long = "camera-calibration", value_name = "PATH")]
    pub camera_calibration: Option<PathBuf>,
    /// Backends to run: 0 = board markers, 1 = fiducial tags [default: 0,1].
    #[arg(short, long = "backend", value_name = "N", value_delimiter = ',')]
    pub backends: Vec<u8>,
    /// Fixed binarization threshold; automatic when absent.
    #[arg(long, value_name = "0-255")]
    pub threshold: Option<u8>,
    /// Refine reported corners to sub-pixel precision.
    #[arg(long = "refine-corners", action = clap::ArgAction::SetTrue)]
    pub refine_corners: bool,
    /// Board marker vertex order mapped onto top-left, top-right, bottom-right, bottom-left.
    #[arg(long = "board-corner-order", value_enum, default_value_t = BoardCornerOrder::Rotate2301)]
    pub board_corner_order: BoardCornerOrder,
    /// Frames buffered between the bus and the detector in stream mode.
    #[arg(long = "frame-queue", value_name = "N", default_value_t = 2)]
    pub frame_queue: usize,
    /// Emit Chrome trace JSON for post-mortem analysis.
    #[arg(long = "chrome-trace", value_name = "PATH")]
    pub chrome_trace: Option<PathBuf>,
    /// Serve Prometheus metrics on this address.
    #[arg(long = "metrics-addr", value_name = "ADDR")]
    pub metrics_addr: Option<SocketAddr>,
}

impl TryFrom<DetectCliArgs> for DetectionConfig {
    type Error = anyhow::Error;

    fn try_from(args: DetectCliArgs) -> Result<Self> {
        if args.key.is_empty() {
            bail!("--key must not be empty");
        }
        if args.frame_queue == 0 {
            bail!("--frame-queue must be at least 1");
        }

        let mut backends = Vec::new();
        for index in &args.backends {
            let Some(kind) = MarkerKind::from_index(*index) else {
                bail!("unknown backend {index}: use 0 for board markers or 1 for fiducial tags");
            };
            if !backends.contains(&kind) {
                backends.push(kind);
            }
        }
        if backends.is_empty() {
            backends = vec![MarkerKind::BoardMarker, MarkerKind::FiducialTag];
        }

        let mode = if args.stream {
            RunMode::Stream
        } else {
            RunMode::Unique
        };
        let output_key = match (mode, args.output) {
            (RunMode::Stream, Some(output)) if !output.is_empty() => output,
            (RunMode::Stream, Some(_)) => bail!("--output must not be empty"),
            _ => result_key(&args.key),
        };

        let backend_options = BackendOptions {
            engine: EngineConfig {
                threshold: args.threshold,
                ..EngineConfig::default()
            },
            calibration: args.camera_calibration,
        };

        let telemetry = TelemetryOptions {
            verbose: args.verbose,
            chrome_trace_path: args.chrome_trace,
            metrics_addr: args.metrics_addr,
        };

        Ok(Self {
            host: args.host,
            port: args.port,
            key: args.key,
            output_key,
            mode,
            verbose: args.verbose,
            backends,
            backend_options,
            refine_corners: args.refine_corners,
            board_corner_order: args.board_corner_order,
            frame_queue: args.frame_queue,
            telemetry,
        })
    }
}

#[cfg(test)]
impl DetectionConfig {
    /// Defaults for `key` with everything else as the CLI would set it.
    pub fn for_key(key: impl Into<String>) -> Self {
        let key = key.into();
        Self {
            host: "127.0.0.1".to_string(),
            port: 6379,
            output_key: result_key(&key),
            key,
            mode: RunMode::Unique,
            verbose: false,
            backends: vec![MarkerKind::BoardMarker, MarkerKind::FiducialTag],
            backend_options: BackendOptions::default(),
            refine_corners: false,
            board_corner_order: BoardCornerOrder::default(),
            frame_queue: 2,
            telemetry: TelemetryOptions::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    #[derive(Parser)]
    struct Harness {
        #[command(flatten)]
        args: DetectCliArgs,
    }

    fn parse(argv: &[&str]) -> Result<DetectionConfig> {
        let harness = Harness::try_parse_from(std::iter::once("detect").chain(argv.iter().copied()))?;
        DetectionConfig::try_from(harness.args)
    }

    #[test]
    fn defaults_match_the_legacy_programs() {
        let config = parse(&[]).unwrap();
        assert_eq!(config.key, "custom:image");
        assert_eq!(config.output_key, "custom:image:detected-markers");
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 6379);
        assert_eq!(config.mode, RunMode::Unique);
        assert_eq!(
            config.backends,
            [MarkerKind::BoardMarker, MarkerKind::FiducialTag]
        );
        assert_eq!(config.board_corner_order.indices(), [2, 3, 0, 1]);
        assert!(config.backend_options.calibration.is_none());
        assert_eq!(config.frame_queue, 2);
    }

    #[test]
    fn stream_mode_honours_output_key() {
        let config = parse(&["-s", "-k", "cam", "-o", "cam:markers"]).unwrap();
        assert_eq!(config.mode, RunMode::Stream);
        assert_eq!(config.output_key, "cam:markers");

        let config = parse(&["--stream", "--key", "cam"]).unwrap();
        assert_eq!(config.output_key, "cam:detected-markers");
    }

    #[test]
    fn output_key_requires_stream_mode() {
        assert!(parse(&["-o", "elsewhere"]).is_err());
    }

    #[test]
    fn backends_accept_lists_and_repeats() {
        let config = parse(&["-b", "1"]).unwrap();
        assert_eq!(config.backends, [MarkerKind::FiducialTag]);

        let config = parse(&["-b", "1,0", "-b", "1"]).unwrap();
        assert_eq!(
            config.backends,
            [MarkerKind::FiducialTag, MarkerKind::BoardMarker]
        );

        assert!(parse(&["-b", "2"]).is_err());
    }

    #[test]
    fn engine_and_ordering_flags() {
        let config = parse(&[
            "--threshold",
            "160",
            "--board-corner-order",
            "3012",
            "--refine-corners",
            "-c",
            "data/no_distortion.cal",
        ])
        .unwrap();
        assert_eq!(config.backend_options.engine.threshold, Some(160));
        assert_eq!(config.board_corner_order, BoardCornerOrder::Rotate3012);
        assert!(config.refine_corners);
        assert_eq!(
            config.backend_options.calibration,
            Some(PathBuf::from("data/no_distortion.cal"))
        );
    }

    #[test]
    fn zero_frame_queue_is_rejected() {
        assert!(parse(&["-s", "--frame-queue", "0"]).is_err());
    }
}
