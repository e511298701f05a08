//! Pipeline state machine wiring the bus, the detectors and the result sink.
//!
//! ```text
//! Idle -> Connecting -> Ready -> { Detecting -> Publishing -> Ready }* -> Closed
//!              \-> Closed(Failed)
//! ```
//!
//! Unique mode runs exactly one cycle on the stored frame. Stream mode drains
//! the subscription queue one frame at a time, so results for a frame are
//! always published before the next frame is looked at.

use std::{
    panic::{self, AssertUnwindSafe},
    sync::atomic::{AtomicBool, Ordering},
    thread,
    time::{Duration, Instant},
};

use frame_bus::{Bus, BusError, FrameEvent, FrameSource, LumaBuffer, RawFrame, to_luma};
use marker_core::{BackendInitError, CornerRefiner, DetectorBackend, MarkerKind, RawDetection};
use tracing::{debug, info, info_span, warn};

use crate::detection::{
    config::{DetectionConfig, RunMode},
    data::DetectionBatch,
    error::PipelineError,
    normalize::MarkerNormalizer,
    sink::ResultSink,
};

/// How long the stream loop waits for a frame before re-checking shutdown.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Connecting,
    Ready,
    Detecting,
    Publishing,
    Closed(Closure),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Closure {
    /// Unique run finished or stream shut down on request.
    Completed,
    Failed,
}

impl PipelineState {
    fn allows(self, to: PipelineState) -> bool {
        use PipelineState::*;
        matches!(
            (self, to),
            (Idle, Connecting)
                | (Connecting, Ready)
                | (Connecting, Closed(Closure::Failed))
                | (Ready, Detecting)
                | (Ready, Closed(_))
                | (Detecting, Publishing)
                | (Detecting, Ready)
                | (Detecting, Closed(Closure::Failed))
                | (Publishing, Ready)
                | (Publishing, Closed(Closure::Failed))
        )
    }
}

/// Everything bound to one run: the frame source (and its bus connection),
/// the backends sized to the frame, and where results go.
struct PipelineContext<B: Bus> {
    source: FrameSource<B>,
    backends: Vec<Box<dyn DetectorBackend>>,
    sink: ResultSink,
}

pub struct PipelineController<'a, B: Bus> {
    config: &'a DetectionConfig,
    state: PipelineState,
    normalizer: MarkerNormalizer,
    refiner: Option<CornerRefiner>,
    context: Option<PipelineContext<B>>,
    frames_processed: u64,
}

impl<'a, B: Bus> PipelineController<'a, B> {
    pub fn new(config: &'a DetectionConfig) -> Self {
        Self {
            config,
            state: PipelineState::Idle,
            normalizer: MarkerNormalizer::new(config.board_corner_order),
            refiner: config.refine_corners.then(CornerRefiner::default),
            context: None,
            frames_processed: 0,
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn frames_processed(&self) -> u64 {
        self.frames_processed
    }

    /// Open the bus, read the camera parameters and build every configured
    /// backend for the declared frame size.
    pub fn connect<C, F>(&mut self, connector: C, mut factory: F) -> Result<(), PipelineError>
    where
        C: FnOnce() -> Result<B, BusError>,
        F: FnMut(MarkerKind, usize, usize) -> Result<Box<dyn DetectorBackend>, BackendInitError>,
    {
        self.transition(PipelineState::Connecting)?;
        match self.open(connector, &mut factory) {
            Ok(context) => {
                self.context = Some(context);
                self.transition(PipelineState::Ready)
            }
            Err(err) => {
                self.transition(PipelineState::Closed(Closure::Failed))?;
                Err(err)
            }
        }
    }

    fn open<C, F>(&self, connector: C, factory: &mut F) -> Result<PipelineContext<B>, PipelineError>
    where
        C: FnOnce() -> Result<B, BusError>,
        F: FnMut(MarkerKind, usize, usize) -> Result<Box<dyn DetectorBackend>, BackendInitError>,
    {
        let bus = connector().map_err(PipelineError::Connection)?;
        let source = FrameSource::open(bus, self.config.key.clone())?;
        let meta = source.metadata();
        let (width, height) = (meta.width as usize, meta.height as usize);

        let backends = self
            .config
            .backends
            .iter()
            .map(|&kind| {
                factory(kind, width, height)
                    .map_err(|source| PipelineError::BackendInit { kind, source })
            })
            .collect::<Result<Vec<_>, _>>()?;

        info!(
            "camera {}: {}x{} with {} channel(s), backends: {}",
            self.config.key,
            meta.width,
            meta.height,
            meta.channels,
            self.config
                .backends
                .iter()
                .map(|kind| kind.tag())
                .collect::<Vec<_>>()
                .join(",")
        );

        Ok(PipelineContext {
            source,
            backends,
            sink: ResultSink::new(self.config.mode, self.config.output_key.clone()),
        })
    }

    /// Process the frame currently stored at the key, store the result and close.
    pub fn run_unique(&mut self) -> Result<DetectionBatch, PipelineError> {
        let span = info_span!("frame", frame = self.frames_processed + 1, mode = "unique");
        let _guard = span.enter();

        self.transition(PipelineState::Detecting)?;
        let outcome = self.fetch_stored_frame().and_then(|frame| self.cycle(&frame));
        match outcome {
            Ok(batch) => {
                self.transition(PipelineState::Ready)?;
                self.transition(PipelineState::Closed(Closure::Completed))?;
                Ok(batch)
            }
            Err(err) => {
                self.record_drop(&err);
                self.transition(PipelineState::Closed(Closure::Failed))?;
                Err(err)
            }
        }
    }

    /// Follow published frames until `shutdown` is raised or the bus goes away.
    /// Returns the number of frames whose results were published.
    pub fn run_stream(&mut self, shutdown: &AtomicBool) -> Result<u64, PipelineError> {
        if self.state != PipelineState::Ready {
            return Err(PipelineError::InvalidTransition {
                from: self.state,
                to: PipelineState::Detecting,
            });
        }
        let from = self.state;
        let Some(context) = self.context.as_mut() else {
            return Err(PipelineError::InvalidTransition {
                from,
                to: PipelineState::Detecting,
            });
        };

        let subscription = match context.source.subscribe(self.config.frame_queue) {
            Ok(subscription) => subscription,
            Err(err) => {
                self.transition(PipelineState::Closed(Closure::Failed))?;
                return Err(err.into());
            }
        };
        info!(
            "listening for frames on {}, publishing on {}",
            self.config.key, self.config.output_key
        );

        let mut outcome = Ok(());
        while !shutdown.load(Ordering::SeqCst) {
            match subscription.next_frame(POLL_INTERVAL) {
                Ok(FrameEvent::Frame(frame)) => {
                    metrics::gauge!("markers_frame_queue_depth").set(subscription.pending() as f64);
                    if let Err(err) = self.process(frame) {
                        outcome = Err(err);
                        break;
                    }
                }
                Ok(FrameEvent::Malformed(err)) => {
                    let err = PipelineError::FrameSizeMismatch(err);
                    warn!("dropping frame: {err:?}");
                    self.record_drop(&err);
                }
                Ok(FrameEvent::Idle) => {}
                Err(err) => {
                    self.transition(PipelineState::Closed(Closure::Failed))?;
                    outcome = Err(PipelineError::Connection(err));
                    break;
                }
            }
        }

        subscription.unsubscribe();
        outcome?;
        self.transition(PipelineState::Closed(Closure::Completed))?;
        info!("stream stopped after {} frame(s)", self.frames_processed);
        Ok(self.frames_processed)
    }

    /// One stream-mode cycle. Per-frame failures are logged and swallowed.
    fn process(&mut self, frame: RawFrame) -> Result<(), PipelineError> {
        let span = info_span!(
            "frame",
            frame = self.frames_processed + 1,
            mode = "stream",
            timestamp = frame.timestamp_ms
        );
        let _guard = span.enter();

        self.transition(PipelineState::Detecting)?;
        match self.cycle(&frame) {
            Ok(_) => self.transition(PipelineState::Ready),
            Err(err) if err.is_fatal() => {
                self.record_drop(&err);
                self.transition(PipelineState::Closed(Closure::Failed))?;
                Err(err)
            }
            Err(err) => {
                warn!("dropping frame: {err:?}");
                self.record_drop(&err);
                self.transition(PipelineState::Ready)
            }
        }
    }

    fn fetch_stored_frame(&mut self) -> Result<RawFrame, PipelineError> {
        let from = self.state;
        let context = self.context.as_mut().ok_or(PipelineError::InvalidTransition {
            from,
            to: PipelineState::Detecting,
        })?;
        Ok(context.source.fetch_once()?)
    }

    /// Detecting then Publishing for one frame. Leaves the state in whichever
    /// phase failed so the caller can decide where to go next.
    fn cycle(&mut self, frame: &RawFrame) -> Result<DetectionBatch, PipelineError> {
        let from = self.state;
        let Some(context) = self.context.as_mut() else {
            return Err(PipelineError::InvalidTransition {
                from,
                to: PipelineState::Detecting,
            });
        };

        let started = Instant::now();
        let luma = to_luma(frame)?;
        record_stage("convert", started);

        let started = Instant::now();
        let mut detections = detect_all(&mut context.backends, &luma)?;
        record_stage("detect", started);

        let started = Instant::now();
        if let Some(refiner) = &self.refiner {
            for detection in &mut detections {
                let refined =
                    refiner.refine(luma.as_slice(), luma.width(), luma.height(), *detection.corners());
                *detection.corners_mut() = refined;
            }
        }
        let batch = DetectionBatch {
            markers: detections
                .iter()
                .map(|detection| self.normalizer.normalize(detection))
                .collect(),
        };
        record_stage("normalize", started);

        for marker in &batch.markers {
            metrics::counter!("markers_detected_total", "kind" => marker.kind.tag()).increment(1);
            if self.config.verbose {
                info!(
                    "{} marker {} at ({:.1}, {:.1}), direction {}, confidence {}%",
                    marker.kind.tag(),
                    marker.id,
                    marker.center[0],
                    marker.center[1],
                    marker.direction_index,
                    marker.confidence_percent
                );
            }
        }
        debug!("found {} marker(s)", batch.len());

        self.transition(PipelineState::Publishing)?;
        let started = Instant::now();
        let from = self.state;
        let Some(context) = self.context.as_mut() else {
            return Err(PipelineError::InvalidTransition {
                from,
                to: PipelineState::Ready,
            });
        };
        let document = context.sink.publish(context.source.bus_mut(), &batch)?;
        record_stage("publish", started);
        if self.config.verbose {
            info!("{document}");
        }

        self.frames_processed += 1;
        metrics::counter!("markers_frames_processed_total").increment(1);
        Ok(batch)
    }

    fn transition(&mut self, to: PipelineState) -> Result<(), PipelineError> {
        if !self.state.allows(to) {
            return Err(PipelineError::InvalidTransition {
                from: self.state,
                to,
            });
        }
        debug!("pipeline {:?} -> {:?}", self.state, to);
        self.state = to;
        Ok(())
    }

    fn record_drop(&self, err: &PipelineError) {
        let mode = match self.config.mode {
            RunMode::Unique => "unique",
            RunMode::Stream => "stream",
        };
        metrics::counter!(
            "markers_frames_dropped_total",
            "reason" => err.drop_reason(),
            "mode" => mode
        )
        .increment(1);
    }
}

/// Run every backend on the same luma plane. Several backends run on scoped
/// threads and are all joined before their detections are concatenated in
/// configuration order. A panicking backend fails the frame, not the run.
fn detect_all(
    backends: &mut [Box<dyn DetectorBackend>],
    luma: &LumaBuffer,
) -> Result<Vec<RawDetection>, PipelineError> {
    let plane = luma.as_slice();
    let (width, height) = (luma.width(), luma.height());

    let outcomes: Vec<(MarkerKind, thread::Result<_>)> = if backends.len() == 1 {
        let backend = &mut backends[0];
        let kind = backend.kind();
        let outcome =
            panic::catch_unwind(AssertUnwindSafe(|| backend.detect(plane, width, height)));
        vec![(kind, outcome)]
    } else {
        let dispatch = tracing::dispatcher::get_default(|current| current.clone());
        thread::scope(|scope| {
            let handles: Vec<_> = backends
                .iter_mut()
                .map(|backend| {
                    let kind = backend.kind();
                    let dispatch = dispatch.clone();
                    let handle = scope.spawn(move || {
                        tracing::dispatcher::with_default(&dispatch, || {
                            backend.detect(plane, width, height)
                        })
                    });
                    (kind, handle)
                })
                .collect();
            handles
                .into_iter()
                .map(|(kind, handle)| (kind, handle.join()))
                .collect()
        })
    };

    let mut detections = Vec::new();
    for (kind, outcome) in outcomes {
        match outcome {
            Ok(Ok(found)) => {
                debug!("{} backend: {} detection(s)", kind.tag(), found.len());
                detections.extend(found);
            }
            Ok(Err(source)) => return Err(PipelineError::BackendDetection { kind, source }),
            Err(_) => return Err(PipelineError::BackendPanicked { kind }),
        }
    }
    Ok(detections)
}

fn record_stage(stage: &'static str, started: Instant) {
    metrics::histogram!("markers_stage_latency_seconds", "stage" => stage)
        .record(started.elapsed().as_secs_f64());
}
