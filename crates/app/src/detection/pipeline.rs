//! Process entry for `detect`: telemetry, shutdown handling and one
//! controller run over a Redis connection.

use std::sync::{
    Arc, OnceLock,
    atomic::{AtomicBool, Ordering},
};

use anyhow::Result;
use frame_bus::RedisBus;
use marker_core::build_backend;
use tracing::{debug, info, warn};

use crate::detection::{
    config::{DetectionConfig, RunMode},
    controller::PipelineController,
    telemetry,
};

/// Run the configured mode to completion. Errors are fatal and end the process.
pub fn run(config: &DetectionConfig) -> Result<()> {
    let _telemetry_guard = telemetry::enter_runtime(&config.telemetry);
    telemetry::init_metrics_recorder(&config.telemetry)?;

    let pipeline_span = tracing::info_span!(
        "markers.pipeline",
        key = %config.key,
        output = %config.output_key,
        mode = ?config.mode,
        bus = %format_args!("{}:{}", config.host, config.port),
        refine = config.refine_corners
    );
    let _pipeline_span_guard = pipeline_span.enter();

    let mut controller = PipelineController::new(config);
    controller.connect(
        || RedisBus::connect(&config.host, config.port),
        |kind, width, height| build_backend(kind, width, height, &config.backend_options),
    )?;

    match config.mode {
        RunMode::Unique => {
            let batch = controller.run_unique()?;
            if batch.is_empty() {
                info!("no markers found; stored an empty document at {}", config.output_key);
            } else {
                info!("stored {} marker(s) at {}", batch.len(), config.output_key);
            }
        }
        RunMode::Stream => {
            let shutdown = shutdown_flag();
            controller.run_stream(&shutdown)?;
        }
    }
    debug!(
        "pipeline {:?} after {} frame(s)",
        controller.state(),
        controller.frames_processed()
    );
    Ok(())
}

static SHUTDOWN: OnceLock<Arc<AtomicBool>> = OnceLock::new();

/// Flag raised by Ctrl+C, with the handler installed on first use.
///
/// Only the stream loop asks for it; elsewhere SIGINT keeps its default
/// behaviour.
fn shutdown_flag() -> Arc<AtomicBool> {
    SHUTDOWN
        .get_or_init(|| {
            let shutdown = Arc::new(AtomicBool::new(false));
            let handler_shutdown = shutdown.clone();
            if let Err(err) = ctrlc::set_handler(move || {
                handler_shutdown.store(true, Ordering::SeqCst);
            }) {
                warn!("Failed to install Ctrl+C handler: {err}");
            }
            shutdown
        })
        .clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sigint_handler_is_only_installed_for_streaming() {
        let mut config = DetectionConfig::for_key("cam");
        config.port = 1;
        assert!(run(&config).is_err());
        assert!(SHUTDOWN.get().is_none());

        let first = shutdown_flag();
        let second = shutdown_flag();
        assert!(Arc::ptr_eq(&first, &second));
        assert!(!first.load(Ordering::SeqCst));
    }
}
