//! Immersive Hap Relay - headless entry point
//!
//! Plays a generated Hap test pattern through the pipeline and publishes it
//! to the log.
//!
//! Usage: `immersive-hap-relay [settings.xml] [seconds]`

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context};
use immersive_hap_relay::gpu::{GpuContextHandle, HostBackend, WgpuBackend};
use immersive_hap_relay::network::LogPublisher;
use immersive_hap_relay::render::{MonotonicClock, PassthroughStage};
use immersive_hap_relay::settings::RelaySettings;
use immersive_hap_relay::telemetry::{init_logging, LogConfig};
use immersive_hap_relay::video::{HapCodec, TestPatternSource};
use immersive_hap_relay::Pipeline;

const PATTERN_WIDTH: u32 = 1920;
const PATTERN_HEIGHT: u32 = 1080;
const PATTERN_FPS: f64 = 30.0;

fn main() -> anyhow::Result<()> {
    let _log_guard = init_logging(&LogConfig::default()).map_err(|e| anyhow!("failed to initialize logging: {e}"))?;

    let mut args = std::env::args().skip(1);
    let settings = match args.next() {
        Some(path) => {
            let path = PathBuf::from(path);
            RelaySettings::load_from_file(&path).with_context(|| format!("loading {}", path.display()))?
        }
        None => RelaySettings::load_or_default(),
    };
    let run_for = match args.next() {
        Some(secs) => Duration::try_from_secs_f64(secs.parse().context("seconds must be a number")?)
            .context("seconds must be a positive number")?,
        None => Duration::from_secs(5),
    };

    let gpu = match WgpuBackend::new_headless() {
        Ok(backend) => GpuContextHandle::new(backend),
        Err(e) => {
            tracing::warn!("No BC-capable GPU ({}), using host textures", e);
            GpuContextHandle::new(HostBackend::new())
        }
    };

    let flipped = settings.flipped;
    let mut pipeline = Pipeline::new(
        settings,
        gpu,
        Box::new(PassthroughStage::new(flipped)),
        Box::new(LogPublisher::new()),
        Arc::new(MonotonicClock::new()),
    )?;

    let source = TestPatternSource::new(PATTERN_WIDTH, PATTERN_HEIGHT, PATTERN_FPS);
    pipeline.play(Box::new(source), Box::new(HapCodec::new()))?;

    // Run half, rewind, run the rest
    std::thread::sleep(run_for / 2);
    tracing::info!("Rewinding");
    pipeline.rewind();
    std::thread::sleep(run_for - run_for / 2);

    pipeline.stop();
    let stats = pipeline.stats();
    tracing::info!(
        "Published {} of {} ticks ({} without frame), decoded {}, dropped {}",
        stats.counters.frames_published,
        stats.counters.ticks,
        stats.counters.ticks_without_frame,
        stats.counters.samples_decoded,
        stats.counters.samples_dropped
    );
    tracing::info!(
        "Pool: {} buffers ({:.1} MB), {} allocations, {} reuses; tick p95 {:.2}ms",
        stats.pool.buffers,
        stats.pool.total_mb(),
        stats.pool.allocations,
        stats.pool.reuses,
        stats.ticks.p95_ms
    );

    match pipeline.take_fatal_error() {
        Some(e) => Err(e.into()),
        None => Ok(()),
    }
}
