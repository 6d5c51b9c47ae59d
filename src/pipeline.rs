//! Decode-to-publish pipeline
//!
//! Wires one GPU context, one buffer pool and one frame queue between a
//! decode thread and the render timer.

use std::sync::Arc;

use crate::error::{PipelineError, Result};
use crate::gpu::GpuContextHandle;
use crate::network::TexturePublisher;
use crate::pool::{BufferPool, PoolStats};
use crate::render::{PlaybackClock, ProcessingStage, RenderLoop, RenderScheduler, TickOutcome};
use crate::settings::RelaySettings;
use crate::telemetry::{CounterSnapshot, FrameStats, PipelineCounters};
use crate::video::{
    DecodeStage, DecodeWorker, DecodedFrameQueue, DxtCodec, FrameAllocator, SampleSource, UploadSynchronizer,
};

/// Snapshot of the whole pipeline for logging
#[derive(Debug, Clone, Default)]
pub struct PipelineStats {
    pub counters: CounterSnapshot,
    pub pool: PoolStats,
    pub ticks: FrameStats,
    pub pending_frames: usize,
}

pub struct Pipeline {
    settings: RelaySettings,
    gpu: GpuContextHandle,
    pool: BufferPool,
    queue: Arc<DecodedFrameQueue>,
    clock: Arc<dyn PlaybackClock>,
    counters: Arc<PipelineCounters>,
    scheduler: RenderScheduler,
    decoder: Option<DecodeWorker>,
}

impl Pipeline {
    /// Build the pipeline and start the publisher under the configured name
    pub fn new(
        settings: RelaySettings,
        gpu: GpuContextHandle,
        stage: Box<dyn ProcessingStage>,
        mut publisher: Box<dyn TexturePublisher>,
        clock: Arc<dyn PlaybackClock>,
    ) -> Result<Self> {
        let mut settings = settings;
        settings.clamp();

        publisher
            .start(&settings.server_name)
            .map_err(PipelineError::PublishFailed)?;

        let pool = BufferPool::new(settings.pool_config());
        let queue = Arc::new(DecodedFrameQueue::new(settings.max_pending_frames));
        let counters = Arc::new(PipelineCounters::new());

        let render_loop = RenderLoop::new(
            gpu.clone(),
            pool.clone(),
            queue.clone(),
            Arc::clone(&clock),
            stage,
            publisher,
            settings.output_size(),
        )
        .with_counters(Arc::clone(&counters));
        let scheduler = RenderScheduler::new(render_loop, settings.tick_rate_hz);

        tracing::info!(
            "Pipeline ready: {}Hz, output {}x{}, publishing as '{}' on {}",
            settings.tick_rate_hz,
            settings.output_width,
            settings.output_height,
            settings.server_name,
            gpu.backend_name()
        );

        Ok(Self {
            settings,
            gpu,
            pool,
            queue,
            clock,
            counters,
            scheduler,
            decoder: None,
        })
    }

    pub fn settings(&self) -> &RelaySettings {
        &self.settings
    }

    pub fn gpu(&self) -> &GpuContextHandle {
        &self.gpu
    }

    pub fn pool(&self) -> &BufferPool {
        &self.pool
    }

    pub fn queue(&self) -> &Arc<DecodedFrameQueue> {
        &self.queue
    }

    /// The per-sample path, for driving decode without a worker thread
    pub fn decode_stage(&self) -> DecodeStage {
        DecodeStage::new(
            FrameAllocator::new(self.pool.clone()),
            UploadSynchronizer::new(self.gpu.clone()),
            Arc::clone(&self.queue),
            Arc::clone(&self.counters),
        )
    }

    /// Start decoding `source` and ticking the render timer
    ///
    /// A worker already running is replaced.
    pub fn play(&mut self, source: Box<dyn SampleSource>, codec: Box<dyn DxtCodec>) -> std::io::Result<()> {
        self.decoder = None;
        self.queue.clear();
        self.clock.reset();

        self.decoder = Some(DecodeWorker::spawn(self.decode_stage(), source, codec)?);
        self.clock.start();
        self.scheduler.start()
    }

    /// Stop the timer, then the decode thread; idempotent
    pub fn stop(&mut self) {
        self.scheduler.stop();
        self.clock.stop();
        self.decoder = None;
    }

    /// Seek to zero: reset the clock and restart decoding from the first sample
    pub fn rewind(&self) {
        self.clock.reset();
        match &self.decoder {
            Some(decoder) => decoder.restart(),
            None => self.queue.clear(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.scheduler.is_running()
    }

    /// Run one render tick on the calling thread
    pub fn tick_now(&self) -> Result<TickOutcome> {
        self.scheduler.tick_now()
    }

    /// The error that stopped decoding or rendering, if any
    pub fn take_fatal_error(&self) -> Option<PipelineError> {
        self.scheduler
            .take_fatal_error()
            .or_else(|| self.decoder.as_ref().and_then(DecodeWorker::take_fatal_error))
    }

    pub fn stats(&self) -> PipelineStats {
        PipelineStats {
            counters: self.counters.snapshot(),
            pool: self.pool.stats(),
            ticks: self.scheduler.with_loop(|l| l.frame_stats()),
            pending_frames: self.queue.len(),
        }
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.stop();
        self.scheduler.with_loop(|l| l.publisher_mut().stop());
    }
}
