//! Fixed-rate render tick and publish boundary
//!
//! Each tick selects the frame due at the clock's current time, renders it
//! through the processing stage and publishes the result, all under the GPU
//! context lock. Pool housekeeping runs at the end of every tick, whether or
//! not anything was published.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{select, Sender};

use super::clock::PlaybackClock;
use super::stage::{ProcessingStage, RenderInput};
use crate::error::{PipelineError, Result};
use crate::gpu::GpuContextHandle;
use crate::network::{PublishedTexture, Size, TexturePublisher};
use crate::pool::BufferPool;
use crate::telemetry::{FrameProfiler, FrameStats, PipelineCounters};
use crate::video::FrameSource;

/// Where the render loop is within a tick
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RenderState {
    #[default]
    Idle,
    /// Between ticks
    Ticking,
    Selecting,
    Rendering,
    Publishing,
}

/// Result of one tick
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    Published {
        pts: Duration,
        texture: PublishedTexture,
    },
    /// Nothing published; carries `NoFrameAvailable` or `RenderUnavailable`
    Skipped(PipelineError),
}

/// One render-and-publish pass, driven by [`RenderScheduler`] or by hand
pub struct RenderLoop {
    gpu: GpuContextHandle,
    pool: BufferPool,
    frames: Arc<dyn FrameSource>,
    clock: Arc<dyn PlaybackClock>,
    stage: Box<dyn ProcessingStage>,
    publisher: Box<dyn TexturePublisher>,
    output: Size,
    state: Arc<Mutex<RenderState>>,
    counters: Arc<PipelineCounters>,
    profiler: FrameProfiler,
}

impl RenderLoop {
    pub fn new(
        gpu: GpuContextHandle,
        pool: BufferPool,
        frames: Arc<dyn FrameSource>,
        clock: Arc<dyn PlaybackClock>,
        stage: Box<dyn ProcessingStage>,
        publisher: Box<dyn TexturePublisher>,
        output: Size,
    ) -> Self {
        Self {
            gpu,
            pool,
            frames,
            clock,
            stage,
            publisher,
            output,
            state: Arc::new(Mutex::new(RenderState::Idle)),
            counters: Arc::new(PipelineCounters::new()),
            profiler: FrameProfiler::new(),
        }
    }

    /// Report into shared counters instead of private ones
    pub fn with_counters(mut self, counters: Arc<PipelineCounters>) -> Self {
        self.counters = counters;
        self
    }

    pub fn counters(&self) -> &Arc<PipelineCounters> {
        &self.counters
    }

    pub fn state(&self) -> RenderState {
        *lock_state(&self.state)
    }

    pub fn frame_stats(&self) -> FrameStats {
        self.profiler.stats()
    }

    pub fn publisher_mut(&mut self) -> &mut dyn TexturePublisher {
        self.publisher.as_mut()
    }

    fn set_state(&self, state: RenderState) {
        *lock_state(&self.state) = state;
    }

    /// Run one tick
    ///
    /// Only `ContextLost` comes back as an error; a tick with nothing to show
    /// is `Ok(TickOutcome::Skipped(..))`.
    pub fn tick(&mut self) -> Result<TickOutcome> {
        self.profiler.begin_frame();
        self.counters.tick();

        let outcome = self.render_and_publish();
        self.set_state(RenderState::Ticking);
        let outcome = outcome?;

        match &outcome {
            TickOutcome::Published { .. } => self.counters.frame_published(),
            TickOutcome::Skipped(PipelineError::NoFrameAvailable(_)) => self.counters.tick_without_frame(),
            TickOutcome::Skipped(_) => self.counters.tick_render_unavailable(),
        }

        let report = self.pool.housekeeping();
        if report.freed_buffers > 0 {
            self.counters.buffers_freed(report.freed_buffers);
        }

        Ok(outcome)
    }

    fn render_and_publish(&mut self) -> Result<TickOutcome> {
        self.set_state(RenderState::Selecting);
        let now = self.clock.now();
        let Some(frame) = self.frames.frame_at(now) else {
            return Ok(TickOutcome::Skipped(PipelineError::NoFrameAvailable(now)));
        };
        let Some(primary) = frame.primary() else {
            return Ok(TickOutcome::Skipped(PipelineError::RenderUnavailable));
        };

        self.set_state(RenderState::Rendering);
        let mut gpu = self.gpu.lock()?;

        let stage = &mut self.stage;
        let output = self.output;
        let rendered = primary
            .with_texture(|texture| {
                let input = RenderInput {
                    texture,
                    descriptor: primary.descriptor(),
                    pts: frame.pts(),
                };
                stage.render(&mut gpu, &input, output)
            })
            .flatten();

        let Some(texture) = rendered else {
            return Ok(TickOutcome::Skipped(PipelineError::RenderUnavailable));
        };

        self.set_state(RenderState::Publishing);
        if let Err(e) = self.publisher.publish(&texture) {
            tracing::warn!("{} publish failed: {}", self.publisher.technology_name(), e);
        }
        drop(gpu);

        Ok(TickOutcome::Published {
            pts: frame.pts(),
            texture,
        })
    }
}

fn lock_state(state: &Mutex<RenderState>) -> MutexGuard<'_, RenderState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Drives a [`RenderLoop`] from a fixed-rate timer thread
pub struct RenderScheduler {
    render_loop: Arc<Mutex<RenderLoop>>,
    state: Arc<Mutex<RenderState>>,
    period: Duration,
    fatal: Arc<Mutex<Option<PipelineError>>>,
    timer: Option<(Sender<()>, JoinHandle<()>)>,
}

impl RenderScheduler {
    pub fn new(render_loop: RenderLoop, tick_rate_hz: u32) -> Self {
        let state = Arc::clone(&render_loop.state);
        Self {
            render_loop: Arc::new(Mutex::new(render_loop)),
            state,
            period: Duration::from_secs_f64(1.0 / tick_rate_hz.max(1) as f64),
            fatal: Arc::new(Mutex::new(None)),
            timer: None,
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Start the timer; no-op while it is already running
    pub fn start(&mut self) -> std::io::Result<()> {
        if let Some((_, handle)) = &self.timer {
            if !handle.is_finished() {
                return Ok(());
            }
        }
        // A previous timer died on a fatal error
        self.join_timer();
        // The idle gap since the last run is not a tick interval
        lock_loop(&self.render_loop).profiler.reset();

        let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(0);
        let render_loop = Arc::clone(&self.render_loop);
        let fatal = Arc::clone(&self.fatal);
        let period = self.period;

        let handle = thread::Builder::new().name("hap-render".to_string()).spawn(move || {
            let ticker = crossbeam_channel::tick(period);
            tracing::debug!("RenderScheduler: ticking every {:?}", period);
            loop {
                select! {
                    recv(stop_rx) -> _ => break,
                    recv(ticker) -> _ => {
                        let result = lock_loop(&render_loop).tick();
                        if let Err(e) = result {
                            tracing::error!("RenderScheduler: stopping, {}", e);
                            *fatal.lock().unwrap_or_else(PoisonError::into_inner) = Some(e);
                            break;
                        }
                    }
                }
            }
            tracing::debug!("RenderScheduler thread stopped");
        })?;

        self.timer = Some((stop_tx, handle));
        Ok(())
    }

    /// Stop the timer and wait for an in-flight tick; no-op when stopped
    pub fn stop(&mut self) {
        self.join_timer();
        *lock_state(&self.state) = RenderState::Idle;
    }

    fn join_timer(&mut self) {
        if let Some((stop_tx, handle)) = self.timer.take() {
            drop(stop_tx);
            if let Err(e) = handle.join() {
                tracing::warn!("Failed to join render thread: {:?}", e);
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.timer.as_ref().is_some_and(|(_, handle)| !handle.is_finished())
    }

    pub fn state(&self) -> RenderState {
        *lock_state(&self.state)
    }

    /// Run one tick on the calling thread
    pub fn tick_now(&self) -> Result<TickOutcome> {
        lock_loop(&self.render_loop).tick()
    }

    /// Access the loop between ticks
    pub fn with_loop<R>(&self, f: impl FnOnce(&mut RenderLoop) -> R) -> R {
        f(&mut lock_loop(&self.render_loop))
    }

    /// The error that stopped the timer, if any
    pub fn take_fatal_error(&self) -> Option<PipelineError> {
        self.fatal.lock().unwrap_or_else(PoisonError::into_inner).take()
    }
}

impl Drop for RenderScheduler {
    fn drop(&mut self) {
        self.join_timer();
    }
}

fn lock_loop(render_loop: &Mutex<RenderLoop>) -> MutexGuard<'_, RenderLoop> {
    render_loop.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::HostBackend;
    use crate::network::ChannelPublisher;
    use crate::pool::PoolConfig;
    use crate::render::{ManualClock, PassthroughStage};
    use crate::video::{DecodedFrameQueue, FrameAllocator, HapSample, UploadSynchronizer};

    struct Harness {
        gpu: GpuContextHandle,
        pool: BufferPool,
        queue: Arc<DecodedFrameQueue>,
        clock: Arc<ManualClock>,
        rx: crossbeam_channel::Receiver<PublishedTexture>,
        render_loop: RenderLoop,
    }

    fn harness(pool_config: PoolConfig) -> Harness {
        let gpu = GpuContextHandle::new(HostBackend::new());
        let pool = BufferPool::new(pool_config);
        let queue = Arc::new(DecodedFrameQueue::new(8));
        let clock = Arc::new(ManualClock::new());
        let (mut publisher, rx) = ChannelPublisher::new(16);
        publisher.start("test").unwrap();

        let render_loop = RenderLoop::new(
            gpu.clone(),
            pool.clone(),
            queue.clone(),
            clock.clone(),
            Box::new(PassthroughStage::new(false)),
            Box::new(publisher),
            Size::new(640, 360),
        );
        Harness {
            gpu,
            pool,
            queue,
            clock,
            rx,
            render_loop,
        }
    }

    impl Harness {
        fn enqueue(&self, millis: u64) {
            let sample = HapSample::solid(64, 64, Duration::from_millis(millis), millis, 0).unwrap();
            let frame = FrameAllocator::new(self.pool.clone()).make_empty_frame(&sample).unwrap();
            let ready = UploadSynchronizer::new(self.gpu.clone()).commit(frame).unwrap();
            self.queue.push(ready);
        }
    }

    #[test]
    fn test_tick_without_frames_skips() {
        let mut h = harness(PoolConfig::default());
        let outcome = h.render_loop.tick().unwrap();
        assert_eq!(outcome, TickOutcome::Skipped(PipelineError::NoFrameAvailable(Duration::ZERO)));
        assert!(h.rx.try_recv().is_err());
        assert_eq!(h.render_loop.counters().snapshot().ticks_without_frame, 1);
        assert_eq!(h.render_loop.state(), RenderState::Ticking);
    }

    #[test]
    fn test_tick_publishes_due_frame() {
        let mut h = harness(PoolConfig::default());
        h.enqueue(0);
        h.enqueue(33);
        h.clock.set(Duration::from_millis(40));

        match h.render_loop.tick().unwrap() {
            TickOutcome::Published { pts, texture } => {
                assert_eq!(pts, Duration::from_millis(33));
                assert_eq!(texture.region.size(), Size::new(64, 64));
                assert_eq!(h.rx.try_recv().unwrap(), texture);
            }
            other => panic!("expected a publish, got {:?}", other),
        }
    }

    #[test]
    fn test_housekeeping_runs_on_skipped_ticks() {
        let mut h = harness(PoolConfig {
            retention_ticks: 1,
            ..PoolConfig::default()
        });
        h.enqueue(0);
        h.queue.clear();
        assert_eq!(h.pool.stats().buffers, 1);

        h.render_loop.tick().unwrap();
        h.render_loop.tick().unwrap();
        assert_eq!(h.pool.stats().buffers, 0);
        assert_eq!(h.render_loop.counters().snapshot().buffers_freed, 1);
    }

    #[test]
    fn test_lost_context_is_fatal() {
        let mut h = harness(PoolConfig::default());
        h.enqueue(0);
        h.gpu.invalidate("gone");
        assert!(matches!(h.render_loop.tick(), Err(PipelineError::ContextLost(_))));
    }

    #[test]
    fn test_scheduler_start_stop_idempotent() {
        let h = harness(PoolConfig::default());
        h.enqueue(0);
        let mut scheduler = RenderScheduler::new(h.render_loop, 240);

        scheduler.start().unwrap();
        scheduler.start().unwrap();
        assert!(scheduler.is_running());

        let first = h.rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(first.region.size(), Size::new(64, 64));

        scheduler.stop();
        scheduler.stop();
        assert!(!scheduler.is_running());
        assert_eq!(scheduler.state(), RenderState::Idle);

        // Drain whatever was in flight; nothing new arrives once stopped
        while h.rx.try_recv().is_ok() {}
        thread::sleep(Duration::from_millis(20));
        assert!(h.rx.try_recv().is_err());
    }

    #[test]
    fn test_restart_forgets_idle_gap() {
        let h = harness(PoolConfig::default());
        h.enqueue(0);
        let mut scheduler = RenderScheduler::new(h.render_loop, 240);

        scheduler.tick_now().unwrap();
        thread::sleep(Duration::from_millis(200));
        scheduler.tick_now().unwrap();
        assert!(scheduler.with_loop(|l| l.frame_stats()).max_ms >= 200.0);

        scheduler.start().unwrap();
        // Two publishes came from the manual ticks
        for _ in 0..6 {
            h.rx.recv_timeout(Duration::from_secs(5)).unwrap();
        }
        scheduler.stop();

        let stats = scheduler.with_loop(|l| l.frame_stats());
        assert!(stats.sample_count > 0);
        assert!(stats.max_ms < 200.0, "idle gap leaked into tick stats: {:?}", stats);
    }

    #[test]
    fn test_scheduler_surfaces_fatal_error() {
        let h = harness(PoolConfig::default());
        h.enqueue(0);
        h.gpu.invalidate("gone");
        let mut scheduler = RenderScheduler::new(h.render_loop, 240);
        scheduler.start().unwrap();

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while scheduler.is_running() && std::time::Instant::now() < deadline {
            thread::sleep(Duration::from_millis(2));
        }
        assert!(!scheduler.is_running());
        assert!(matches!(scheduler.take_fatal_error(), Some(PipelineError::ContextLost(_))));
    }
}
