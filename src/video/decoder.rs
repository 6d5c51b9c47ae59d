//! Background decode thread
//!
//! Pulls Hap samples from a [`SampleSource`] at the stream's frame rate and
//! runs each through allocate, decode, commit and enqueue. Per-sample failures
//! drop that sample and move on; only a lost GPU context stops the thread.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use super::allocator::FrameAllocator;
use super::frame::DecodeFrame;
use super::hap::HapSample;
use super::queue::DecodedFrameQueue;
use super::upload::UploadSynchronizer;
use crate::error::{PipelineError, Result};
use crate::telemetry::PipelineCounters;

/// Source of compressed samples in presentation order
pub trait SampleSource: Send {
    /// Next sample, or `None` at end of stream
    fn next_sample(&mut self) -> Option<HapSample>;

    /// Seek back to the first sample
    fn rewind(&mut self);

    /// Nominal frames per second
    fn frame_rate(&self) -> f64;
}

/// Unwraps a compressed sample into a frame's plane memory
pub trait DxtCodec: Send {
    fn decode(&mut self, sample: &HapSample, frame: &mut DecodeFrame) -> Result<()>;
}

/// Generated BC1 gradient stream
#[derive(Debug, Clone)]
pub struct TestPatternSource {
    width: u32,
    height: u32,
    frame_rate: f64,
    /// Stream length; endless when `None`
    frame_count: Option<u64>,
    snappy: bool,
    next_index: u64,
}

impl TestPatternSource {
    pub fn new(width: u32, height: u32, frame_rate: f64) -> Self {
        Self {
            width,
            height,
            frame_rate: frame_rate.max(1.0),
            frame_count: None,
            snappy: true,
            next_index: 0,
        }
    }

    pub fn with_frame_count(mut self, frame_count: u64) -> Self {
        self.frame_count = Some(frame_count);
        self
    }

    pub fn with_snappy(mut self, snappy: bool) -> Self {
        self.snappy = snappy;
        self
    }
}

impl SampleSource for TestPatternSource {
    fn next_sample(&mut self) -> Option<HapSample> {
        if self.frame_count.is_some_and(|count| self.next_index >= count) {
            return None;
        }

        let index = self.next_index;
        let pts = Duration::from_secs_f64(index as f64 / self.frame_rate);
        match HapSample::test_pattern(self.width, self.height, pts, index, self.snappy) {
            Ok(sample) => {
                self.next_index += 1;
                Some(sample)
            }
            Err(e) => {
                tracing::warn!("Test pattern generation failed: {}", e);
                None
            }
        }
    }

    fn rewind(&mut self) {
        self.next_index = 0;
    }

    fn frame_rate(&self) -> f64 {
        self.frame_rate
    }
}

/// Pre-built samples played in order
#[derive(Debug, Clone)]
pub struct SampleList {
    samples: Vec<HapSample>,
    cursor: usize,
    frame_rate: f64,
}

impl SampleList {
    pub fn new(samples: Vec<HapSample>, frame_rate: f64) -> Self {
        Self {
            samples,
            cursor: 0,
            frame_rate: frame_rate.max(1.0),
        }
    }
}

impl SampleSource for SampleList {
    fn next_sample(&mut self) -> Option<HapSample> {
        let sample = self.samples.get(self.cursor).cloned()?;
        self.cursor += 1;
        Some(sample)
    }

    fn rewind(&mut self) {
        self.cursor = 0;
    }

    fn frame_rate(&self) -> f64 {
        self.frame_rate
    }
}

/// The per-sample decode path: allocate, decode, commit, enqueue
#[derive(Debug, Clone)]
pub struct DecodeStage {
    allocator: FrameAllocator,
    uploader: UploadSynchronizer,
    queue: Arc<DecodedFrameQueue>,
    counters: Arc<PipelineCounters>,
}

impl DecodeStage {
    pub fn new(
        allocator: FrameAllocator,
        uploader: UploadSynchronizer,
        queue: Arc<DecodedFrameQueue>,
        counters: Arc<PipelineCounters>,
    ) -> Self {
        Self {
            allocator,
            uploader,
            queue,
            counters,
        }
    }

    pub fn queue(&self) -> &Arc<DecodedFrameQueue> {
        &self.queue
    }

    /// Run one sample through to the frame queue
    ///
    /// On a recoverable error the sample is dropped (its buffers return to
    /// the pool) and the error is returned for the caller to log or ignore.
    pub fn process(&self, codec: &mut dyn DxtCodec, sample: &HapSample) -> Result<()> {
        let result = self
            .allocator
            .make_empty_frame(sample)
            .and_then(|mut frame| {
                codec.decode(sample, &mut frame)?;
                Ok(frame)
            })
            .and_then(|frame| self.uploader.commit(frame));

        match result {
            Ok(ready) => {
                let evicted = self.queue.push(ready);
                self.counters.sample_decoded();
                self.counters.frames_evicted(evicted);
                Ok(())
            }
            Err(e) => {
                if !e.is_fatal() {
                    self.counters.sample_dropped();
                    tracing::warn!("Dropping frame {} ({:?}): {}", sample.frame_index, sample.pts, e);
                }
                Err(e)
            }
        }
    }
}

/// Shared state between the decode thread and its owner
struct SharedState {
    running: AtomicBool,
    restart_requested: AtomicBool,
    end_of_stream: AtomicBool,
    frame_index: AtomicU64,
    fatal: Mutex<Option<PipelineError>>,
}

impl SharedState {
    fn new() -> Self {
        Self {
            running: AtomicBool::new(true),
            restart_requested: AtomicBool::new(false),
            end_of_stream: AtomicBool::new(false),
            frame_index: AtomicU64::new(0),
            fatal: Mutex::new(None),
        }
    }
}

/// Decode thread handle; stops and joins on drop
pub struct DecodeWorker {
    state: Arc<SharedState>,
    thread_handle: Option<JoinHandle<()>>,
}

impl DecodeWorker {
    pub fn spawn(
        stage: DecodeStage,
        source: Box<dyn SampleSource>,
        codec: Box<dyn DxtCodec>,
    ) -> std::io::Result<Self> {
        let state = Arc::new(SharedState::new());
        let state_clone = Arc::clone(&state);

        tracing::info!("DecodeWorker: starting at {:.2}fps", source.frame_rate());

        let thread_handle = thread::Builder::new()
            .name("hap-decode".to_string())
            .spawn(move || Self::decode_loop(state_clone, stage, source, codec))?;

        Ok(Self {
            state,
            thread_handle: Some(thread_handle),
        })
    }

    fn decode_loop(
        state: Arc<SharedState>,
        stage: DecodeStage,
        mut source: Box<dyn SampleSource>,
        mut codec: Box<dyn DxtCodec>,
    ) {
        let frame_duration = Duration::from_secs_f64(1.0 / source.frame_rate());
        let mut next_frame_time = Instant::now();

        while state.running.load(Ordering::Acquire) {
            if state.restart_requested.swap(false, Ordering::AcqRel) {
                source.rewind();
                stage.queue().clear();
                state.end_of_stream.store(false, Ordering::Release);
                state.frame_index.store(0, Ordering::Release);
                next_frame_time = Instant::now();
                tracing::debug!("DecodeWorker: restarted");
            }

            // Hold at the end until a restart
            if state.end_of_stream.load(Ordering::Acquire) {
                thread::sleep(Duration::from_millis(10));
                continue;
            }

            let now = Instant::now();
            if now < next_frame_time {
                let sleep_time = next_frame_time - now;
                if sleep_time > Duration::from_micros(500) {
                    thread::sleep(sleep_time - Duration::from_micros(500));
                }
                while Instant::now() < next_frame_time {
                    std::hint::spin_loop();
                }
            }

            match source.next_sample() {
                Some(sample) => {
                    state.frame_index.store(sample.frame_index, Ordering::Release);
                    if let Err(e) = stage.process(codec.as_mut(), &sample) {
                        if e.is_fatal() {
                            tracing::error!("DecodeWorker: stopping, {}", e);
                            *state.fatal.lock().unwrap_or_else(PoisonError::into_inner) = Some(e);
                            state.running.store(false, Ordering::Release);
                            break;
                        }
                    }
                }
                None => {
                    state.end_of_stream.store(true, Ordering::Release);
                    tracing::debug!("DecodeWorker: end of stream");
                    continue;
                }
            }

            next_frame_time += frame_duration;

            // Fell behind: don't try to catch up
            let now = Instant::now();
            if next_frame_time < now {
                next_frame_time = now;
            }
        }

        tracing::debug!("DecodeWorker thread stopped");
    }

    /// Seek back to the first sample and discard queued frames
    pub fn restart(&self) {
        self.state.restart_requested.store(true, Ordering::Release);
    }

    /// Index of the sample most recently pulled
    pub fn frame_index(&self) -> u64 {
        self.state.frame_index.load(Ordering::Acquire)
    }

    pub fn is_running(&self) -> bool {
        self.state.running.load(Ordering::Acquire)
    }

    pub fn is_at_end(&self) -> bool {
        self.state.end_of_stream.load(Ordering::Acquire)
    }

    /// The error that stopped the thread, if any
    pub fn take_fatal_error(&self) -> Option<PipelineError> {
        self.state.fatal.lock().unwrap_or_else(PoisonError::into_inner).take()
    }
}

impl Drop for DecodeWorker {
    fn drop(&mut self) {
        self.state.running.store(false, Ordering::Release);

        if let Some(handle) = self.thread_handle.take() {
            if let Err(e) = handle.join() {
                tracing::warn!("Failed to join decode thread: {:?}", e);
            }
        }
    }
}
