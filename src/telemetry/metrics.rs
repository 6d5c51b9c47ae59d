//! Pipeline counters and tick timing
//!
//! Counters are bumped from the decode and render threads without locking;
//! [`PipelineCounters::snapshot`] gives a consistent-enough view for logging.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Tick timing statistics
#[derive(Debug, Clone, Default)]
pub struct FrameStats {
    pub avg_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
    pub p50_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
    pub sample_count: usize,
}

/// Event counters shared by the decode and render threads
#[derive(Debug, Default)]
pub struct PipelineCounters {
    samples_decoded: AtomicU64,
    samples_dropped: AtomicU64,
    frames_evicted: AtomicU64,
    ticks: AtomicU64,
    frames_published: AtomicU64,
    ticks_without_frame: AtomicU64,
    render_unavailable: AtomicU64,
    buffers_freed: AtomicU64,
}

/// Point-in-time copy of [`PipelineCounters`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CounterSnapshot {
    /// Samples decoded and committed to the GPU
    pub samples_decoded: u64,
    /// Samples abandoned (out of memory, unsupported, decode failure)
    pub samples_dropped: u64,
    /// Ready frames evicted from a full queue before being shown
    pub frames_evicted: u64,
    pub ticks: u64,
    pub frames_published: u64,
    /// Ticks where no frame was due yet
    pub ticks_without_frame: u64,
    /// Ticks where processing produced nothing
    pub render_unavailable: u64,
    /// Buffers reclaimed by housekeeping
    pub buffers_freed: u64,
}

impl PipelineCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sample_decoded(&self) {
        self.samples_decoded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn sample_dropped(&self) {
        self.samples_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn frames_evicted(&self, count: usize) {
        self.frames_evicted.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn tick(&self) {
        self.ticks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn frame_published(&self) {
        self.frames_published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn tick_without_frame(&self) {
        self.ticks_without_frame.fetch_add(1, Ordering::Relaxed);
    }

    pub fn tick_render_unavailable(&self) {
        self.render_unavailable.fetch_add(1, Ordering::Relaxed);
    }

    pub fn buffers_freed(&self, count: usize) {
        self.buffers_freed.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            samples_decoded: self.samples_decoded.load(Ordering::Relaxed),
            samples_dropped: self.samples_dropped.load(Ordering::Relaxed),
            frames_evicted: self.frames_evicted.load(Ordering::Relaxed),
            ticks: self.ticks.load(Ordering::Relaxed),
            frames_published: self.frames_published.load(Ordering::Relaxed),
            ticks_without_frame: self.ticks_without_frame.load(Ordering::Relaxed),
            render_unavailable: self.render_unavailable.load(Ordering::Relaxed),
            buffers_freed: self.buffers_freed.load(Ordering::Relaxed),
        }
    }
}

/// Tick-to-tick interval profiler
pub struct FrameProfiler {
    intervals: VecDeque<Duration>,
    max_samples: usize,
    last_tick: Option<Instant>,
}

impl Default for FrameProfiler {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameProfiler {
    /// Keeps five seconds of history at 60Hz
    pub fn new() -> Self {
        Self::with_capacity(300)
    }

    pub fn with_capacity(max_samples: usize) -> Self {
        let max_samples = max_samples.max(1);
        Self {
            intervals: VecDeque::with_capacity(max_samples),
            max_samples,
            last_tick: None,
        }
    }

    /// Mark the start of a tick
    pub fn begin_frame(&mut self) {
        let now = Instant::now();
        if let Some(last) = self.last_tick {
            self.intervals.push_back(now.duration_since(last));
            if self.intervals.len() > self.max_samples {
                self.intervals.pop_front();
            }
        }
        self.last_tick = Some(now);
    }

    /// Forget history; called when the render timer (re)starts
    pub fn reset(&mut self) {
        self.intervals.clear();
        self.last_tick = None;
    }

    pub fn stats(&self) -> FrameStats {
        if self.intervals.is_empty() {
            return FrameStats::default();
        }

        let mut times: Vec<f64> = self.intervals.iter().map(|d| d.as_secs_f64() * 1000.0).collect();
        times.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

        let sum: f64 = times.iter().sum();
        FrameStats {
            avg_ms: sum / times.len() as f64,
            min_ms: times.first().copied().unwrap_or(0.0),
            max_ms: times.last().copied().unwrap_or(0.0),
            p50_ms: percentile(&times, 0.50),
            p95_ms: percentile(&times, 0.95),
            p99_ms: percentile(&times, 0.99),
            sample_count: times.len(),
        }
    }

    /// Effective tick rate over the retained window
    pub fn fps(&self) -> f64 {
        let total: Duration = self.intervals.iter().sum();
        if total.is_zero() {
            0.0
        } else {
            self.intervals.len() as f64 / total.as_secs_f64()
        }
    }
}

/// Percentile of an ascending slice
fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let idx = ((sorted.len() - 1) as f64 * p) as usize;
    sorted[idx]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profiler_needs_two_ticks() {
        let mut profiler = FrameProfiler::new();
        profiler.begin_frame();
        assert_eq!(profiler.stats().sample_count, 0);
        assert_eq!(profiler.fps(), 0.0);

        std::thread::sleep(Duration::from_millis(5));
        profiler.begin_frame();
        let stats = profiler.stats();
        assert_eq!(stats.sample_count, 1);
        assert!(stats.avg_ms >= 5.0);
        assert!(profiler.fps() > 0.0);
    }

    #[test]
    fn test_profiler_window_is_bounded() {
        let mut profiler = FrameProfiler::with_capacity(3);
        for _ in 0..10 {
            profiler.begin_frame();
        }
        assert_eq!(profiler.stats().sample_count, 3);

        profiler.reset();
        assert_eq!(profiler.stats().sample_count, 0);
    }

    #[test]
    fn test_percentile() {
        let values = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0, 10.0];
        assert_eq!(percentile(&values, 0.5), 5.0);
        assert_eq!(percentile(&values, 0.0), 1.0);
        assert_eq!(percentile(&values, 1.0), 10.0);
    }

    #[test]
    fn test_counter_snapshot() {
        let counters = PipelineCounters::new();
        counters.sample_decoded();
        counters.sample_decoded();
        counters.sample_dropped();
        counters.frames_evicted(3);
        counters.tick();
        counters.frame_published();

        let snap = counters.snapshot();
        assert_eq!(snap.samples_decoded, 2);
        assert_eq!(snap.samples_dropped, 1);
        assert_eq!(snap.frames_evicted, 3);
        assert_eq!(snap.ticks, 1);
        assert_eq!(snap.frames_published, 1);
        assert_eq!(snap.ticks_without_frame, 0);
    }
}
