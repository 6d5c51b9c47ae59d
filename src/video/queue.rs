//! Presentation-ordered store of upload-complete frames
//!
//! Written by the decode thread, read by the render tick. Selection returns
//! the newest frame due at the queried time and discards everything older.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tracing::debug;

use super::frame::ReadyFrame;

/// Anything the render tick can ask for "the frame due at time T"
pub trait FrameSource: Send + Sync {
    /// Newest frame with presentation time at or before `time`
    fn frame_at(&self, time: Duration) -> Option<Arc<ReadyFrame>>;
}

#[derive(Debug)]
pub struct DecodedFrameQueue {
    frames: Mutex<VecDeque<Arc<ReadyFrame>>>,
    capacity: usize,
}

impl DecodedFrameQueue {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            frames: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    fn frames(&self) -> MutexGuard<'_, VecDeque<Arc<ReadyFrame>>> {
        self.frames.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Insert in presentation order
    ///
    /// A frame with the same timestamp is replaced. Past capacity the oldest
    /// frames are evicted; returns how many.
    pub fn push(&self, frame: ReadyFrame) -> usize {
        let frame = Arc::new(frame);
        let mut frames = self.frames();

        let pts = frame.pts();
        let idx = frames.partition_point(|f| f.pts() < pts);
        match frames.get(idx) {
            Some(existing) if existing.pts() == pts => frames[idx] = frame,
            _ => frames.insert(idx, frame),
        }

        let mut evicted = 0;
        while frames.len() > self.capacity {
            frames.pop_front();
            evicted += 1;
        }
        if evicted > 0 {
            debug!("Frame queue full, evicted {} oldest frame(s)", evicted);
        }
        evicted
    }

    /// Drop every pending frame (seek/rewind)
    pub fn clear(&self) {
        self.frames().clear();
    }

    pub fn len(&self) -> usize {
        self.frames().len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames().is_empty()
    }

    /// Presentation times currently queued, oldest first
    pub fn pending_pts(&self) -> Vec<Duration> {
        self.frames().iter().map(|f| f.pts()).collect()
    }
}

impl FrameSource for DecodedFrameQueue {
    fn frame_at(&self, time: Duration) -> Option<Arc<ReadyFrame>> {
        let mut frames = self.frames();
        let due = frames.partition_point(|f| f.pts() <= time);
        if due == 0 {
            return None;
        }

        // Older frames will never be shown again
        frames.drain(..due - 1);
        frames.front().cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::{GpuContextHandle, HostBackend};
    use crate::pool::{BufferPool, PoolConfig};
    use crate::video::{FrameAllocator, HapSample, UploadSynchronizer};

    struct Fixture {
        allocator: FrameAllocator,
        uploader: UploadSynchronizer,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                allocator: FrameAllocator::new(BufferPool::new(PoolConfig::default())),
                uploader: UploadSynchronizer::new(GpuContextHandle::new(HostBackend::new())),
            }
        }

        fn ready(&self, millis: u64) -> ReadyFrame {
            let sample = HapSample::solid(8, 8, Duration::from_millis(millis), millis, 0).unwrap();
            let frame = self.allocator.make_empty_frame(&sample).unwrap();
            self.uploader.commit(frame).unwrap()
        }
    }

    fn ms(millis: u64) -> Duration {
        Duration::from_millis(millis)
    }

    #[test]
    fn test_selects_newest_due_frame() {
        let fx = Fixture::new();
        let queue = DecodedFrameQueue::new(8);
        for t in [0, 33, 66, 100] {
            queue.push(fx.ready(t));
        }

        assert_eq!(queue.frame_at(ms(10)).unwrap().pts(), ms(0));
        assert_eq!(queue.frame_at(ms(40)).unwrap().pts(), ms(33));
        assert_eq!(queue.frame_at(ms(90)).unwrap().pts(), ms(66));
        assert_eq!(queue.pending_pts(), vec![ms(66), ms(100)]);
    }

    #[test]
    fn test_nothing_due_yet() {
        let fx = Fixture::new();
        let queue = DecodedFrameQueue::new(8);
        queue.push(fx.ready(50));

        assert!(queue.frame_at(ms(10)).is_none());
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_same_frame_selected_until_next_due() {
        let fx = Fixture::new();
        let queue = DecodedFrameQueue::new(8);
        queue.push(fx.ready(0));
        queue.push(fx.ready(33));

        assert_eq!(queue.frame_at(ms(5)).unwrap().pts(), ms(0));
        assert_eq!(queue.frame_at(ms(20)).unwrap().pts(), ms(0));
        assert_eq!(queue.frame_at(ms(33)).unwrap().pts(), ms(33));
    }

    #[test]
    fn test_out_of_order_push_and_replace() {
        let fx = Fixture::new();
        let queue = DecodedFrameQueue::new(8);
        queue.push(fx.ready(66));
        queue.push(fx.ready(0));
        queue.push(fx.ready(33));
        queue.push(fx.ready(33));

        assert_eq!(queue.pending_pts(), vec![ms(0), ms(33), ms(66)]);
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let fx = Fixture::new();
        let queue = DecodedFrameQueue::new(2);
        assert_eq!(queue.push(fx.ready(0)), 0);
        assert_eq!(queue.push(fx.ready(33)), 0);
        assert_eq!(queue.push(fx.ready(66)), 1);

        assert_eq!(queue.pending_pts(), vec![ms(33), ms(66)]);
    }

    #[test]
    fn test_clear_releases_buffers() {
        let pool = BufferPool::new(PoolConfig::default());
        let fx = Fixture {
            allocator: FrameAllocator::new(pool.clone()),
            uploader: UploadSynchronizer::new(GpuContextHandle::new(HostBackend::new())),
        };
        let queue = DecodedFrameQueue::new(8);
        queue.push(fx.ready(0));
        queue.push(fx.ready(33));
        assert_eq!(pool.stats().in_use, 2);

        queue.clear();
        assert!(queue.is_empty());
        assert_eq!(pool.stats().in_use, 0);
    }
}
