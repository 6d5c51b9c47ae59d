//! Decode-target allocation
//!
//! Bridges the codec's "give me somewhere to write this sample" request to the
//! buffer pool. Plane count, shape and byte size come from the sample's
//! section headers; each plane gets its own pooled buffer.

use tracing::trace;

use super::frame::{DecodeFrame, PlaneTarget};
use super::hap::HapSample;
use crate::error::Result;
use crate::pool::BufferPool;

#[derive(Debug, Clone)]
pub struct FrameAllocator {
    pool: BufferPool,
}

impl FrameAllocator {
    pub fn new(pool: BufferPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &BufferPool {
        &self.pool
    }

    /// Build an empty decode target for `sample`
    ///
    /// Fails with `UnsupportedFormat` if the headers can't be read and
    /// `OutOfMemory` if the pool can't supply a plane. Planes already leased
    /// are released when the partial frame is dropped.
    pub fn make_empty_frame(&self, sample: &HapSample) -> Result<DecodeFrame> {
        let descriptors = sample.plane_descriptors()?;

        let planes = descriptors
            .iter()
            .map(|desc| Ok(PlaneTarget::new(self.pool.allocate(desc)?, desc.byte_len())))
            .collect::<Result<Vec<_>>>()?;

        trace!(
            "Frame {} ({:?}): {} plane(s) allocated",
            sample.frame_index,
            sample.pts,
            planes.len()
        );

        Ok(DecodeFrame::new(sample.pts, sample.frame_index, planes))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use bytes::Bytes;

    use super::*;
    use crate::error::PipelineError;
    use crate::pool::{PixelFormat, PlaneDescriptor, PoolConfig};
    use crate::video::hap::{encode_frame, HapCompressor};

    #[test]
    fn test_single_plane_frame() {
        let allocator = FrameAllocator::new(BufferPool::new(PoolConfig::default()));
        let sample = HapSample::solid(30, 30, Duration::from_millis(33), 1, 0).unwrap();

        let frame = allocator.make_empty_frame(&sample).unwrap();
        assert_eq!(frame.pts(), Duration::from_millis(33));
        assert_eq!(frame.plane_count(), 1);

        let plane = &frame.planes()[0];
        assert_eq!(plane.descriptor().format, PixelFormat::Bc1);
        // 30 pixels pad to 8 blocks of 4
        assert_eq!(plane.dxt_size(), 8 * 8 * 8);
        assert_eq!(plane.lease().byte_len(), plane.dxt_size());
    }

    #[test]
    fn test_two_plane_frame() {
        let allocator = FrameAllocator::new(BufferPool::new(PoolConfig::default()));
        let color = vec![0u8; PlaneDescriptor::new(32, 32, PixelFormat::Bc3YCoCg).unwrap().byte_len()];
        let alpha = vec![0u8; PlaneDescriptor::new(32, 32, PixelFormat::Bc4).unwrap().byte_len()];
        let data = encode_frame(
            &[(PixelFormat::Bc3YCoCg, &color), (PixelFormat::Bc4, &alpha)],
            HapCompressor::None,
        )
        .unwrap();
        let sample = HapSample::new(Duration::ZERO, 0, 32, 32, data);

        let frame = allocator.make_empty_frame(&sample).unwrap();
        assert_eq!(frame.plane_count(), 2);
        assert_ne!(frame.planes()[0].lease().id(), frame.planes()[1].lease().id());
        assert_eq!(frame.planes()[0].dxt_size(), 2 * frame.planes()[1].dxt_size());
    }

    #[test]
    fn test_out_of_memory_releases_nothing() {
        let pool = BufferPool::new(PoolConfig {
            max_bytes: 1024,
            ..PoolConfig::default()
        });
        let allocator = FrameAllocator::new(pool.clone());
        let sample = HapSample::solid(64, 64, Duration::ZERO, 0, 0).unwrap();

        let result = allocator.make_empty_frame(&sample);
        assert!(matches!(result, Err(PipelineError::OutOfMemory { .. })));
        assert_eq!(pool.stats().in_use, 0);
    }

    #[test]
    fn test_oversized_sample_is_unsupported() {
        let pool = BufferPool::new(PoolConfig::default());
        let allocator = FrameAllocator::new(pool.clone());
        // One uncompressed DXT5 section claiming a 4G x 4G image
        let header = Bytes::from_static(&[0x01, 0x00, 0x00, 0xAE, 0x00]);
        let sample = HapSample::new(Duration::ZERO, 0, u32::MAX, u32::MAX, header);

        let result = allocator.make_empty_frame(&sample);
        assert!(matches!(result, Err(PipelineError::UnsupportedFormat(_))));
        assert_eq!(pool.stats(), Default::default());

        // The pool is still usable for the next sample
        let next = HapSample::solid(16, 16, Duration::from_millis(33), 1, 0).unwrap();
        assert_eq!(allocator.make_empty_frame(&next).unwrap().plane_count(), 1);
    }
}
