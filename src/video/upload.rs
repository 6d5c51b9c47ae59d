//! CPU-to-GPU commit of decoded frames
//!
//! Runs on the decode thread once the codec has filled a frame. Every plane
//! push happens under the shared GPU context lock, so it never interleaves
//! with a render pass on the render thread. Only a successful commit yields a
//! [`ReadyFrame`], which is the one type the render side accepts.

use tracing::{error, trace};

use super::frame::{DecodeFrame, ReadyFrame};
use crate::error::{PipelineError, Result};
use crate::gpu::GpuContextHandle;

#[derive(Debug, Clone)]
pub struct UploadSynchronizer {
    gpu: GpuContextHandle,
}

impl UploadSynchronizer {
    pub fn new(gpu: GpuContextHandle) -> Self {
        Self { gpu }
    }

    /// Push every plane of `frame` to its GPU texture
    ///
    /// The lock is taken per plane. A failed push drops the frame, releasing
    /// its buffers; `ContextLost` is fatal and returned as-is.
    pub fn commit(&self, frame: DecodeFrame) -> Result<ReadyFrame> {
        let pts = frame.pts();
        let frame_index = frame.frame_index();
        let planes = frame.into_planes();

        let mut leases = Vec::with_capacity(planes.len());
        let mut textures = Vec::with_capacity(planes.len());

        for plane in planes {
            let texture = {
                let mut gpu = self.gpu.lock()?;
                plane.lease().push_to_gpu(&mut gpu).map_err(|e| {
                    error!("Frame {} upload failed: {}", frame_index, e);
                    PipelineError::from(e)
                })?
            };
            textures.push(texture);
            leases.push(plane.into_lease());
        }

        trace!("Frame {} ({:?}) committed to {:?}", frame_index, pts, textures);
        Ok(ReadyFrame::new(pts, frame_index, leases, textures))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::thread;
    use std::time::Duration;

    use super::*;
    use crate::gpu::HostBackend;
    use crate::pool::{BufferPool, PoolConfig};
    use crate::video::{DxtCodec, FrameAllocator, HapCodec, HapSample};

    fn setup() -> (BufferPool, FrameAllocator, UploadSynchronizer, GpuContextHandle) {
        let pool = BufferPool::new(PoolConfig::default());
        let gpu = GpuContextHandle::new(HostBackend::new());
        (
            pool.clone(),
            FrameAllocator::new(pool),
            UploadSynchronizer::new(gpu.clone()),
            gpu,
        )
    }

    #[test]
    fn test_commit_uploads_plane_bytes() {
        let (_pool, allocator, uploader, _gpu) = setup();
        let sample = HapSample::solid(16, 16, Duration::ZERO, 0, 0x5A).unwrap();
        let mut frame = allocator.make_empty_frame(&sample).unwrap();
        HapCodec::new().decode(&sample, &mut frame).unwrap();

        let ready = uploader.commit(frame).unwrap();
        assert_eq!(ready.textures().len(), 1);

        let primary = ready.primary().unwrap();
        assert_eq!(primary.texture_id(), Some(ready.textures()[0]));
        let uploaded = primary
            .with_texture(|t| t.host_bytes().map(<[u8]>::to_vec))
            .flatten()
            .unwrap();
        assert!(uploaded.iter().all(|&b| b == 0x5A));
    }

    #[test]
    fn test_reused_buffer_keeps_texture() {
        let (pool, allocator, uploader, _gpu) = setup();
        let first = HapSample::solid(16, 16, Duration::ZERO, 0, 1).unwrap();
        let second = HapSample::solid(16, 16, Duration::from_millis(33), 1, 2).unwrap();

        let ready = uploader.commit(allocator.make_empty_frame(&first).unwrap()).unwrap();
        let texture = ready.textures()[0];
        drop(ready);

        let ready = uploader.commit(allocator.make_empty_frame(&second).unwrap()).unwrap();
        assert_eq!(ready.textures()[0], texture);
        assert_eq!(pool.stats().reuses, 1);
    }

    #[test]
    fn test_lost_context_is_fatal_and_releases() {
        let (pool, allocator, uploader, gpu) = setup();
        let sample = HapSample::solid(16, 16, Duration::ZERO, 0, 0).unwrap();
        let frame = allocator.make_empty_frame(&sample).unwrap();

        gpu.invalidate("device removed");
        let err = uploader.commit(frame).unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(pool.stats().in_use, 0);
    }

    #[test]
    fn test_overlapping_commits_from_several_threads() {
        let (pool, allocator, uploader, _gpu) = setup();

        let workers: Vec<_> = (0..4u8)
            .map(|worker| {
                let allocator = allocator.clone();
                let uploader = uploader.clone();
                thread::spawn(move || {
                    let mut codec = HapCodec::new();
                    (0..25u8)
                        .map(|i| {
                            let fill = worker * 50 + i;
                            let sample =
                                HapSample::solid(32, 32, Duration::from_millis(i as u64), i as u64, fill).unwrap();
                            let mut frame = allocator.make_empty_frame(&sample).unwrap();
                            codec.decode(&sample, &mut frame).unwrap();
                            (fill, uploader.commit(frame).unwrap())
                        })
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let committed: Vec<(u8, ReadyFrame)> = workers
            .into_iter()
            .flat_map(|worker| worker.join().unwrap())
            .collect();
        assert_eq!(committed.len(), 100);

        // Every live frame owns its own buffer
        let ids: HashSet<_> = committed.iter().map(|(_, ready)| ready.primary().unwrap().id()).collect();
        assert_eq!(ids.len(), committed.len());

        for (fill, ready) in &committed {
            let uploaded = ready
                .primary()
                .unwrap()
                .with_texture(|t| t.host_bytes().map(<[u8]>::to_vec))
                .flatten()
                .unwrap();
            assert!(uploaded.iter().all(|b| b == fill), "frame {} torn", ready.frame_index());
        }

        drop(committed);
        assert_eq!(pool.stats().in_use, 0);
    }
}
