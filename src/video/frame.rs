//! Decode targets and upload-complete frames

use std::time::Duration;

use crate::gpu::TextureId;
use crate::pool::{BufferLease, PlaneDescriptor, PlaneWriteGuard};

/// One plane of a decode target: pooled memory plus the DXT byte count the
/// codec must fill
#[derive(Debug)]
pub struct PlaneTarget {
    lease: BufferLease,
    dxt_size: usize,
}

impl PlaneTarget {
    pub fn new(lease: BufferLease, dxt_size: usize) -> Self {
        Self { lease, dxt_size }
    }

    pub fn lease(&self) -> &BufferLease {
        &self.lease
    }

    pub fn descriptor(&self) -> &PlaneDescriptor {
        self.lease.descriptor()
    }

    pub fn dxt_size(&self) -> usize {
        self.dxt_size
    }

    pub(crate) fn into_lease(self) -> BufferLease {
        self.lease
    }

    /// Destination bytes for the codec
    pub fn write(&mut self) -> PlaneWriteGuard<'_> {
        self.lease.write()
    }
}

/// A frame the codec is writing into
///
/// Owns its plane leases exclusively. Consumed by
/// [`UploadSynchronizer::commit`](super::UploadSynchronizer::commit), which is
/// the only way to obtain a [`ReadyFrame`].
#[derive(Debug)]
pub struct DecodeFrame {
    pts: Duration,
    frame_index: u64,
    planes: Vec<PlaneTarget>,
}

impl DecodeFrame {
    pub(crate) fn new(pts: Duration, frame_index: u64, planes: Vec<PlaneTarget>) -> Self {
        Self {
            pts,
            frame_index,
            planes,
        }
    }

    pub fn pts(&self) -> Duration {
        self.pts
    }

    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    pub fn plane_count(&self) -> usize {
        self.planes.len()
    }

    pub fn planes(&self) -> &[PlaneTarget] {
        &self.planes
    }

    pub fn planes_mut(&mut self) -> &mut [PlaneTarget] {
        &mut self.planes
    }

    pub(crate) fn into_planes(self) -> Vec<PlaneTarget> {
        self.planes
    }
}

/// A frame whose planes are resident on the GPU
///
/// Read-only from here on; render and publish only ever see this type.
#[derive(Debug)]
pub struct ReadyFrame {
    pts: Duration,
    frame_index: u64,
    planes: Vec<BufferLease>,
    textures: Vec<TextureId>,
}

impl ReadyFrame {
    pub(crate) fn new(pts: Duration, frame_index: u64, planes: Vec<BufferLease>, textures: Vec<TextureId>) -> Self {
        Self {
            pts,
            frame_index,
            planes,
            textures,
        }
    }

    pub fn pts(&self) -> Duration {
        self.pts
    }

    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    /// Plane leases in section order
    pub fn planes(&self) -> &[BufferLease] {
        &self.planes
    }

    /// The colour plane fed to processing
    pub fn primary(&self) -> Option<&BufferLease> {
        self.planes.first()
    }

    /// Texture identities, one per plane
    pub fn textures(&self) -> &[TextureId] {
        &self.textures
    }
}
