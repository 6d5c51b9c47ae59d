//! Dual-mapped buffers and the leases that keep them alive
//!
//! A [`Buffer`] pairs CPU-writable plane bytes with the GPU texture they are
//! pushed into. Both halves share one lifetime, owned by the pool; callers
//! only ever hold a [`BufferLease`], which releases its reference on drop.

use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::descriptor::PlaneDescriptor;
use super::pool::PoolShared;
use crate::gpu::{GpuContextGuard, GpuError, GpuTexture, TextureId};

/// Identity of a pooled buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(pub u64);

pub(crate) struct BufferMemory {
    pub(crate) descriptor: PlaneDescriptor,
    cpu: Vec<u8>,
    texture: Option<GpuTexture>,
}

/// A pool-owned memory region bound to one plane shape
pub struct Buffer {
    id: BufferId,
    byte_len: usize,
    memory: Mutex<BufferMemory>,
}

impl Buffer {
    pub(crate) fn new(id: BufferId, descriptor: PlaneDescriptor, cpu: Vec<u8>) -> Self {
        Self {
            id,
            byte_len: cpu.len(),
            memory: Mutex::new(BufferMemory {
                descriptor,
                cpu,
                texture: None,
            }),
        }
    }

    pub fn id(&self) -> BufferId {
        self.id
    }

    /// Bytes of CPU backing (the GPU texture holds the same amount)
    pub fn byte_len(&self) -> usize {
        self.byte_len
    }

    pub(crate) fn memory(&self) -> MutexGuard<'_, BufferMemory> {
        self.memory.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for Buffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Buffer")
            .field("id", &self.id)
            .field("byte_len", &self.byte_len)
            .finish()
    }
}

/// Counted reference to a pooled buffer
///
/// Cloning retains the buffer, dropping releases it. When the last lease is
/// dropped the buffer goes back to the pool's free list, warm for reuse.
pub struct BufferLease {
    buffer: Arc<Buffer>,
    descriptor: PlaneDescriptor,
    pool: Arc<PoolShared>,
}

impl BufferLease {
    pub(crate) fn new(buffer: Arc<Buffer>, descriptor: PlaneDescriptor, pool: Arc<PoolShared>) -> Self {
        Self {
            buffer,
            descriptor,
            pool,
        }
    }

    pub fn id(&self) -> BufferId {
        self.buffer.id()
    }

    pub fn descriptor(&self) -> &PlaneDescriptor {
        &self.descriptor
    }

    pub fn byte_len(&self) -> usize {
        self.buffer.byte_len()
    }

    pub(crate) fn is_from(&self, pool: &Arc<PoolShared>) -> bool {
        Arc::ptr_eq(&self.pool, pool)
    }

    /// Writable view of the CPU backing
    ///
    /// Holds the buffer's memory lock, so no upload or render can observe the
    /// bytes while the guard is alive.
    pub fn write(&self) -> PlaneWriteGuard<'_> {
        PlaneWriteGuard {
            memory: self.buffer.memory(),
        }
    }

    /// Copy of the CPU backing
    pub fn to_vec(&self) -> Vec<u8> {
        self.buffer.memory().cpu.clone()
    }

    /// Push the CPU bytes into the buffer's GPU texture
    ///
    /// The texture is created on first push and kept across reuse. Requires
    /// the GPU context lock, which the caller proves by passing its guard.
    pub fn push_to_gpu(&self, gpu: &mut GpuContextGuard<'_>) -> Result<TextureId, GpuError> {
        let mut memory = self.buffer.memory();
        let BufferMemory {
            descriptor,
            cpu,
            texture,
        } = &mut *memory;

        let needs_texture = texture.as_ref().map_or(true, |t| !t.fits(descriptor));
        if needs_texture {
            *texture = Some(gpu.create_texture(descriptor)?);
        }

        match texture.as_mut() {
            Some(texture) => {
                gpu.upload(texture, descriptor, cpu)?;
                Ok(texture.id())
            }
            None => Err(GpuError::TextureCreation("texture missing after creation".to_string())),
        }
    }

    /// Run `f` on the GPU texture, if one has been pushed
    pub fn with_texture<R>(&self, f: impl FnOnce(&GpuTexture) -> R) -> Option<R> {
        self.buffer.memory().texture.as_ref().map(f)
    }

    /// Identity of the GPU texture, if one has been pushed
    pub fn texture_id(&self) -> Option<TextureId> {
        self.with_texture(|t| t.id())
    }
}

impl Clone for BufferLease {
    fn clone(&self) -> Self {
        self.pool.retain(self.id());
        Self {
            buffer: Arc::clone(&self.buffer),
            descriptor: self.descriptor,
            pool: Arc::clone(&self.pool),
        }
    }
}

impl Drop for BufferLease {
    fn drop(&mut self) {
        self.pool.release(self.id());
    }
}

impl std::fmt::Debug for BufferLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferLease")
            .field("id", &self.id())
            .field("descriptor", &self.descriptor)
            .finish()
    }
}

/// Exclusive write access to a buffer's CPU bytes
pub struct PlaneWriteGuard<'a> {
    memory: MutexGuard<'a, BufferMemory>,
}

impl Deref for PlaneWriteGuard<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.memory.cpu
    }
}

impl DerefMut for PlaneWriteGuard<'_> {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.memory.cpu
    }
}
