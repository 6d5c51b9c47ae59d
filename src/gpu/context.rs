//! Shared GPU context with a single exclusion domain
//!
//! A GPU context may be driven by only one thread at a time. Decode-completion
//! uploads run on decoder threads while the render tick runs on the timer
//! thread, so every GPU command goes through [`GpuContextHandle::lock`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::texture::{GpuTexture, TextureId};
use crate::error::PipelineError;
use crate::pool::PlaneDescriptor;

/// Errors from a GPU backend on a context that is still usable
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GpuError {
    #[error("texture creation failed: {0}")]
    TextureCreation(String),
    #[error("upload size mismatch: texture holds {expected} bytes, got {actual}")]
    SizeMismatch { expected: usize, actual: usize },
    #[error("texture {0} was not created by this backend")]
    ForeignTexture(TextureId),
    #[error("unsupported by this GPU: {0}")]
    Unsupported(String),
}

/// Commands a GPU backend must provide
///
/// Implementations are only ever invoked while the owning context's lock is
/// held, so they need not be internally synchronized.
pub trait GpuBackend: Send {
    /// Backend name for logs
    fn name(&self) -> &'static str;

    /// Create a texture able to receive `descriptor`'s plane data
    fn create_texture(
        &mut self,
        id: TextureId,
        descriptor: &PlaneDescriptor,
    ) -> Result<GpuTexture, GpuError>;

    /// Push CPU-written plane bytes into `texture`
    fn upload(
        &mut self,
        texture: &mut GpuTexture,
        descriptor: &PlaneDescriptor,
        data: &[u8],
    ) -> Result<(), GpuError>;
}

struct ContextInner {
    backend: Mutex<Box<dyn GpuBackend>>,
    lost: Mutex<Option<String>>,
    next_texture_id: AtomicU64,
    name: &'static str,
}

/// Cloneable handle to one GPU context and its lock
#[derive(Clone)]
pub struct GpuContextHandle {
    inner: Arc<ContextInner>,
}

impl GpuContextHandle {
    pub fn new(backend: impl GpuBackend + 'static) -> Self {
        let name = backend.name();
        tracing::info!(backend = name, "GPU context created");
        Self {
            inner: Arc::new(ContextInner {
                backend: Mutex::new(Box::new(backend)),
                lost: Mutex::new(None),
                next_texture_id: AtomicU64::new(1),
                name,
            }),
        }
    }

    /// Acquire exclusive use of the context
    ///
    /// Fails with the fatal [`PipelineError::ContextLost`] once the context
    /// has been invalidated or a thread panicked while holding it.
    pub fn lock(&self) -> Result<GpuContextGuard<'_>, PipelineError> {
        self.check_valid()?;

        let backend = match self.inner.backend.lock() {
            Ok(guard) => guard,
            Err(_) => {
                self.invalidate("a thread panicked while holding the GPU context");
                return Err(self.lost_error());
            }
        };

        // Invalidation may have happened while we were waiting
        self.check_valid()?;

        Ok(GpuContextGuard {
            backend,
            next_texture_id: &self.inner.next_texture_id,
        })
    }

    /// Mark the context unusable; every later `lock` fails
    pub fn invalidate(&self, reason: impl Into<String>) {
        let reason = reason.into();
        let mut lost = self
            .inner
            .lost
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if lost.is_none() {
            tracing::error!(backend = self.inner.name, %reason, "GPU context lost");
            *lost = Some(reason);
        }
    }

    pub fn is_valid(&self) -> bool {
        self.inner
            .lost
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }

    pub fn backend_name(&self) -> &'static str {
        self.inner.name
    }

    fn check_valid(&self) -> Result<(), PipelineError> {
        if self.is_valid() {
            Ok(())
        } else {
            Err(self.lost_error())
        }
    }

    fn lost_error(&self) -> PipelineError {
        let reason = self
            .inner
            .lost
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .unwrap_or_else(|| "unknown".to_string());
        PipelineError::ContextLost(reason)
    }
}

impl std::fmt::Debug for GpuContextHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GpuContextHandle")
            .field("backend", &self.inner.name)
            .field("valid", &self.is_valid())
            .finish()
    }
}

/// Exclusive access to the GPU context; released on drop
pub struct GpuContextGuard<'a> {
    backend: MutexGuard<'a, Box<dyn GpuBackend>>,
    next_texture_id: &'a AtomicU64,
}

impl GpuContextGuard<'_> {
    pub fn create_texture(&mut self, descriptor: &PlaneDescriptor) -> Result<GpuTexture, GpuError> {
        let id = TextureId(self.next_texture_id.fetch_add(1, Ordering::Relaxed));
        self.backend.create_texture(id, descriptor)
    }

    pub fn upload(
        &mut self,
        texture: &mut GpuTexture,
        descriptor: &PlaneDescriptor,
        data: &[u8],
    ) -> Result<(), GpuError> {
        self.backend.upload(texture, descriptor, data)
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }
}
