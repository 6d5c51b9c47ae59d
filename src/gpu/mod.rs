//! GPU context, backends and textures
//!
//! One [`GpuContextHandle`] is shared by the decoder and render threads; all
//! GPU commands are issued through the guard it hands out.

mod context;
mod host;
mod texture;
mod wgpu_backend;

pub use context::{GpuBackend, GpuContextGuard, GpuContextHandle, GpuError};
pub use host::HostBackend;
pub use texture::{GpuTexture, TextureId, TextureStorage, TextureTarget};
pub use wgpu_backend::WgpuBackend;
