//! GPU-side half of a dual-mapped buffer

use crate::pool::{PixelFormat, PlaneDescriptor};

/// Identity of a texture, unique per GPU context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureId(pub u64);

impl std::fmt::Display for TextureId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "tex#{}", self.0)
    }
}

/// Texture target kind reported to publishers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TextureTarget {
    /// Normalized-coordinate 2D texture
    #[default]
    Texture2D,
    /// Pixel-coordinate rectangle texture
    Rectangle,
}

/// Backing storage of a texture, owned by the backend that created it
pub enum TextureStorage {
    /// System memory standing in for VRAM (headless runs, tests)
    Host(Vec<u8>),
    /// Real GPU texture
    Wgpu(wgpu::Texture),
}

impl std::fmt::Debug for TextureStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TextureStorage::Host(bytes) => write!(f, "Host({} bytes)", bytes.len()),
            TextureStorage::Wgpu(_) => write!(f, "Wgpu"),
        }
    }
}

/// A texture created through a [`GpuContextHandle`](super::GpuContextHandle)
///
/// Dimensions are block-aligned; the visible image region is carried by the
/// plane descriptor of the buffer that owns the texture.
#[derive(Debug)]
pub struct GpuTexture {
    id: TextureId,
    target: TextureTarget,
    width: u32,
    height: u32,
    format: PixelFormat,
    storage: TextureStorage,
}

impl GpuTexture {
    pub fn new(
        id: TextureId,
        target: TextureTarget,
        descriptor: &PlaneDescriptor,
        storage: TextureStorage,
    ) -> Self {
        Self {
            id,
            target,
            width: descriptor.padded_width(),
            height: descriptor.padded_height(),
            format: descriptor.format,
            storage,
        }
    }

    pub fn id(&self) -> TextureId {
        self.id
    }

    pub fn target(&self) -> TextureTarget {
        self.target
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    /// Whether this texture can hold data described by `descriptor`
    pub fn fits(&self, descriptor: &PlaneDescriptor) -> bool {
        self.format == descriptor.format
            && self.width == descriptor.padded_width()
            && self.height == descriptor.padded_height()
    }

    pub fn storage(&self) -> &TextureStorage {
        &self.storage
    }

    pub fn storage_mut(&mut self) -> &mut TextureStorage {
        &mut self.storage
    }

    /// Contents of a host texture
    pub fn host_bytes(&self) -> Option<&[u8]> {
        match &self.storage {
            TextureStorage::Host(bytes) => Some(bytes),
            TextureStorage::Wgpu(_) => None,
        }
    }

    /// Underlying wgpu texture
    pub fn wgpu_texture(&self) -> Option<&wgpu::Texture> {
        match &self.storage {
            TextureStorage::Wgpu(texture) => Some(texture),
            TextureStorage::Host(_) => None,
        }
    }
}
