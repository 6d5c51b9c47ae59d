//! System-memory GPU backend
//!
//! Textures are plain byte vectors. Used for headless runs and tests, where
//! published texture contents can be inspected directly.

use super::context::{GpuBackend, GpuError};
use super::texture::{GpuTexture, TextureId, TextureStorage, TextureTarget};
use crate::pool::PlaneDescriptor;

#[derive(Debug, Default)]
pub struct HostBackend {
    target: TextureTarget,
}

impl HostBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report created textures under `target`
    pub fn with_target(target: TextureTarget) -> Self {
        Self { target }
    }
}

impl GpuBackend for HostBackend {
    fn name(&self) -> &'static str {
        "host"
    }

    fn create_texture(
        &mut self,
        id: TextureId,
        descriptor: &PlaneDescriptor,
    ) -> Result<GpuTexture, GpuError> {
        let mut bytes = Vec::new();
        bytes
            .try_reserve_exact(descriptor.byte_len())
            .map_err(|e| GpuError::TextureCreation(e.to_string()))?;
        bytes.resize(descriptor.byte_len(), 0);

        Ok(GpuTexture::new(
            id,
            self.target,
            descriptor,
            TextureStorage::Host(bytes),
        ))
    }

    fn upload(
        &mut self,
        texture: &mut GpuTexture,
        _descriptor: &PlaneDescriptor,
        data: &[u8],
    ) -> Result<(), GpuError> {
        let id = texture.id();
        let TextureStorage::Host(bytes) = texture.storage_mut() else {
            return Err(GpuError::ForeignTexture(id));
        };

        if bytes.len() != data.len() {
            return Err(GpuError::SizeMismatch {
                expected: bytes.len(),
                actual: data.len(),
            });
        }

        bytes.copy_from_slice(data);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::PixelFormat;

    #[test]
    fn test_upload_copies_bytes() {
        let mut backend = HostBackend::new();
        let desc = PlaneDescriptor::new(8, 4, PixelFormat::Bc1).unwrap();
        let mut texture = backend.create_texture(TextureId(1), &desc).unwrap();
        assert_eq!(texture.host_bytes().unwrap(), &[0u8; 16][..]);

        backend.upload(&mut texture, &desc, &[7u8; 16]).unwrap();
        assert_eq!(texture.host_bytes().unwrap(), &[7u8; 16][..]);
    }

    #[test]
    fn test_upload_rejects_wrong_size() {
        let mut backend = HostBackend::new();
        let desc = PlaneDescriptor::new(8, 4, PixelFormat::Bc1).unwrap();
        let mut texture = backend.create_texture(TextureId(1), &desc).unwrap();
        assert_eq!(
            backend.upload(&mut texture, &desc, &[0u8; 8]),
            Err(GpuError::SizeMismatch {
                expected: 16,
                actual: 8
            })
        );
    }
}
