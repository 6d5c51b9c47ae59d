//! wgpu backend: BC planes uploaded straight into compressed textures
//!
//! The DXT data is never decompressed on the CPU; `write_texture` stages the
//! plane bytes and the following submit schedules the transfer to VRAM.

use super::context::{GpuBackend, GpuError};
use super::texture::{GpuTexture, TextureId, TextureStorage, TextureTarget};
use crate::pool::PlaneDescriptor;

pub struct WgpuBackend {
    device: wgpu::Device,
    queue: wgpu::Queue,
}

impl WgpuBackend {
    /// Wrap an existing device; it must have BC texture compression enabled
    pub fn new(device: wgpu::Device, queue: wgpu::Queue) -> Result<Self, GpuError> {
        if !device
            .features()
            .contains(wgpu::Features::TEXTURE_COMPRESSION_BC)
        {
            return Err(GpuError::Unsupported(
                "BC texture compression not enabled on device".to_string(),
            ));
        }
        Ok(Self { device, queue })
    }

    /// Create a headless device (no window or surface needed)
    pub fn new_headless() -> Result<Self, GpuError> {
        pollster::block_on(async {
            let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
                backends: wgpu::Backends::all(),
                ..Default::default()
            });

            let adapter = instance
                .request_adapter(&wgpu::RequestAdapterOptions {
                    power_preference: wgpu::PowerPreference::HighPerformance,
                    compatible_surface: None,
                    force_fallback_adapter: false,
                })
                .await
                .ok_or_else(|| GpuError::Unsupported("no GPU adapter found".to_string()))?;

            tracing::info!("Using GPU: {}", adapter.get_info().name);
            tracing::info!("Backend: {:?}", adapter.get_info().backend);

            if !adapter
                .features()
                .contains(wgpu::Features::TEXTURE_COMPRESSION_BC)
            {
                return Err(GpuError::Unsupported(
                    "BC texture compression not available".to_string(),
                ));
            }

            let (device, queue) = adapter
                .request_device(
                    &wgpu::DeviceDescriptor {
                        label: Some("Hap Relay Device"),
                        required_features: wgpu::Features::TEXTURE_COMPRESSION_BC,
                        required_limits: adapter.limits(),
                        memory_hints: wgpu::MemoryHints::Performance,
                    },
                    None,
                )
                .await
                .map_err(|e| GpuError::Unsupported(e.to_string()))?;

            Self::new(device, queue)
        })
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }
}

impl GpuBackend for WgpuBackend {
    fn name(&self) -> &'static str {
        "wgpu"
    }

    fn create_texture(
        &mut self,
        id: TextureId,
        descriptor: &PlaneDescriptor,
    ) -> Result<GpuTexture, GpuError> {
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Hap Plane Texture"),
            size: wgpu::Extent3d {
                width: descriptor.padded_width(),
                height: descriptor.padded_height(),
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: descriptor.format.texture_format(),
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });

        Ok(GpuTexture::new(
            id,
            TextureTarget::Texture2D,
            descriptor,
            TextureStorage::Wgpu(texture),
        ))
    }

    fn upload(
        &mut self,
        texture: &mut GpuTexture,
        descriptor: &PlaneDescriptor,
        data: &[u8],
    ) -> Result<(), GpuError> {
        if data.len() != descriptor.byte_len() {
            return Err(GpuError::SizeMismatch {
                expected: descriptor.byte_len(),
                actual: data.len(),
            });
        }

        let id = texture.id();
        let Some(raw) = texture.wgpu_texture() else {
            return Err(GpuError::ForeignTexture(id));
        };

        self.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: raw,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            data,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(descriptor.bytes_per_row as u32),
                rows_per_image: Some(descriptor.blocks_high()),
            },
            wgpu::Extent3d {
                width: descriptor.padded_width(),
                height: descriptor.padded_height(),
                depth_or_array_layers: 1,
            },
        );
        self.queue.submit(std::iter::empty());

        Ok(())
    }
}
