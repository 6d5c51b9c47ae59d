//! Plane geometry for block-compressed texture data
//!
//! All supported formats encode 4x4 pixel blocks, so a plane's byte layout is
//! fully determined by its pixel size and the bytes per block.

use crate::error::{PipelineError, Result};

/// Edge length of a compressed block in pixels
pub const BLOCK_DIM: u32 = 4;

/// Block-compressed pixel formats a plane can hold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    /// DXT1/BC1 - RGB, no alpha
    Bc1,
    /// DXT5/BC3 - RGBA
    Bc3,
    /// Scaled YCoCg stored in DXT5/BC3 blocks
    Bc3YCoCg,
    /// RGTC1/BC4 - single channel (alpha plane)
    Bc4,
    /// BPTC/BC7 - high quality RGBA
    Bc7,
}

impl PixelFormat {
    /// Bytes per 4x4 block
    pub fn block_bytes(&self) -> usize {
        match self {
            PixelFormat::Bc1 | PixelFormat::Bc4 => 8,
            PixelFormat::Bc3 | PixelFormat::Bc3YCoCg | PixelFormat::Bc7 => 16,
        }
    }

    /// Get the wgpu texture format for this plane format
    pub fn texture_format(&self) -> wgpu::TextureFormat {
        match self {
            PixelFormat::Bc1 => wgpu::TextureFormat::Bc1RgbaUnorm,
            PixelFormat::Bc3 | PixelFormat::Bc3YCoCg => wgpu::TextureFormat::Bc3RgbaUnorm,
            PixelFormat::Bc4 => wgpu::TextureFormat::Bc4RUnorm,
            PixelFormat::Bc7 => wgpu::TextureFormat::Bc7RgbaUnorm,
        }
    }
}

/// Geometry of one codec plane
///
/// Immutable once derived; two descriptors are interchangeable for pooling
/// when [`PlaneDescriptor::is_compatible`] holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PlaneDescriptor {
    /// Image width in pixels
    pub width: u32,
    /// Image height in pixels
    pub height: u32,
    /// Bytes per row of blocks
    pub bytes_per_row: usize,
    /// Pixel format tag
    pub format: PixelFormat,
    /// Bytes per compressed block
    pub block_bytes: usize,
    byte_len: usize,
}

impl PlaneDescriptor {
    /// Derive the descriptor for a `width` x `height` plane of `format`
    pub fn new(width: u32, height: u32, format: PixelFormat) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(PipelineError::UnsupportedFormat(format!(
                "empty plane geometry {}x{}",
                width, height
            )));
        }

        let oversized = || {
            PipelineError::UnsupportedFormat(format!(
                "plane geometry {}x{} {:?} exceeds addressable size",
                width, height, format
            ))
        };

        // Padded extents must stay representable as texture dimensions
        let blocks_wide = width.div_ceil(BLOCK_DIM);
        let blocks_high = height.div_ceil(BLOCK_DIM);
        blocks_wide.checked_mul(BLOCK_DIM).ok_or_else(oversized)?;
        blocks_high.checked_mul(BLOCK_DIM).ok_or_else(oversized)?;

        let block_bytes = format.block_bytes();
        let bytes_per_row = (blocks_wide as usize)
            .checked_mul(block_bytes)
            .ok_or_else(oversized)?;
        let byte_len = bytes_per_row
            .checked_mul(blocks_high as usize)
            .ok_or_else(oversized)?;

        Ok(Self {
            width,
            height,
            bytes_per_row,
            format,
            block_bytes,
            byte_len,
        })
    }

    pub fn blocks_wide(&self) -> u32 {
        self.width.div_ceil(BLOCK_DIM)
    }

    pub fn blocks_high(&self) -> u32 {
        self.height.div_ceil(BLOCK_DIM)
    }

    /// Width rounded up to whole blocks; GPU textures are created at this size
    pub fn padded_width(&self) -> u32 {
        self.blocks_wide() * BLOCK_DIM
    }

    /// Height rounded up to whole blocks
    pub fn padded_height(&self) -> u32 {
        self.blocks_high() * BLOCK_DIM
    }

    /// Total bytes of compressed data for this plane
    pub fn byte_len(&self) -> usize {
        self.byte_len
    }

    /// Same format and block extent, hence same byte size and row layout
    pub fn is_compatible(&self, other: &PlaneDescriptor) -> bool {
        self.format == other.format
            && self.blocks_wide() == other.blocks_wide()
            && self.blocks_high() == other.blocks_high()
    }
}
