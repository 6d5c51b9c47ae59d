//! Hap frame sections
//!
//! A Hap sample is one or more sections, each a 4-byte header (24-bit
//! little-endian length + type byte) or an 8-byte header when the 24-bit
//! length is zero (32-bit length follows). The type byte's high nibble names
//! the second-stage compressor, the low nibble the texture format. Hap Q Alpha
//! wraps two sections in a multiple-images container.
//!
//! Plane geometry comes from the headers alone, so decode targets can be
//! allocated before any payload is touched.

use std::ops::Range;
use std::time::Duration;

use bytes::Bytes;

use super::decoder::DxtCodec;
use super::frame::DecodeFrame;
use crate::error::{PipelineError, Result};
use crate::pool::{PixelFormat, PlaneDescriptor};

/// Section type of the container holding several images
const MULTIPLE_IMAGES: u8 = 0x0D;

/// Planes a single sample may carry
pub const MAX_PLANES: usize = 2;

/// Second-stage compressor applied to a section's DXT payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HapCompressor {
    None,
    Snappy,
    /// Chunked payload with decode instructions (not supported)
    Complex,
}

impl HapCompressor {
    fn from_nibble(nibble: u8) -> Option<Self> {
        match nibble {
            0xA => Some(HapCompressor::None),
            0xB => Some(HapCompressor::Snappy),
            0xC => Some(HapCompressor::Complex),
            _ => None,
        }
    }

    fn nibble(&self) -> u8 {
        match self {
            HapCompressor::None => 0xA,
            HapCompressor::Snappy => 0xB,
            HapCompressor::Complex => 0xC,
        }
    }
}

fn format_from_nibble(nibble: u8) -> Option<PixelFormat> {
    match nibble {
        0xB => Some(PixelFormat::Bc1),
        0xE => Some(PixelFormat::Bc3),
        0xF => Some(PixelFormat::Bc3YCoCg),
        0x1 => Some(PixelFormat::Bc4),
        0xC => Some(PixelFormat::Bc7),
        _ => None,
    }
}

fn format_nibble(format: PixelFormat) -> u8 {
    match format {
        PixelFormat::Bc1 => 0xB,
        PixelFormat::Bc3 => 0xE,
        PixelFormat::Bc3YCoCg => 0xF,
        PixelFormat::Bc4 => 0x1,
        PixelFormat::Bc7 => 0xC,
    }
}

/// One image section of a Hap sample
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HapSection {
    pub format: PixelFormat,
    pub compressor: HapCompressor,
    /// Payload byte range within the sample data
    pub payload: Range<usize>,
}

fn unsupported(msg: impl Into<String>) -> PipelineError {
    PipelineError::UnsupportedFormat(msg.into())
}

/// Read one section header at `offset`: (type byte, payload range)
fn read_header(data: &[u8], offset: usize) -> Result<(u8, Range<usize>)> {
    let header = data
        .get(offset..offset + 4)
        .ok_or_else(|| unsupported("truncated section header"))?;
    let short_len = u32::from_le_bytes([header[0], header[1], header[2], 0]) as usize;
    let section_type = header[3];

    let (len, start) = if short_len == 0 {
        let long = data
            .get(offset + 4..offset + 8)
            .ok_or_else(|| unsupported("truncated long section header"))?;
        let len = u32::from_le_bytes([long[0], long[1], long[2], long[3]]) as usize;
        (len, offset + 8)
    } else {
        (short_len, offset + 4)
    };

    let end = start
        .checked_add(len)
        .filter(|end| *end <= data.len())
        .ok_or_else(|| unsupported("section length exceeds sample size"))?;

    Ok((section_type, start..end))
}

fn image_section(section_type: u8, payload: Range<usize>) -> Result<HapSection> {
    let compressor = HapCompressor::from_nibble(section_type >> 4)
        .ok_or_else(|| unsupported(format!("unknown compressor in section type {:#04x}", section_type)))?;
    if compressor == HapCompressor::Complex {
        return Err(unsupported("chunked (complex) Hap sections are not supported"));
    }
    let format = format_from_nibble(section_type & 0x0F)
        .ok_or_else(|| unsupported(format!("unknown texture format in section type {:#04x}", section_type)))?;

    Ok(HapSection {
        format,
        compressor,
        payload,
    })
}

/// Parse the image sections of a Hap sample
pub fn parse_sections(data: &[u8]) -> Result<Vec<HapSection>> {
    let (section_type, payload) = read_header(data, 0)?;

    if section_type != MULTIPLE_IMAGES {
        return Ok(vec![image_section(section_type, payload)?]);
    }

    let mut sections = Vec::with_capacity(MAX_PLANES);
    let mut offset = payload.start;
    while offset < payload.end {
        let (sub_type, sub_payload) = read_header(&data[..payload.end], offset)?;
        offset = sub_payload.end;
        sections.push(image_section(sub_type, sub_payload)?);
    }

    if sections.is_empty() || sections.len() > MAX_PLANES {
        return Err(unsupported(format!(
            "multiple-images container holds {} sections",
            sections.len()
        )));
    }
    Ok(sections)
}

fn write_header(out: &mut Vec<u8>, section_type: u8, len: usize) {
    if len > 0 && len <= 0x00FF_FFFF {
        out.extend_from_slice(&(len as u32).to_le_bytes()[..3]);
        out.push(section_type);
    } else {
        out.extend_from_slice(&[0, 0, 0, section_type]);
        out.extend_from_slice(&(len as u32).to_le_bytes());
    }
}

fn encode_section(out: &mut Vec<u8>, format: PixelFormat, compressor: HapCompressor, dxt: &[u8]) -> Result<()> {
    let section_type = (compressor.nibble() << 4) | format_nibble(format);
    match compressor {
        HapCompressor::None => {
            write_header(out, section_type, dxt.len());
            out.extend_from_slice(dxt);
        }
        HapCompressor::Snappy => {
            let compressed = snap::raw::Encoder::new()
                .compress_vec(dxt)
                .map_err(|e| PipelineError::DecodeFailed(format!("Snappy compression failed: {}", e)))?;
            write_header(out, section_type, compressed.len());
            out.extend_from_slice(&compressed);
        }
        HapCompressor::Complex => {
            return Err(unsupported("cannot encode complex sections"));
        }
    }
    Ok(())
}

/// Encode DXT planes into a Hap sample payload
///
/// A single plane becomes one section; two planes are wrapped in a
/// multiple-images container.
pub fn encode_frame(planes: &[(PixelFormat, &[u8])], compressor: HapCompressor) -> Result<Bytes> {
    match planes {
        [(format, dxt)] => {
            let mut out = Vec::with_capacity(dxt.len() + 8);
            encode_section(&mut out, *format, compressor, dxt)?;
            Ok(Bytes::from(out))
        }
        [_, _] => {
            let mut inner = Vec::new();
            for (format, dxt) in planes {
                encode_section(&mut inner, *format, compressor, dxt)?;
            }
            let mut out = Vec::with_capacity(inner.len() + 8);
            write_header(&mut out, MULTIPLE_IMAGES, inner.len());
            out.extend_from_slice(&inner);
            Ok(Bytes::from(out))
        }
        _ => Err(unsupported(format!("cannot encode {} planes", planes.len()))),
    }
}

/// A compressed Hap sample with its presentation time
#[derive(Debug, Clone)]
pub struct HapSample {
    /// Presentation timestamp
    pub pts: Duration,
    /// Frame index (0-based)
    pub frame_index: u64,
    /// Frame width in pixels
    pub width: u32,
    /// Frame height in pixels
    pub height: u32,
    /// Encoded section data
    pub data: Bytes,
}

impl HapSample {
    pub fn new(pts: Duration, frame_index: u64, width: u32, height: u32, data: Bytes) -> Self {
        Self {
            pts,
            frame_index,
            width,
            height,
            data,
        }
    }

    /// One descriptor per plane declared by the section headers
    pub fn plane_descriptors(&self) -> Result<Vec<PlaneDescriptor>> {
        parse_sections(&self.data)?
            .iter()
            .map(|section| PlaneDescriptor::new(self.width, self.height, section.format))
            .collect()
    }

    /// Generate a BC1 gradient sample, optionally Snappy-compressed
    pub fn test_pattern(width: u32, height: u32, pts: Duration, frame_index: u64, snappy: bool) -> Result<Self> {
        let dxt = test_pattern_bc1(width, height, frame_index);
        let compressor = if snappy {
            HapCompressor::Snappy
        } else {
            HapCompressor::None
        };
        let data = encode_frame(&[(PixelFormat::Bc1, &dxt)], compressor)?;
        Ok(Self::new(pts, frame_index, width, height, data))
    }

    /// Uncompressed BC1 sample whose every byte is `fill`
    pub fn solid(width: u32, height: u32, pts: Duration, frame_index: u64, fill: u8) -> Result<Self> {
        let desc = PlaneDescriptor::new(width, height, PixelFormat::Bc1)?;
        let dxt = vec![fill; desc.byte_len()];
        let data = encode_frame(&[(PixelFormat::Bc1, &dxt)], HapCompressor::None)?;
        Ok(Self::new(pts, frame_index, width, height, data))
    }
}

/// BC1 block: two RGB565 endpoints and 2-bit indices
#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct Bc1Block {
    color0: u16,
    color1: u16,
    indices: u32,
}

/// Encode RGB to RGB565 format
fn encode_rgb565(r: u8, g: u8, b: u8) -> u16 {
    let r5 = (r as u16 >> 3) & 0x1F;
    let g6 = (g as u16 >> 2) & 0x3F;
    let b5 = (b as u16 >> 3) & 0x1F;
    (r5 << 11) | (g6 << 5) | b5
}

/// Gradient test pattern in BC1 blocks; blue channel animates with the frame
pub fn test_pattern_bc1(width: u32, height: u32, frame_index: u64) -> Vec<u8> {
    let blocks_wide = width.div_ceil(4).max(1) as usize;
    let blocks_high = height.div_ceil(4).max(1) as usize;
    let b = ((frame_index as f32 / 60.0).sin() * 127.0 + 128.0) as u8;

    let blocks: Vec<Bc1Block> = (0..blocks_high)
        .flat_map(|by| (0..blocks_wide).map(move |bx| (bx, by)))
        .map(|(bx, by)| {
            let r = ((bx as f32 / blocks_wide as f32) * 255.0) as u8;
            let g = ((by as f32 / blocks_high as f32) * 255.0) as u8;
            Bc1Block {
                color0: encode_rgb565(r, g, b),
                color1: encode_rgb565(r / 2, g / 2, b / 2),
                // All pixels use color0
                indices: 0,
            }
        })
        .collect();

    bytemuck::cast_slice(&blocks).to_vec()
}

/// Unwraps Hap sections into the frame's plane memory
///
/// DXT blocks are left compressed; the GPU samples them directly.
#[derive(Debug, Default)]
pub struct HapCodec {
    decoded_bytes: u64,
}

impl HapCodec {
    pub fn new() -> Self {
        Self::default()
    }

    /// DXT bytes written into frame planes so far
    pub fn decoded_bytes(&self) -> u64 {
        self.decoded_bytes
    }
}

impl DxtCodec for HapCodec {
    fn decode(&mut self, sample: &HapSample, frame: &mut DecodeFrame) -> Result<()> {
        let sections = parse_sections(&sample.data)?;
        if sections.len() != frame.plane_count() {
            return Err(PipelineError::DecodeFailed(format!(
                "sample has {} sections but frame has {} planes",
                sections.len(),
                frame.plane_count()
            )));
        }

        for (section, plane) in sections.iter().zip(frame.planes_mut()) {
            let payload = &sample.data[section.payload.clone()];
            let dxt_size = plane.dxt_size();
            let mut dest = plane.write();
            let dest = &mut dest[..dxt_size];

            match section.compressor {
                HapCompressor::None => {
                    if payload.len() != dxt_size {
                        return Err(PipelineError::DecodeFailed(format!(
                            "plane expects {} bytes, section holds {}",
                            dxt_size,
                            payload.len()
                        )));
                    }
                    dest.copy_from_slice(payload);
                }
                HapCompressor::Snappy => {
                    let len = snap::raw::decompress_len(payload)
                        .map_err(|e| PipelineError::DecodeFailed(format!("Snappy header invalid: {}", e)))?;
                    if len != dxt_size {
                        return Err(PipelineError::DecodeFailed(format!(
                            "plane expects {} bytes, section decompresses to {}",
                            dxt_size, len
                        )));
                    }
                    // Decompress straight into pooled memory
                    snap::raw::Decoder::new()
                        .decompress(payload, dest)
                        .map_err(|e| PipelineError::DecodeFailed(format!("Snappy decompression failed: {}", e)))?;
                }
                HapCompressor::Complex => {
                    return Err(unsupported("chunked (complex) Hap sections are not supported"));
                }
            }
            self.decoded_bytes += dxt_size as u64;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{BufferPool, PoolConfig};
    use crate::video::FrameAllocator;

    fn allocator() -> FrameAllocator {
        FrameAllocator::new(BufferPool::new(PoolConfig::default()))
    }

    #[test]
    fn test_short_and_long_headers() {
        let mut short = Vec::new();
        write_header(&mut short, 0xAB, 16);
        assert_eq!(short, vec![16, 0, 0, 0xAB]);

        let mut long = Vec::new();
        write_header(&mut long, 0xAB, 0x0100_0000);
        assert_eq!(long, vec![0, 0, 0, 0xAB, 0, 0, 0, 1]);
    }

    #[test]
    fn test_single_section_descriptor() {
        let sample = HapSample::test_pattern(512, 512, Duration::ZERO, 0, false).unwrap();
        let planes = sample.plane_descriptors().unwrap();
        assert_eq!(planes.len(), 1);
        assert_eq!(planes[0].format, PixelFormat::Bc1);
        assert_eq!(planes[0].byte_len(), 128 * 128 * 8);
    }

    #[test]
    fn test_multiple_images_container() {
        let color = vec![1u8; PlaneDescriptor::new(16, 16, PixelFormat::Bc3YCoCg).unwrap().byte_len()];
        let alpha = vec![2u8; PlaneDescriptor::new(16, 16, PixelFormat::Bc4).unwrap().byte_len()];
        let data = encode_frame(
            &[(PixelFormat::Bc3YCoCg, &color), (PixelFormat::Bc4, &alpha)],
            HapCompressor::Snappy,
        )
        .unwrap();

        let sections = parse_sections(&data).unwrap();
        assert_eq!(sections.len(), 2);
        assert_eq!(sections[0].format, PixelFormat::Bc3YCoCg);
        assert_eq!(sections[1].format, PixelFormat::Bc4);
        assert!(sections.iter().all(|s| s.compressor == HapCompressor::Snappy));
    }

    #[test]
    fn test_truncated_sample_is_unsupported() {
        let sample = HapSample::new(Duration::ZERO, 0, 16, 16, Bytes::from_static(&[0x10, 0x00]));
        assert!(matches!(
            sample.plane_descriptors(),
            Err(PipelineError::UnsupportedFormat(_))
        ));

        // Declared length runs past the end of the data
        let sample = HapSample::new(Duration::ZERO, 0, 16, 16, Bytes::from_static(&[0x40, 0, 0, 0xAB, 1, 2]));
        assert!(matches!(
            sample.plane_descriptors(),
            Err(PipelineError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_unknown_format_and_complex_rejected() {
        let unknown = Bytes::from_static(&[0x01, 0, 0, 0xA7, 0]);
        assert!(parse_sections(&unknown).is_err());

        let complex = Bytes::from_static(&[0x01, 0, 0, 0xCB, 0]);
        assert!(matches!(
            parse_sections(&complex),
            Err(PipelineError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_codec_fills_planes_from_snappy() {
        let sample = HapSample::test_pattern(64, 32, Duration::ZERO, 3, true).unwrap();
        let mut frame = allocator().make_empty_frame(&sample).unwrap();
        HapCodec::new().decode(&sample, &mut frame).unwrap();

        let expected = test_pattern_bc1(64, 32, 3);
        assert_eq!(frame.planes()[0].lease().to_vec(), expected);
    }

    #[test]
    fn test_codec_rejects_short_payload() {
        let desc = PlaneDescriptor::new(16, 16, PixelFormat::Bc1).unwrap();
        let dxt = vec![0u8; desc.byte_len()];
        let sample = HapSample::new(
            Duration::ZERO,
            0,
            16,
            16,
            encode_frame(&[(PixelFormat::Bc1, &dxt)], HapCompressor::None).unwrap(),
        );
        let mut frame = allocator().make_empty_frame(&sample).unwrap();

        let lying = HapSample::new(Duration::ZERO, 0, 16, 16, encode_frame(&[(PixelFormat::Bc1, &dxt[..64])], HapCompressor::None).unwrap());
        assert!(matches!(
            HapCodec::new().decode(&lying, &mut frame),
            Err(PipelineError::DecodeFailed(_))
        ));
    }

    #[test]
    fn test_pattern_size() {
        assert_eq!(test_pattern_bc1(1920, 1080, 0).len(), 480 * 270 * 8);
    }
}
