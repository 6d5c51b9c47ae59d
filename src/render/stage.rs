//! Processing stage between the decoded texture and the published one

use std::time::Duration;

use crate::gpu::{GpuContextGuard, GpuTexture};
use crate::network::{PublishedTexture, Rect, Size};
use crate::pool::PlaneDescriptor;

/// What a stage gets to work with on each tick
pub struct RenderInput<'a> {
    pub texture: &'a GpuTexture,
    /// Shape of the image inside `texture`
    pub descriptor: &'a PlaneDescriptor,
    pub pts: Duration,
}

/// Turns the current frame's texture into the texture to publish
///
/// Called with the GPU context held. Returning `None` means nothing can be
/// published this tick.
pub trait ProcessingStage: Send {
    fn render(
        &mut self,
        gpu: &mut GpuContextGuard<'_>,
        input: &RenderInput<'_>,
        output: Size,
    ) -> Option<PublishedTexture>;
}

/// Publishes the decoded texture as-is, cropped to the output size
#[derive(Debug, Clone, Default)]
pub struct PassthroughStage {
    flipped: bool,
}

impl PassthroughStage {
    pub fn new(flipped: bool) -> Self {
        Self { flipped }
    }
}

impl ProcessingStage for PassthroughStage {
    fn render(
        &mut self,
        _gpu: &mut GpuContextGuard<'_>,
        input: &RenderInput<'_>,
        output: Size,
    ) -> Option<PublishedTexture> {
        let region = Rect::from_size(Size::new(
            output.width.min(input.descriptor.width),
            output.height.min(input.descriptor.height),
        ));
        if region.width == 0 || region.height == 0 {
            return None;
        }

        Some(PublishedTexture {
            texture: input.texture.id(),
            target: input.texture.target(),
            region,
            dimensions: Size::new(input.texture.width(), input.texture.height()),
            flipped: self.flipped,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::{GpuContextHandle, HostBackend, TextureTarget};
    use crate::pool::PixelFormat;

    fn render(stage: &mut PassthroughStage, width: u32, height: u32, output: Size) -> Option<PublishedTexture> {
        let gpu = GpuContextHandle::new(HostBackend::with_target(TextureTarget::Rectangle));
        let mut guard = gpu.lock().unwrap();
        let desc = PlaneDescriptor::new(width, height, PixelFormat::Bc1).unwrap();
        let texture = guard.create_texture(&desc).unwrap();
        let input = RenderInput {
            texture: &texture,
            descriptor: &desc,
            pts: Duration::ZERO,
        };
        stage.render(&mut guard, &input, output)
    }

    #[test]
    fn test_passthrough_full_frame() {
        let mut stage = PassthroughStage::new(true);
        let out = render(&mut stage, 512, 512, Size::new(512, 512)).unwrap();
        assert_eq!(out.region, Rect::from_size(Size::new(512, 512)));
        assert_eq!(out.dimensions, Size::new(512, 512));
        assert_eq!(out.target, TextureTarget::Rectangle);
        assert!(out.flipped);
    }

    #[test]
    fn test_passthrough_crops_to_output() {
        let mut stage = PassthroughStage::new(false);
        let out = render(&mut stage, 1918, 1078, Size::new(640, 360)).unwrap();
        assert_eq!(out.region.size(), Size::new(640, 360));
        // Texture is block-padded
        assert_eq!(out.dimensions, Size::new(1920, 1080));
        assert!(!out.flipped);
    }

    #[test]
    fn test_zero_output_is_unavailable() {
        let mut stage = PassthroughStage::default();
        assert!(render(&mut stage, 64, 64, Size::new(0, 360)).is_none());
    }
}
