//! Inter-process texture publication
//!
//! A publisher hands a rendered texture's identity and geometry to whatever
//! sharing mechanism is behind it. Receivers are never waited on.

use crossbeam_channel::{Receiver, Sender, TrySendError};

use crate::gpu::{TextureId, TextureTarget};

/// Pixel rectangle within a texture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub fn from_size(size: Size) -> Self {
        Self {
            x: 0,
            y: 0,
            width: size.width,
            height: size.height,
        }
    }

    pub fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

/// Everything a receiver needs to sample a shared texture
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishedTexture {
    pub texture: TextureId,
    pub target: TextureTarget,
    /// Region holding the image
    pub region: Rect,
    /// Full texture dimensions
    pub dimensions: Size,
    /// Image rows run bottom-up
    pub flipped: bool,
}

/// Platform-agnostic texture sharing interface.
pub trait TexturePublisher: Send {
    /// Start sharing under `name`, visible to receivers browsing for sources.
    fn start(&mut self, name: &str) -> Result<(), String>;

    /// Publish one rendered frame. Must be called with the GPU context held.
    fn publish(&mut self, texture: &PublishedTexture) -> Result<(), String>;

    /// Stop sharing and release resources.
    fn stop(&mut self);

    /// Technology name for logs.
    fn technology_name(&self) -> &'static str;

    fn is_active(&self) -> bool;
}

/// Publishes into the log at debug level
#[derive(Debug, Default)]
pub struct LogPublisher {
    name: Option<String>,
    published: u64,
}

impl LogPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn published(&self) -> u64 {
        self.published
    }
}

impl TexturePublisher for LogPublisher {
    fn start(&mut self, name: &str) -> Result<(), String> {
        tracing::info!("LogPublisher: serving '{}'", name);
        self.name = Some(name.to_string());
        Ok(())
    }

    fn publish(&mut self, texture: &PublishedTexture) -> Result<(), String> {
        let Some(name) = &self.name else {
            return Err("publisher not started".to_string());
        };
        self.published += 1;
        tracing::debug!(
            server = %name,
            texture = %texture.texture,
            width = texture.region.width,
            height = texture.region.height,
            flipped = texture.flipped,
            "Published frame"
        );
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(name) = self.name.take() {
            tracing::info!("LogPublisher: stopped '{}' after {} frames", name, self.published);
        }
    }

    fn technology_name(&self) -> &'static str {
        "Log"
    }

    fn is_active(&self) -> bool {
        self.name.is_some()
    }
}

/// Forwards published textures to an in-process receiver
///
/// Uses a bounded channel; when the receiver falls behind, new frames are
/// dropped rather than blocking the render tick.
#[derive(Debug)]
pub struct ChannelPublisher {
    tx: Sender<PublishedTexture>,
    active: bool,
    dropped: u64,
}

impl ChannelPublisher {
    pub fn new(capacity: usize) -> (Self, Receiver<PublishedTexture>) {
        let (tx, rx) = crossbeam_channel::bounded(capacity.max(1));
        (
            Self {
                tx,
                active: false,
                dropped: 0,
            },
            rx,
        )
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

impl TexturePublisher for ChannelPublisher {
    fn start(&mut self, _name: &str) -> Result<(), String> {
        self.active = true;
        Ok(())
    }

    fn publish(&mut self, texture: &PublishedTexture) -> Result<(), String> {
        if !self.active {
            return Err("publisher not started".to_string());
        }
        match self.tx.try_send(*texture) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                self.dropped += 1;
                Ok(())
            }
            Err(TrySendError::Disconnected(_)) => {
                self.active = false;
                Err("receiver disconnected".to_string())
            }
        }
    }

    fn stop(&mut self) {
        self.active = false;
    }

    fn technology_name(&self) -> &'static str {
        "Channel"
    }

    fn is_active(&self) -> bool {
        self.active
    }
}
