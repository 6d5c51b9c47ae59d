//! Texture publication to other applications

pub mod texture_share;

pub use texture_share::{ChannelPublisher, LogPublisher, PublishedTexture, Rect, Size, TexturePublisher};
