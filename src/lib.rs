//! Immersive Hap Relay
//!
//! Decodes Hap (DXT-compressed) video straight into pooled CPU/GPU buffers,
//! commits each frame to the GPU under a shared context lock and republishes
//! the current frame's texture on a fixed-rate render tick.

pub mod error;
pub mod gpu;
pub mod network;
pub mod pipeline;
pub mod pool;
pub mod render;
pub mod settings;
pub mod telemetry;
pub mod video;

pub use error::{PipelineError, Result};
pub use gpu::{GpuBackend, GpuContextHandle, HostBackend, WgpuBackend};
pub use network::{ChannelPublisher, LogPublisher, PublishedTexture, TexturePublisher};
pub use pipeline::{Pipeline, PipelineStats};
pub use pool::{BufferLease, BufferPool, PixelFormat, PlaneDescriptor, PoolConfig};
pub use render::{MonotonicClock, PassthroughStage, RenderScheduler, TickOutcome};
pub use settings::RelaySettings;
pub use video::{FrameAllocator, HapCodec, HapSample, ReadyFrame, UploadSynchronizer};
