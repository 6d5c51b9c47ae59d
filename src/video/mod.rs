//! Hap decode path
//!
//! Samples are parsed for plane geometry, given pooled decode targets, filled
//! by the codec and committed to GPU textures before they are queued for the
//! render tick.

mod allocator;
mod decoder;
mod frame;
pub mod hap;
mod queue;
mod upload;

pub use allocator::FrameAllocator;
pub use decoder::{DecodeStage, DecodeWorker, DxtCodec, SampleList, SampleSource, TestPatternSource};
pub use frame::{DecodeFrame, PlaneTarget, ReadyFrame};
pub use hap::{HapCodec, HapCompressor, HapSample};
pub use queue::{DecodedFrameQueue, FrameSource};
pub use upload::UploadSynchronizer;
