//! Render tick, processing stage and playback clock

mod clock;
mod scheduler;
mod stage;

pub use clock::{ManualClock, MonotonicClock, PlaybackClock};
pub use scheduler::{RenderLoop, RenderScheduler, RenderState, TickOutcome};
pub use stage::{PassthroughStage, ProcessingStage, RenderInput};
