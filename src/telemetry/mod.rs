//! Logging and pipeline metrics

pub mod logging;
pub mod metrics;

pub use logging::{init_logging, LogConfig, LogGuard};
pub use metrics::{CounterSnapshot, FrameProfiler, FrameStats, PipelineCounters};
