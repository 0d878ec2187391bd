#![doc = include_str!("../README.md")]

pub mod chain;
pub mod metrics;
pub mod pacing;
pub mod raw_io;
pub mod stream;
pub mod tier;
pub mod unit;

pub use chain::{Dispatch, TierChain, TierSelection};
pub use metrics::{UnitMetrics, UnitMetricsSnapshot};
pub use pacing::{RateGovernor, RunMetrics, THROUGHPUT_WINDOW, pace};
pub use raw_io::{RawFrameSink, RawFrameSource};
pub use stream::{StreamConfig, StreamReport, run_stream};
pub use tier::{ExecutionTier, InterpolationTier, TierFailure, TierKind};
pub use unit::{Processed, Status, SuperResolutionUnit};
