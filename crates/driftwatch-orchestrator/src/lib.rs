//! Drives the live capture loop and the offline batch comparison.

pub mod batch;
pub mod live;
pub mod stop;

pub use batch::{compare_sequence, BatchComparison, BatchReport, PairScore, SequenceComparison};
pub use live::{CaptureLoop, LoopSettings, LoopState};
pub use stop::{stop_channel, StopHandle, StopSignal};
