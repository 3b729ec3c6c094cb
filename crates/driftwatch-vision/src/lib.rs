//! Frame-diff pipeline: rolling buffers, change masks, heatmap and dashboard.

pub mod dashboard;
pub mod diff;
pub mod heatmap;
pub mod ring;

pub use dashboard::DashboardComposer;
pub use diff::{DiffEngine, FrameDiff, DEFAULT_THRESHOLD};
pub use heatmap::{lighter, HeatmapAccumulator};
pub use ring::RingBuffer;
