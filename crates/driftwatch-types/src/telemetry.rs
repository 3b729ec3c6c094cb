use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Wall-clock cost of one live-loop tick, split by stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TickLatency {
    pub capture_ms: u64,
    pub process_ms: u64,
    pub render_ms: u64,
    pub total_ms: u64,
    pub captured_at: DateTime<Utc>,
}

/// Aggregated live-loop counters.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LoopMetrics {
    pub ticks: u64,
    pub rendered_frames: u64,
    pub capture_failures: u64,
    pub processing_failures: u64,
    pub consecutive_failures: u32,
    pub last_latency: Option<TickLatency>,
}

impl LoopMetrics {
    pub fn record_success(&mut self, latency: TickLatency) {
        self.rendered_frames += 1;
        self.consecutive_failures = 0;
        self.last_latency = Some(latency);
    }

    pub fn record_capture_failure(&mut self) {
        self.capture_failures += 1;
        self.consecutive_failures += 1;
    }
}
