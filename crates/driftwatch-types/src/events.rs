use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::telemetry::TickLatency;

/// Event bus message kinds emitted by the live loop and batch pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    Lifecycle,
    Tick,
    Failure,
    Batch,
}

/// Immutable event envelope for logging and the status view.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopEvent {
    pub id: Uuid,
    pub kind: EventKind,
    pub timestamp: DateTime<Utc>,
    pub payload: EventPayload,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EventPayload {
    Lifecycle(LifecycleEvent),
    Tick(TickEvent),
    Failure(FailureEvent),
    Batch(BatchPairEvent),
    Unknown(serde_json::Value),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleEvent {
    pub phase: LifecyclePhase,
    pub details: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum LifecyclePhase {
    Boot,
    Running,
    Shutdown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TickEvent {
    pub tick: u64,
    pub frames_held: usize,
    pub masks_held: usize,
    /// Cells set in the composite mask for this tick.
    pub changed_pixels: u64,
    pub latency: TickLatency,
}

/// Pipeline stage a failure was raised in.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Stage {
    Startup,
    Capture,
    Diff,
    Render,
    Stream,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Stage::Startup => "startup",
            Stage::Capture => "capture",
            Stage::Diff => "diff",
            Stage::Render => "render",
            Stage::Stream => "stream",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureEvent {
    pub tick: u64,
    pub stage: Stage,
    pub message: String,
    /// False when the failure stopped the run.
    pub continuing: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchPairEvent {
    pub first: String,
    pub second: String,
    pub score: u64,
}

impl LoopEvent {
    pub fn new(kind: EventKind, payload: EventPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            timestamp: Utc::now(),
            payload,
        }
    }

    pub fn lifecycle(phase: LifecyclePhase, details: impl Into<String>) -> Self {
        Self::new(
            EventKind::Lifecycle,
            EventPayload::Lifecycle(LifecycleEvent {
                phase,
                details: Some(details.into()),
            }),
        )
    }
}
