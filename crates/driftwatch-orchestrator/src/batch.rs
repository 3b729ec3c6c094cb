use std::path::{Path, PathBuf};

use driftwatch_bus::EventBus;
use driftwatch_capture::FrameSource;
use driftwatch_ops::ArtifactStore;
use driftwatch_types::{
    config::{BatchConfig, CaptureConfig, DriftwatchConfig},
    events::{BatchPairEvent, EventKind, EventPayload, LoopEvent},
    frame::Frame,
    geometry::Region,
    Result,
};
use driftwatch_vision::{lighter, DiffEngine, FrameDiff};
use image::RgbImage;
use serde::Serialize;
use tokio::time::sleep;
use tracing::{info, warn};

/// Pairwise diffs over an ordered frame sequence.
#[derive(Debug, Clone)]
pub struct SequenceComparison {
    pub diffs: Vec<FrameDiff>,
    pub total_difference_score: u64,
    /// Pixel-wise maximum of every difference image; `None` with fewer than
    /// two frames.
    pub composite: Option<RgbImage>,
}

/// Diff every consecutive pair in `frames`. Any failing pair fails the whole
/// comparison.
pub fn compare_sequence(engine: &DiffEngine, frames: &[Frame]) -> Result<SequenceComparison> {
    let diffs = frames
        .windows(2)
        .map(|pair| engine.diff(&pair[0], &pair[1]))
        .collect::<Result<Vec<_>>>()?;
    let total_difference_score = diffs.iter().map(|diff| diff.changed_area).sum();

    let mut composite: Option<RgbImage> = None;
    for diff in &diffs {
        composite = Some(match composite {
            None => diff.difference.clone(),
            // Every diff comes from same-sized frames, so sizes always agree.
            Some(acc) => lighter(&acc, &diff.difference).unwrap_or(acc),
        });
    }

    Ok(SequenceComparison {
        diffs,
        total_difference_score,
        composite,
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct PairScore {
    pub first: PathBuf,
    pub second: PathBuf,
    pub score: u64,
    pub diff_path: PathBuf,
}

/// Everything a finished batch produced.
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub captures: Vec<PathBuf>,
    pub pairs: Vec<PairScore>,
    pub total_difference_score: u64,
    pub composite: Option<PathBuf>,
}

/// Capture a fixed number of stills up front, then compare them offline.
pub struct BatchComparison<S, B>
where
    S: FrameSource,
    B: EventBus,
{
    source: S,
    bus: B,
    capture: CaptureConfig,
    config: BatchConfig,
    engine: DiffEngine,
    store: ArtifactStore,
}

impl<S, B> BatchComparison<S, B>
where
    S: FrameSource,
    B: EventBus,
{
    pub fn new(config: &DriftwatchConfig, source: S, bus: B) -> Self {
        Self {
            source,
            bus,
            engine: DiffEngine::new(config.history.threshold),
            store: ArtifactStore::from_config(&config.batch),
            capture: config.capture.clone(),
            config: config.batch.clone(),
        }
    }

    /// Fail-fast: the first capture, diff or write error aborts the batch.
    pub async fn run(&self) -> Result<BatchReport> {
        self.source.probe().await?;
        let region = self.source.resolve_region(&self.capture).await?;
        self.store.prepare()?;

        let frames = self.capture_sequence(region).await?;
        let captures = frames
            .iter()
            .enumerate()
            .map(|(index, frame)| self.store.save_capture(index, frame))
            .collect::<Result<Vec<_>>>()?;

        info!("Starting pair-wise comparison");
        let comparison = compare_sequence(&self.engine, &frames)?;
        let mut pairs = Vec::with_capacity(comparison.diffs.len());
        for (index, diff) in comparison.diffs.iter().enumerate() {
            let (first, second) = (&captures[index], &captures[index + 1]);
            let diff_path = self.store.save_diff(first, second, &diff.difference)?;
            info!(
                "Comparing {} and {}: score={}",
                display_name(first),
                display_name(second),
                diff.changed_area
            );
            self.publish_pair(first, second, diff.changed_area).await;
            pairs.push(PairScore {
                first: first.clone(),
                second: second.clone(),
                score: diff.changed_area,
                diff_path,
            });
        }

        let composite = match &comparison.composite {
            Some(image) => {
                let path = self.store.save_composite(image)?;
                info!(
                    "Total difference score for the sequence: {}",
                    comparison.total_difference_score
                );
                info!("Composite heatmap of all changes saved to {}", path.display());
                Some(path)
            }
            None => {
                info!("No differences to combine");
                None
            }
        };

        Ok(BatchReport {
            captures,
            pairs,
            total_difference_score: comparison.total_difference_score,
            composite,
        })
    }

    async fn capture_sequence(&self, region: Region) -> Result<Vec<Frame>> {
        let count = self.config.num_images;
        let interval = self.config.capture_interval();
        info!(
            "Starting {:?} capture: {count} images over {} seconds",
            self.source.target(),
            self.config.duration_seconds
        );

        let mut frames = Vec::with_capacity(count);
        for index in 0..count {
            info!("Capturing image {}/{count}", index + 1);
            let frame = self.source.capture(region).await.map_err(|err| {
                warn!("Capture {} failed, aborting batch: {err}", index + 1);
                err
            })?;
            frames.push(frame.fit_to(region.dimensions()));
            if index + 1 < count {
                sleep(interval).await;
            }
        }
        info!("Capture sequence finished");
        Ok(frames)
    }

    async fn publish_pair(&self, first: &Path, second: &Path, score: u64) {
        let event = LoopEvent::new(
            EventKind::Batch,
            EventPayload::Batch(BatchPairEvent {
                first: display_name(first),
                second: display_name(second),
                score,
            }),
        );
        if let Err(err) = self.bus.publish(event).await {
            warn!("event publish failed: {err}");
        }
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
