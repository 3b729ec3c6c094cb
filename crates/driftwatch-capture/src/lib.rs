//! Screen capture capability layer: frame sources and the locators they consult.

pub mod locator;
pub mod scrot;

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
    time::Instant,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use driftwatch_types::{
    config::{CaptureConfig, CaptureTarget},
    frame::Frame,
    geometry::{Dimensions, Region},
    DriftwatchError, Result,
};
use tracing::{debug, info};

pub use locator::{
    MonitorLocator, StaticMonitorLocator, StaticWindowLocator, WindowLocator,
    XdotoolWindowLocator, XrandrMonitorLocator,
};
pub use scrot::{BrowserSource, DesktopSource, LeftMonitorSource, Scrot};

/// Capture counters shared by every source.
#[derive(Debug, Default, Clone)]
pub struct CaptureMetrics {
    pub successful_captures: u64,
    pub failed_captures: u64,
    pub last_capture_ms: Option<u64>,
    pub last_captured_at: Option<DateTime<Utc>>,
}

impl CaptureMetrics {
    pub(crate) fn record(&mut self, start: Instant, ok: bool) {
        if ok {
            self.successful_captures += 1;
            self.last_capture_ms = Some(start.elapsed().as_millis() as u64);
            self.last_captured_at = Some(Utc::now());
        } else {
            self.failed_captures += 1;
        }
    }
}

#[async_trait]
pub trait FrameSource: Send + Sync {
    fn target(&self) -> CaptureTarget;

    /// Check that the external tools the source shells out to exist.
    async fn probe(&self) -> Result<()>;

    /// Region the pipeline should run at for this target.
    async fn resolve_region(&self, config: &CaptureConfig) -> Result<Region>;

    /// Capture one still. The frame always has `region`'s dimensions.
    async fn capture(&self, region: Region) -> Result<Frame>;

    fn metrics(&self) -> CaptureMetrics;
}

#[async_trait]
impl<T: FrameSource + ?Sized> FrameSource for Box<T> {
    fn target(&self) -> CaptureTarget {
        (**self).target()
    }

    async fn probe(&self) -> Result<()> {
        (**self).probe().await
    }

    async fn resolve_region(&self, config: &CaptureConfig) -> Result<Region> {
        (**self).resolve_region(config).await
    }

    async fn capture(&self, region: Region) -> Result<Frame> {
        (**self).capture(region).await
    }

    fn metrics(&self) -> CaptureMetrics {
        (**self).metrics()
    }
}

/// Build the scrot-backed source for the configured target.
pub async fn source_for(config: &CaptureConfig) -> Result<Box<dyn FrameSource>> {
    let scrot = Scrot::new(config.scrot_path.as_deref());
    let source: Box<dyn FrameSource> = match config.target {
        CaptureTarget::Desktop => Box::new(DesktopSource::new(scrot)),
        CaptureTarget::LeftMonitor => {
            let locator = XrandrMonitorLocator::new(config.xrandr_path.as_deref());
            Box::new(LeftMonitorSource::detect(scrot, &locator).await)
        }
        CaptureTarget::Browser => {
            let locator = XdotoolWindowLocator::new(
                config.xdotool_path.as_deref(),
                config.browser_pattern.clone(),
                config.focus_settle_ms,
            );
            Box::new(BrowserSource::new(scrot, locator))
        }
    };
    info!(target_kind = ?config.target, "capture source ready");
    Ok(source)
}

/// One scripted capture outcome for [`MockSource`].
#[derive(Debug, Clone)]
pub enum MockCapture {
    Frame(Frame),
    Fail(String),
}

/// Deterministic source replaying a fixed script, used by tests and dry runs.
pub struct MockSource {
    dimensions: Dimensions,
    script: Mutex<VecDeque<MockCapture>>,
    metrics: Arc<Mutex<CaptureMetrics>>,
}

impl MockSource {
    pub fn new(dimensions: Dimensions, script: impl IntoIterator<Item = MockCapture>) -> Self {
        Self {
            dimensions,
            script: Mutex::new(script.into_iter().collect()),
            metrics: Arc::new(Mutex::new(CaptureMetrics::default())),
        }
    }

    pub fn from_frames(dimensions: Dimensions, frames: impl IntoIterator<Item = Frame>) -> Self {
        Self::new(dimensions, frames.into_iter().map(MockCapture::Frame))
    }

    pub fn remaining(&self) -> usize {
        self.script.lock().map(|script| script.len()).unwrap_or(0)
    }
}

#[async_trait]
impl FrameSource for MockSource {
    fn target(&self) -> CaptureTarget {
        CaptureTarget::Desktop
    }

    async fn probe(&self) -> Result<()> {
        Ok(())
    }

    async fn resolve_region(&self, _config: &CaptureConfig) -> Result<Region> {
        Ok(Region::at_origin(self.dimensions))
    }

    async fn capture(&self, region: Region) -> Result<Frame> {
        let start = Instant::now();
        let next = self
            .script
            .lock()
            .map_err(|_| capture_error("mock script lock poisoned"))?
            .pop_front();
        let result = match next {
            Some(MockCapture::Frame(frame)) => {
                debug!("mock capture {}", frame.dimensions());
                Ok(frame.fit_to(region.dimensions()))
            }
            Some(MockCapture::Fail(message)) => Err(capture_error(message)),
            None => Err(capture_error("mock capture script exhausted")),
        };
        if let Ok(mut metrics) = self.metrics.lock() {
            metrics.record(start, result.is_ok());
        }
        result
    }

    fn metrics(&self) -> CaptureMetrics {
        self.metrics.lock().map(|m| m.clone()).unwrap_or_default()
    }
}

/// Generate an error aligned with capture semantics.
pub fn capture_error(message: impl Into<String>) -> DriftwatchError {
    DriftwatchError::Capture(message.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_source_replays_script_then_fails() {
        let dims = Dimensions::new(8, 8);
        let source = MockSource::new(
            dims,
            vec![
                MockCapture::Frame(Frame::solid(Dimensions::new(16, 16), [1, 2, 3])),
                MockCapture::Fail("scrot exited with status 2".into()),
            ],
        );
        let region = source
            .resolve_region(&CaptureConfig::default())
            .await
            .expect("region");

        let frame = source.capture(region).await.expect("first capture");
        assert_eq!(frame.dimensions(), dims);
        let err = source.capture(region).await.expect_err("scripted failure");
        assert!(err.is_transient());
        assert!(source.capture(region).await.is_err());

        let metrics = source.metrics();
        assert_eq!(metrics.successful_captures, 1);
        assert_eq!(metrics.failed_captures, 2);
        assert_eq!(source.remaining(), 0);
    }

    #[tokio::test]
    async fn boxed_source_delegates() {
        let source: Box<dyn FrameSource> = Box::new(MockSource::from_frames(
            Dimensions::new(4, 4),
            [Frame::solid(Dimensions::new(4, 4), [0, 0, 0])],
        ));
        assert_eq!(source.target(), CaptureTarget::Desktop);
        assert!(source.probe().await.is_ok());
        assert!(source.capture(Region::new(0, 0, 4, 4)).await.is_ok());
    }
}
