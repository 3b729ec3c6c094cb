use std::{
    path::PathBuf,
    sync::{Arc, Mutex},
    time::Instant,
};

use async_trait::async_trait;
use driftwatch_types::{
    config::{CaptureConfig, CaptureTarget},
    frame::Frame,
    geometry::{Dimensions, Region},
    DriftwatchError, Result,
};
use image::{imageops, ImageFormat, RgbImage};
use tokio::process::Command;
use uuid::Uuid;

use crate::{
    capture_error,
    locator::{MonitorLocator, WindowLocator},
    CaptureMetrics, FrameSource,
};

const DEFAULT_SCROT: &str = "scrot";

/// Thin wrapper over the `scrot` screenshot utility.
#[derive(Debug, Clone)]
pub struct Scrot {
    scrot_path: PathBuf,
}

impl Scrot {
    pub fn new(scrot_path: Option<&str>) -> Self {
        Self {
            scrot_path: PathBuf::from(scrot_path.unwrap_or(DEFAULT_SCROT)),
        }
    }

    pub async fn probe(&self) -> Result<()> {
        let output = Command::new(&self.scrot_path)
            .arg("--version")
            .output()
            .await
            .map_err(|err| {
                DriftwatchError::ResourceUnavailable(format!(
                    "`{}` is not installed or not on PATH ({err}); install scrot, e.g. `sudo apt-get install scrot`",
                    self.scrot_path.display()
                ))
            })?;
        if !output.status.success() {
            return Err(DriftwatchError::ResourceUnavailable(format!(
                "`{} --version` exited with {}",
                self.scrot_path.display(),
                output.status
            )));
        }
        Ok(())
    }

    /// Whole desktop, all monitors.
    pub async fn desktop(&self) -> Result<RgbImage> {
        self.shoot(&["--pointer"]).await
    }

    /// Currently focused window.
    pub async fn focused_window(&self) -> Result<RgbImage> {
        self.shoot(&["--focused", "--pointer"]).await
    }

    async fn shoot(&self, flags: &[&str]) -> Result<RgbImage> {
        let temp_path = std::env::temp_dir().join(format!("driftwatch_{}.png", Uuid::new_v4()));
        let output = Command::new(&self.scrot_path)
            .args(flags)
            .arg(&temp_path)
            .output()
            .await
            .map_err(|err| capture_error(format!("failed to run scrot ({}): {err}", flags.join(" "))))?;

        if !output.status.success() {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(capture_error(format!(
                "scrot failed ({}): {}",
                flags.join(" "),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let raw = tokio::fs::read(&temp_path)
            .await
            .map_err(|err| capture_error(format!("failed to read screenshot {:?}: {err}", temp_path)));
        if let Err(err) = tokio::fs::remove_file(&temp_path).await {
            tracing::debug!("temp capture cleanup failed for {:?}: {err}", temp_path);
        }
        let img = image::load_from_memory_with_format(&raw?, ImageFormat::Png)
            .map_err(|err| capture_error(format!("failed to decode screenshot: {err}")))?;
        Ok(img.to_rgb8())
    }
}

/// Crop `image` to `region` (desktop coordinates) and resize the result to
/// the region's dimensions if the crop had to be clipped.
pub fn crop_to_region(image: &RgbImage, region: Region) -> Result<Frame> {
    let (width, height) = image.dimensions();
    let clipped = region
        .clip_to(0, 0, Dimensions::new(width, height))
        .ok_or_else(|| {
            capture_error(format!(
                "capture region {region} lies outside the {width}x{height} screenshot"
            ))
        })?;
    let cropped = imageops::crop_imm(
        image,
        clipped.left as u32,
        clipped.top as u32,
        clipped.width,
        clipped.height,
    )
    .to_image();
    Ok(Frame::new(cropped).fit_to(region.dimensions()))
}

fn record(metrics: &Mutex<CaptureMetrics>, start: Instant, ok: bool) {
    if let Ok(mut guard) = metrics.lock() {
        guard.record(start, ok);
    }
}

/// Full-desktop capture, cropped to the explicit region when one is configured.
pub struct DesktopSource {
    scrot: Scrot,
    metrics: Arc<Mutex<CaptureMetrics>>,
}

impl DesktopSource {
    pub fn new(scrot: Scrot) -> Self {
        Self {
            scrot,
            metrics: Arc::new(Mutex::new(CaptureMetrics::default())),
        }
    }
}

#[async_trait]
impl FrameSource for DesktopSource {
    fn target(&self) -> CaptureTarget {
        CaptureTarget::Desktop
    }

    async fn probe(&self) -> Result<()> {
        self.scrot.probe().await
    }

    async fn resolve_region(&self, config: &CaptureConfig) -> Result<Region> {
        if let Some(region) = config.region {
            return Ok(region);
        }
        let probe = self.scrot.desktop().await?;
        let (width, height) = probe.dimensions();
        Ok(Region::at_origin(Dimensions::new(width, height)))
    }

    async fn capture(&self, region: Region) -> Result<Frame> {
        let start = Instant::now();
        let result = match self.scrot.desktop().await {
            Ok(image) => crop_to_region(&image, region),
            Err(err) => Err(err),
        };
        record(&self.metrics, start, result.is_ok());
        result
    }

    fn metrics(&self) -> CaptureMetrics {
        self.metrics.lock().map(|m| m.clone()).unwrap_or_default()
    }
}

/// Capture-and-crop of the leftmost physical monitor.
pub struct LeftMonitorSource {
    desktop: DesktopSource,
    monitor: Option<Region>,
}

impl LeftMonitorSource {
    pub fn new(scrot: Scrot, monitor: Option<Region>) -> Self {
        Self {
            desktop: DesktopSource::new(scrot),
            monitor,
        }
    }

    pub async fn detect(scrot: Scrot, locator: &dyn MonitorLocator) -> Self {
        let monitor = locator.leftmost_monitor_region().await;
        match monitor {
            Some(region) => tracing::info!("Targeting left monitor region {region}"),
            None => tracing::warn!(
                "Could not detect a left monitor; capturing the full desktop instead"
            ),
        }
        Self::new(scrot, monitor)
    }
}

#[async_trait]
impl FrameSource for LeftMonitorSource {
    fn target(&self) -> CaptureTarget {
        CaptureTarget::LeftMonitor
    }

    async fn probe(&self) -> Result<()> {
        self.desktop.probe().await
    }

    async fn resolve_region(&self, config: &CaptureConfig) -> Result<Region> {
        match (config.region, self.monitor) {
            (Some(region), _) => Ok(region),
            (None, Some(monitor)) => Ok(monitor),
            (None, None) => self.desktop.resolve_region(config).await,
        }
    }

    async fn capture(&self, region: Region) -> Result<Frame> {
        self.desktop.capture(region).await
    }

    fn metrics(&self) -> CaptureMetrics {
        self.desktop.metrics()
    }
}

/// Focus a browser window, then capture it. Window geometry is not known in
/// advance, so the shot is resized to the region size rather than cropped.
pub struct BrowserSource<W: WindowLocator> {
    scrot: Scrot,
    locator: W,
    metrics: Arc<Mutex<CaptureMetrics>>,
}

impl<W: WindowLocator> BrowserSource<W> {
    pub fn new(scrot: Scrot, locator: W) -> Self {
        Self {
            scrot,
            locator,
            metrics: Arc::new(Mutex::new(CaptureMetrics::default())),
        }
    }

    async fn shoot(&self, region: Region) -> Result<Frame> {
        if !self.locator.focus_browser_window().await {
            return Err(capture_error("could not find a browser window to focus"));
        }
        let image = self.scrot.focused_window().await?;
        Ok(Frame::new(image).fit_to(region.dimensions()))
    }
}

#[async_trait]
impl<W: WindowLocator> FrameSource for BrowserSource<W> {
    fn target(&self) -> CaptureTarget {
        CaptureTarget::Browser
    }

    async fn probe(&self) -> Result<()> {
        self.scrot.probe().await?;
        self.locator.probe().await
    }

    async fn resolve_region(&self, config: &CaptureConfig) -> Result<Region> {
        Ok(config
            .region
            .map(|region| Region::at_origin(region.dimensions()))
            .unwrap_or_else(|| Region::at_origin(config.fallback_dimensions())))
    }

    async fn capture(&self, region: Region) -> Result<Frame> {
        let start = Instant::now();
        let result = self.shoot(region).await;
        record(&self.metrics, start, result.is_ok());
        result
    }

    fn metrics(&self) -> CaptureMetrics {
        self.metrics.lock().map(|m| m.clone()).unwrap_or_default()
    }
}
