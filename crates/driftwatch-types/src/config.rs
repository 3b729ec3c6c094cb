use std::{fs, path::Path, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{
    geometry::{Dimensions, Region},
    DriftwatchError, Result,
};

/// Which part of the screen a capture source targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CaptureTarget {
    Desktop,
    #[default]
    LeftMonitor,
    Browser,
}

impl std::str::FromStr for CaptureTarget {
    type Err = DriftwatchError;

    fn from_str(value: &str) -> Result<Self> {
        match value {
            "desktop" => Ok(CaptureTarget::Desktop),
            "left_monitor" | "left-monitor" => Ok(CaptureTarget::LeftMonitor),
            "browser" => Ok(CaptureTarget::Browser),
            other => Err(DriftwatchError::Configuration(format!(
                "unknown capture target '{other}' (expected desktop, left_monitor or browser)"
            ))),
        }
    }
}

/// How the live loop spaces its ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CadencePolicy {
    /// Always sleep the whole interval after a tick; the effective rate drifts
    /// below `fps` by the tick's own latency.
    #[default]
    FullInterval,
    /// Sleep `interval - elapsed`, skipping the sleep when a tick overruns.
    Compensated,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureConfig {
    #[serde(default)]
    pub target: CaptureTarget,
    /// Explicit capture rectangle; overrides monitor detection.
    #[serde(default)]
    pub region: Option<Region>,
    #[serde(default = "default_fallback_resolution")]
    pub fallback_resolution: (u32, u32),
    #[serde(default)]
    pub scrot_path: Option<String>,
    #[serde(default)]
    pub xdotool_path: Option<String>,
    #[serde(default)]
    pub xrandr_path: Option<String>,
    #[serde(default = "default_browser_pattern")]
    pub browser_pattern: String,
    #[serde(default = "default_focus_settle_ms")]
    pub focus_settle_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// Number of frames N kept in the rolling window; masks keep N-1.
    #[serde(default = "default_history_size")]
    pub size: usize,
    #[serde(default = "default_threshold")]
    pub threshold: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    #[serde(default = "default_output")]
    pub output: String,
    #[serde(default = "default_fps")]
    pub fps: f64,
    #[serde(default = "default_codec")]
    pub codec: String,
    #[serde(default)]
    pub ffmpeg_path: Option<String>,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    #[serde(default)]
    pub cadence: CadencePolicy,
    #[serde(default)]
    pub max_consecutive_failures: Option<u32>,
    #[serde(default)]
    pub max_ticks: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    #[serde(default = "default_num_images")]
    pub num_images: usize,
    #[serde(default = "default_duration_seconds")]
    pub duration_seconds: f64,
    #[serde(default = "default_capture_dir")]
    pub capture_dir: String,
    #[serde(default = "default_diff_dir")]
    pub diff_dir: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpsConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Append logs here instead of stderr.
    #[serde(default)]
    pub log_file: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DriftwatchConfig {
    #[serde(default)]
    pub capture: CaptureConfig,
    #[serde(default)]
    pub history: HistoryConfig,
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub batch: BatchConfig,
    #[serde(default)]
    pub ops: OpsConfig,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            target: CaptureTarget::default(),
            region: None,
            fallback_resolution: default_fallback_resolution(),
            scrot_path: None,
            xdotool_path: None,
            xrandr_path: None,
            browser_pattern: default_browser_pattern(),
            focus_settle_ms: default_focus_settle_ms(),
        }
    }
}

impl CaptureConfig {
    pub fn fallback_dimensions(&self) -> Dimensions {
        Dimensions::new(self.fallback_resolution.0, self.fallback_resolution.1)
    }
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            size: default_history_size(),
            threshold: default_threshold(),
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            output: default_output(),
            fps: default_fps(),
            codec: default_codec(),
            ffmpeg_path: None,
            retry_backoff_ms: default_retry_backoff_ms(),
            cadence: CadencePolicy::default(),
            max_consecutive_failures: None,
            max_ticks: None,
        }
    }
}

impl StreamConfig {
    /// Sleep between ticks. Falls back to the default rate for an fps that
    /// `validate` would reject.
    pub fn tick_interval(&self) -> Duration {
        self.checked_tick_interval()
            .unwrap_or_else(|| Duration::from_secs_f64(1.0 / default_fps()))
    }

    fn checked_tick_interval(&self) -> Option<Duration> {
        Duration::try_from_secs_f64(1.0 / self.fps).ok()
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            num_images: default_num_images(),
            duration_seconds: default_duration_seconds(),
            capture_dir: default_capture_dir(),
            diff_dir: default_diff_dir(),
        }
    }
}

impl BatchConfig {
    /// Gap between batch captures; zero for a count or duration that
    /// `validate` would reject.
    pub fn capture_interval(&self) -> Duration {
        self.checked_capture_interval().unwrap_or_default()
    }

    fn checked_capture_interval(&self) -> Option<Duration> {
        if self.num_images == 0 {
            return None;
        }
        Duration::try_from_secs_f64(self.duration_seconds / self.num_images as f64).ok()
    }
}

impl Default for OpsConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_file: None,
        }
    }
}

impl DriftwatchConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_ref = path.as_ref();
        let contents = fs::read_to_string(path_ref).map_err(|err| {
            DriftwatchError::Configuration(format!(
                "unable to read config file {}: {err}",
                path_ref.display()
            ))
        })?;
        toml::from_str(&contents).map_err(|err| {
            DriftwatchError::Configuration(format!(
                "failed to parse config file {}: {err}",
                path_ref.display()
            ))
        })
    }

    pub fn validate(&self) -> Result<()> {
        if self.history.size < 2 {
            return Err(DriftwatchError::Configuration(
                "history.size must be at least 2".into(),
            ));
        }
        if !(self.stream.fps.is_finite() && self.stream.fps > 0.0) {
            return Err(DriftwatchError::Configuration(
                "stream.fps must be a positive number".into(),
            ));
        }
        if self.stream.checked_tick_interval().is_none() {
            return Err(DriftwatchError::Configuration(format!(
                "stream.fps {} gives a tick interval that does not fit a duration",
                self.stream.fps
            )));
        }
        if self.history.threshold == 0 {
            return Err(DriftwatchError::Configuration(
                "history.threshold must be at least 1".into(),
            ));
        }
        if self.stream.output.trim().is_empty() {
            return Err(DriftwatchError::Configuration(
                "stream.output must not be empty".into(),
            ));
        }
        let (width, height) = self.capture.fallback_resolution;
        if width == 0 || height == 0 {
            return Err(DriftwatchError::Configuration(
                "capture.fallback_resolution must be non-zero".into(),
            ));
        }
        if let Some(region) = &self.capture.region {
            if region.width == 0 || region.height == 0 {
                return Err(DriftwatchError::Configuration(
                    "capture.region must have a non-zero size".into(),
                ));
            }
        }
        if self.batch.num_images == 0 {
            return Err(DriftwatchError::Configuration(
                "batch.num_images must be greater than zero".into(),
            ));
        }
        if !(self.batch.duration_seconds.is_finite() && self.batch.duration_seconds >= 0.0) {
            return Err(DriftwatchError::Configuration(
                "batch.duration_seconds must not be negative".into(),
            ));
        }
        if self.batch.checked_capture_interval().is_none() {
            return Err(DriftwatchError::Configuration(format!(
                "batch.duration_seconds {} is too large",
                self.batch.duration_seconds
            )));
        }
        Ok(())
    }
}

fn default_fallback_resolution() -> (u32, u32) {
    (1920, 1080)
}

fn default_browser_pattern() -> String {
    "firefox|chrome|brave|chromium|edge".into()
}

fn default_focus_settle_ms() -> u64 {
    300
}

fn default_history_size() -> usize {
    10
}

fn default_threshold() -> u8 {
    30
}

fn default_output() -> String {
    "screen_recording_dashboard.mp4".into()
}

fn default_fps() -> f64 {
    10.0
}

fn default_codec() -> String {
    "mpeg4".into()
}

fn default_retry_backoff_ms() -> u64 {
    2000
}

fn default_num_images() -> usize {
    10
}

fn default_duration_seconds() -> f64 {
    10.0
}

fn default_capture_dir() -> String {
    "captures".into()
}

fn default_diff_dir() -> String {
    "diffs".into()
}

fn default_log_level() -> String {
    "info".into()
}
