//! Operational helpers: logging, output directories, artifact persistence.

use std::{
    fs,
    path::{Path, PathBuf},
    sync::Mutex,
};

use driftwatch_types::{
    config::{BatchConfig, OpsConfig},
    frame::Frame,
    DriftwatchError, Result,
};
use image::RgbImage;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

pub const COMPOSITE_FILE_NAME: &str = "total_sequence_diff.png";

pub fn init_tracing(config: &OpsConfig) -> Result<()> {
    let filter = EnvFilter::try_new(config.log_level.clone())
        .or_else(|_| EnvFilter::try_new("info"))
        .map_err(|err| DriftwatchError::Ops(format!("failed to create log filter: {err}")))?;

    let installed = match &config.log_file {
        Some(path) => {
            ensure_parent_dir(path)?;
            let file = fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|err| {
                    DriftwatchError::Ops(format!("failed to open log file {path}: {err}"))
                })?;
            fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .try_init()
        }
        None => fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init(),
    };
    installed.map_err(|err| DriftwatchError::Ops(format!("tracing init error: {err}")))?;
    Ok(())
}

pub fn ensure_output_dir(path: impl AsRef<Path>) -> Result<PathBuf> {
    let dir = path.as_ref().to_path_buf();
    fs::create_dir_all(&dir).map_err(|err| {
        DriftwatchError::Artifact(format!("failed to create directory {}: {err}", dir.display()))
    })?;
    info!("Output directory ready at {:?}", dir);
    Ok(dir)
}

/// Make sure the parent directory of an output file exists.
pub fn ensure_parent_dir(file: impl AsRef<Path>) -> Result<()> {
    match file.as_ref().parent() {
        Some(parent) if !parent.as_os_str().is_empty() => ensure_output_dir(parent).map(|_| ()),
        _ => Ok(()),
    }
}

/// `diff_<a>_vs_<b>.png`, where each side is the file name up to its first dot.
pub fn diff_artifact_name(first: &Path, second: &Path) -> String {
    format!("diff_{}_vs_{}.png", base_name(first), base_name(second))
}

fn base_name(path: &Path) -> String {
    path.file_name()
        .and_then(|name| name.to_str())
        .and_then(|name| name.split('.').next())
        .unwrap_or_default()
        .to_string()
}

/// Writes batch-mode PNG artifacts into the configured directories.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    capture_dir: PathBuf,
    diff_dir: PathBuf,
}

impl ArtifactStore {
    pub fn new(capture_dir: impl Into<PathBuf>, diff_dir: impl Into<PathBuf>) -> Self {
        Self {
            capture_dir: capture_dir.into(),
            diff_dir: diff_dir.into(),
        }
    }

    pub fn from_config(config: &BatchConfig) -> Self {
        Self::new(&config.capture_dir, &config.diff_dir)
    }

    pub fn prepare(&self) -> Result<()> {
        ensure_output_dir(&self.capture_dir)?;
        ensure_output_dir(&self.diff_dir)?;
        Ok(())
    }

    pub fn capture_dir(&self) -> &Path {
        &self.capture_dir
    }

    pub fn diff_dir(&self) -> &Path {
        &self.diff_dir
    }

    pub fn save_capture(&self, index: usize, frame: &Frame) -> Result<PathBuf> {
        let path = self.capture_dir.join(format!("capture_{index:02}.png"));
        save_png(frame.image(), &path)?;
        Ok(path)
    }

    pub fn save_diff(&self, first: &Path, second: &Path, difference: &RgbImage) -> Result<PathBuf> {
        let path = self.diff_dir.join(diff_artifact_name(first, second));
        save_png(difference, &path)?;
        Ok(path)
    }

    pub fn save_composite(&self, composite: &RgbImage) -> Result<PathBuf> {
        let path = self.diff_dir.join(COMPOSITE_FILE_NAME);
        save_png(composite, &path)?;
        Ok(path)
    }
}

fn save_png(image: &RgbImage, path: &Path) -> Result<()> {
    image
        .save(path)
        .map_err(|err| DriftwatchError::Artifact(format!("failed to save {}: {err}", path.display())))
}
