use std::{collections::VecDeque, path::PathBuf, process::Stdio};

use async_trait::async_trait;
use driftwatch_types::{
    config::StreamConfig, frame::DashboardFrame, geometry::Dimensions, DriftwatchError, Result,
};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    process::{Child, ChildStderr, ChildStdin, Command},
    task::JoinHandle,
};
use tracing::{debug, error, info, warn};

use crate::{check_dimensions, stream_error, StreamSink};

const DEFAULT_FFMPEG: &str = "ffmpeg";
/// Trailing stderr lines kept for the error raised by a failed encode.
const STDERR_TAIL_LINES: usize = 20;

/// Pipes raw `rgb24` frames into an ffmpeg child that writes the container.
pub struct FfmpegSink {
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    stderr_tail: Option<JoinHandle<Vec<String>>>,
    output_path: PathBuf,
    dimensions: Dimensions,
    frame_count: u64,
}

impl FfmpegSink {
    /// Spawn ffmpeg for a `dimensions`-sized stream at `config.fps`.
    pub fn open(config: &StreamConfig, dimensions: Dimensions) -> Result<Self> {
        let ffmpeg = config.ffmpeg_path.as_deref().unwrap_or(DEFAULT_FFMPEG);
        let output_path = PathBuf::from(&config.output);
        let size = format!("{}x{}", dimensions.width, dimensions.height);
        let fps = config.fps.to_string();

        let mut cmd = Command::new(ffmpeg);
        cmd.args([
            "-hide_banner",
            "-loglevel", "error",
            "-f", "rawvideo",
            "-pix_fmt", "rgb24",
            "-s", size.as_str(),
            "-r", fps.as_str(),
            "-i", "pipe:0",
            "-vf", "pad=ceil(iw/2)*2:ceil(ih/2)*2",
            "-c:v", config.codec.as_str(),
            "-pix_fmt", "yuv420p",
            "-y",
        ])
        .arg(&output_path)
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|err| {
            DriftwatchError::ResourceUnavailable(format!("failed to spawn {ffmpeg}: {err}"))
        })?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| stream_error("could not get ffmpeg stdin handle"))?;
        let stderr_tail = child.stderr.take().map(|stderr| tokio::spawn(drain_stderr(stderr)));

        info!(
            output = %output_path.display(),
            size = %size,
            fps = config.fps,
            codec = %config.codec,
            "Recording dashboard stream"
        );

        Ok(Self {
            child: Some(child),
            stdin: Some(stdin),
            stderr_tail,
            output_path,
            dimensions,
            frame_count: 0,
        })
    }
}

/// Read ffmpeg's stderr as it arrives so the encoder never blocks on a full
/// pipe; returns the last few lines.
async fn drain_stderr(stderr: ChildStderr) -> Vec<String> {
    let mut lines = BufReader::new(stderr).lines();
    let mut tail = VecDeque::with_capacity(STDERR_TAIL_LINES);
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                debug!(target: "ffmpeg", "{line}");
                if tail.len() == STDERR_TAIL_LINES {
                    tail.pop_front();
                }
                tail.push_back(line);
            }
            Ok(None) => break,
            Err(err) => {
                debug!("ffmpeg stderr read failed: {err}");
                break;
            }
        }
    }
    tail.into()
}

#[async_trait]
impl StreamSink for FfmpegSink {
    fn dimensions(&self) -> Dimensions {
        self.dimensions
    }

    async fn write(&mut self, frame: &DashboardFrame) -> Result<()> {
        check_dimensions(self.dimensions, frame)?;
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| stream_error("stream already closed"))?;
        stdin
            .write_all(frame.as_raw())
            .await
            .map_err(|err| stream_error(format!("failed to write frame to ffmpeg stdin: {err}")))?;
        self.frame_count += 1;
        debug!(frame_count = self.frame_count, "pushed frame to encoder");
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };
        if let Some(mut stdin) = self.stdin.take() {
            if let Err(err) = stdin.shutdown().await {
                warn!("ffmpeg stdin shutdown failed: {err}");
            }
        }

        let status = child
            .wait()
            .await
            .map_err(|err| stream_error(format!("failed to wait for ffmpeg: {err}")))?;
        let stderr = match self.stderr_tail.take() {
            Some(task) => task.await.unwrap_or_default().join("\n"),
            None => String::new(),
        };
        if !status.success() {
            error!(stderr = %stderr, "ffmpeg exited with error");
            return Err(stream_error(format!(
                "ffmpeg exited with {}: {}",
                status,
                stderr.trim()
            )));
        }

        info!(
            frame_count = self.frame_count,
            output = %self.output_path.display(),
            "Video saved"
        );
        Ok(())
    }

    fn frames_written(&self) -> u64 {
        self.frame_count
    }
}

/// Check whether ffmpeg can be launched at all.
pub async fn probe_ffmpeg(config: &StreamConfig) -> Result<()> {
    let ffmpeg = config.ffmpeg_path.as_deref().unwrap_or(DEFAULT_FFMPEG);
    match Command::new(ffmpeg).arg("-version").output().await {
        Ok(out) if out.status.success() => {
            debug!("ffmpeg is available");
            Ok(())
        }
        Ok(out) => {
            warn!("ffmpeg returned {} for -version; encoding may fail", out.status);
            Ok(())
        }
        Err(err) => Err(DriftwatchError::ResourceUnavailable(format!(
            "{ffmpeg} not found on PATH ({err}); install ffmpeg to record the dashboard"
        ))),
    }
}
