//! Persistent output for rendered dashboard frames.

pub mod ffmpeg;

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use driftwatch_types::{frame::DashboardFrame, geometry::Dimensions, DriftwatchError, Result};

pub use ffmpeg::FfmpegSink;

#[async_trait]
pub trait StreamSink: Send {
    /// Frame size fixed when the stream was opened.
    fn dimensions(&self) -> Dimensions;

    /// Append one frame. Frames of any other size are rejected.
    async fn write(&mut self, frame: &DashboardFrame) -> Result<()>;

    /// Flush and release the output. Calling it again is a no-op.
    async fn close(&mut self) -> Result<()>;

    fn frames_written(&self) -> u64;
}

pub(crate) fn check_dimensions(expected: Dimensions, frame: &DashboardFrame) -> Result<()> {
    if frame.dimensions() == expected {
        Ok(())
    } else {
        Err(DriftwatchError::mismatch(expected, frame.dimensions()))
    }
}

pub fn stream_error(message: impl Into<String>) -> DriftwatchError {
    DriftwatchError::Stream(message.into())
}

/// Frames and close calls recorded by a [`MemorySink`].
#[derive(Debug, Default)]
pub struct MemoryRecording {
    pub frames: Vec<DashboardFrame>,
    pub close_calls: u32,
}

/// In-memory sink for tests. Clones share the recording.
#[derive(Debug, Clone)]
pub struct MemorySink {
    dimensions: Dimensions,
    recording: Arc<Mutex<MemoryRecording>>,
    closed: bool,
}

impl MemorySink {
    pub fn new(dimensions: Dimensions) -> Self {
        Self {
            dimensions,
            recording: Arc::new(Mutex::new(MemoryRecording::default())),
            closed: false,
        }
    }

    pub fn recording(&self) -> Arc<Mutex<MemoryRecording>> {
        Arc::clone(&self.recording)
    }
}

#[async_trait]
impl StreamSink for MemorySink {
    fn dimensions(&self) -> Dimensions {
        self.dimensions
    }

    async fn write(&mut self, frame: &DashboardFrame) -> Result<()> {
        if self.closed {
            return Err(stream_error("write after close"));
        }
        check_dimensions(self.dimensions, frame)?;
        self.recording
            .lock()
            .map_err(|_| stream_error("recording lock poisoned"))?
            .frames
            .push(frame.clone());
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.recording
            .lock()
            .map_err(|_| stream_error("recording lock poisoned"))?
            .close_calls += 1;
        Ok(())
    }

    fn frames_written(&self) -> u64 {
        self.recording
            .lock()
            .map(|recording| recording.frames.len() as u64)
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;

    #[tokio::test]
    async fn memory_sink_rejects_wrong_size() {
        let mut sink = MemorySink::new(Dimensions::new(8, 4));
        sink.write(&DashboardFrame::new(RgbImage::new(8, 4)))
            .await
            .expect("matching frame");
        let err = sink
            .write(&DashboardFrame::new(RgbImage::new(4, 4)))
            .await
            .expect_err("wrong size");
        assert!(matches!(err, DriftwatchError::DimensionMismatch { .. }));
        assert_eq!(sink.frames_written(), 1);
    }

    #[tokio::test]
    async fn memory_sink_closes_once() {
        let mut sink = MemorySink::new(Dimensions::new(2, 2));
        let recording = sink.recording();
        sink.close().await.expect("close");
        sink.close().await.expect("second close is a no-op");
        assert_eq!(recording.lock().expect("lock").close_calls, 1);
        assert!(sink
            .write(&DashboardFrame::new(RgbImage::new(2, 2)))
            .await
            .is_err());
    }
}
