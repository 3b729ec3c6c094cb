use std::time::Instant;

use chrono::Utc;
use driftwatch_bus::EventBus;
use driftwatch_capture::FrameSource;
use driftwatch_stream::StreamSink;
use driftwatch_types::{
    config::{CadencePolicy, DriftwatchConfig},
    events::{
        EventKind, EventPayload, FailureEvent, LifecyclePhase, LoopEvent, Stage, TickEvent,
    },
    frame::{DiffMask, Frame},
    geometry::{Dimensions, Region},
    telemetry::{LoopMetrics, TickLatency},
    DriftwatchError, Result,
};
use driftwatch_vision::{DashboardComposer, DiffEngine, HeatmapAccumulator, RingBuffer};
use tokio::time::Duration;
use tracing::{debug, error, info, warn};

use crate::stop::StopSignal;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    Capturing,
    Processing,
    Rendering,
    Stopped,
}

/// Loop parameters, resolved once before the first tick.
#[derive(Debug, Clone)]
pub struct LoopSettings {
    pub region: Region,
    pub history_size: usize,
    pub threshold: u8,
    pub tick_interval: Duration,
    pub retry_backoff: Duration,
    pub cadence: CadencePolicy,
    pub max_consecutive_failures: Option<u32>,
    pub max_ticks: Option<u64>,
}

impl LoopSettings {
    pub fn from_config(config: &DriftwatchConfig, region: Region) -> Self {
        Self {
            region,
            history_size: config.history.size,
            threshold: config.history.threshold,
            tick_interval: config.stream.tick_interval(),
            retry_backoff: config.stream.retry_backoff(),
            cadence: config.stream.cadence,
            max_consecutive_failures: config.stream.max_consecutive_failures,
            max_ticks: config.stream.max_ticks,
        }
    }

    pub fn dimensions(&self) -> Dimensions {
        self.region.dimensions()
    }

    /// Sleep after a tick that took `elapsed`.
    pub fn cadence_delay(&self, elapsed: Duration) -> Duration {
        match self.cadence {
            CadencePolicy::FullInterval => self.tick_interval,
            CadencePolicy::Compensated => self.tick_interval.saturating_sub(elapsed),
        }
    }
}

enum TickOutcome {
    Rendered,
    CaptureFailed,
    RenderFailed,
}

/// Single-threaded capture → diff → heatmap → dashboard → sink loop.
///
/// The loop owns both ring buffers; nothing else touches them.
pub struct CaptureLoop<S, B>
where
    S: FrameSource,
    B: EventBus,
{
    source: S,
    bus: B,
    settings: LoopSettings,
    frames: RingBuffer<Frame>,
    diffs: RingBuffer<DiffMask>,
    engine: DiffEngine,
    heatmap: HeatmapAccumulator,
    composer: DashboardComposer,
    state: LoopState,
    metrics: LoopMetrics,
}

impl<S, B> CaptureLoop<S, B>
where
    S: FrameSource,
    B: EventBus,
{
    pub fn new(settings: LoopSettings, source: S, bus: B) -> Result<Self> {
        check_settings(&settings)?;
        let dimensions = settings.dimensions();
        Ok(Self {
            frames: RingBuffer::new(settings.history_size),
            diffs: RingBuffer::new(settings.history_size - 1),
            engine: DiffEngine::new(settings.threshold),
            heatmap: HeatmapAccumulator::new(dimensions),
            composer: DashboardComposer::new(dimensions, settings.history_size),
            source,
            bus,
            settings,
            state: LoopState::Idle,
            metrics: LoopMetrics::default(),
        })
    }

    /// Probe the source's tools and resolve its region, then build the loop.
    /// A failure here is published as a startup-stage failure event.
    pub async fn prepare(config: &DriftwatchConfig, source: S, bus: B) -> Result<Self> {
        let settings = match startup_settings(config, &source).await {
            Ok(settings) => settings,
            Err(err) => {
                error!("startup failed: {err}");
                if let Err(publish_err) = bus
                    .publish(failure_event(0, Stage::Startup, &err, false))
                    .await
                {
                    warn!("event publish failed: {publish_err}");
                }
                return Err(err);
            }
        };
        Self::new(settings, source, bus)
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn metrics(&self) -> &LoopMetrics {
        &self.metrics
    }

    pub fn settings(&self) -> &LoopSettings {
        &self.settings
    }

    /// Size every sink handed to [`run`](Self::run) must be opened with.
    pub fn output_dimensions(&self) -> Dimensions {
        self.composer.output_dimensions()
    }

    pub fn frames(&self) -> &RingBuffer<Frame> {
        &self.frames
    }

    pub fn diffs(&self) -> &RingBuffer<DiffMask> {
        &self.diffs
    }

    /// Run until stopped, the tick budget is spent, or an unrecoverable
    /// failure occurs. `sink` is closed exactly once on every exit path.
    pub async fn run<K: StreamSink>(
        &mut self,
        mut sink: K,
        mut stop: StopSignal,
    ) -> Result<LoopMetrics> {
        if sink.dimensions() != self.output_dimensions() {
            let _ = sink.close().await;
            self.state = LoopState::Stopped;
            return Err(DriftwatchError::mismatch(
                self.output_dimensions(),
                sink.dimensions(),
            ));
        }

        self.publish(LoopEvent::lifecycle(
            LifecyclePhase::Boot,
            format!(
                "capturing {} at {:.1} fps, history {}",
                self.settings.region,
                1.0 / self.settings.tick_interval.as_secs_f64(),
                self.settings.history_size
            ),
        ))
        .await;
        info!("Starting live capture loop");

        let outcome = self.drive(&mut sink, &mut stop).await;
        self.state = LoopState::Stopped;
        let closed = sink.close().await;

        let details = match &outcome {
            Ok(()) => format!("stopped after {} ticks", self.metrics.ticks),
            Err(err) => format!("aborted after {} ticks: {err}", self.metrics.ticks),
        };
        self.publish(LoopEvent::lifecycle(LifecyclePhase::Shutdown, details))
            .await;
        info!(
            ticks = self.metrics.ticks,
            rendered = self.metrics.rendered_frames,
            capture_failures = self.metrics.capture_failures,
            "Stream stopped"
        );

        outcome?;
        closed?;
        Ok(self.metrics.clone())
    }

    async fn drive<K: StreamSink>(&mut self, sink: &mut K, stop: &mut StopSignal) -> Result<()> {
        self.publish(LoopEvent::lifecycle(LifecyclePhase::Running, "first tick"))
            .await;
        loop {
            if stop.is_stopped() {
                info!("Stop requested");
                return Ok(());
            }
            if let Some(limit) = self.settings.max_ticks {
                if self.metrics.ticks >= limit {
                    info!("Tick budget of {limit} reached");
                    return Ok(());
                }
            }

            let started = Instant::now();
            let outcome = self.tick(sink).await?;
            self.state = LoopState::Idle;

            let delay = match outcome {
                TickOutcome::CaptureFailed => self.settings.retry_backoff,
                TickOutcome::Rendered | TickOutcome::RenderFailed => {
                    self.settings.cadence_delay(started.elapsed())
                }
            };
            if stop.pause(delay).await {
                info!("Stop requested");
                return Ok(());
            }
        }
    }

    async fn tick<K: StreamSink>(&mut self, sink: &mut K) -> Result<TickOutcome> {
        self.metrics.ticks += 1;
        let tick = self.metrics.ticks;
        let tick_start = Instant::now();

        self.state = LoopState::Capturing;
        let frame = match self.source.capture(self.settings.region).await {
            Ok(frame) => frame.fit_to(self.settings.dimensions()),
            Err(err) if err.is_transient() => {
                self.metrics.record_capture_failure();
                let consecutive = self.metrics.consecutive_failures;
                if let Some(limit) = self.settings.max_consecutive_failures {
                    if consecutive >= limit {
                        error!(tick, "capture failed {consecutive} times in a row, stopping: {err}");
                        self.publish_failure(tick, Stage::Capture, &err, false).await;
                        return Err(err);
                    }
                }
                warn!(
                    tick,
                    "capture failed, retrying in {:?}: {err}", self.settings.retry_backoff
                );
                self.publish_failure(tick, Stage::Capture, &err, true).await;
                return Ok(TickOutcome::CaptureFailed);
            }
            Err(err) => {
                error!(tick, "capture failed unrecoverably, stopping: {err}");
                self.publish_failure(tick, Stage::Capture, &err, false).await;
                return Err(err);
            }
        };
        let capture_ms = tick_start.elapsed().as_millis() as u64;

        self.state = LoopState::Processing;
        let process_start = Instant::now();
        self.frames.push(frame);
        let diff = match (self.frames.previous(), self.frames.latest()) {
            (Some(previous), Some(latest)) => Some(self.engine.diff(previous, latest)),
            _ => None,
        };
        match diff {
            Some(Ok(diff)) => {
                debug!(tick, changed_area = diff.changed_area, "frame diff");
                self.diffs.push(diff.mask);
            }
            Some(Err(err)) => {
                self.metrics.processing_failures += 1;
                warn!(tick, "diff failed, continuing: {err}");
                self.publish_failure(tick, Stage::Diff, &err, true).await;
            }
            None => {}
        }
        let composite = match self.heatmap.compose(&self.diffs) {
            Ok(composite) => composite,
            Err(err) => return self.render_failed(tick, Stage::Diff, err).await,
        };
        let process_ms = process_start.elapsed().as_millis() as u64;

        self.state = LoopState::Rendering;
        let render_start = Instant::now();
        let Some(live) = self.frames.latest() else {
            return Ok(TickOutcome::RenderFailed);
        };
        let dashboard = match self.composer.compose(live, &composite) {
            Ok(dashboard) => dashboard,
            Err(err) => return self.render_failed(tick, Stage::Render, err).await,
        };
        if let Err(err) = sink.write(&dashboard).await {
            return self.render_failed(tick, Stage::Stream, err).await;
        }
        let render_ms = render_start.elapsed().as_millis() as u64;

        let latency = TickLatency {
            capture_ms,
            process_ms,
            render_ms,
            total_ms: tick_start.elapsed().as_millis() as u64,
            captured_at: Utc::now(),
        };
        let changed_pixels = composite.changed_pixels();
        debug!(tick, changed_pixels, total_ms = latency.total_ms, "tick rendered");
        self.metrics.record_success(latency.clone());
        self.publish(LoopEvent::new(
            EventKind::Tick,
            EventPayload::Tick(TickEvent {
                tick,
                frames_held: self.frames.len(),
                masks_held: self.diffs.len(),
                changed_pixels,
                latency,
            }),
        ))
        .await;
        Ok(TickOutcome::Rendered)
    }

    async fn render_failed(
        &mut self,
        tick: u64,
        stage: Stage,
        err: DriftwatchError,
    ) -> Result<TickOutcome> {
        self.metrics.processing_failures += 1;
        warn!(tick, "{stage} stage failed, continuing: {err}");
        self.publish_failure(tick, stage, &err, true).await;
        Ok(TickOutcome::RenderFailed)
    }

    async fn publish_failure(
        &self,
        tick: u64,
        stage: Stage,
        err: &DriftwatchError,
        continuing: bool,
    ) {
        self.publish(failure_event(tick, stage, err, continuing)).await;
    }

    async fn publish(&self, event: LoopEvent) {
        if let Err(err) = self.bus.publish(event).await {
            warn!("event publish failed: {err}");
        }
    }
}

async fn startup_settings<S: FrameSource>(
    config: &DriftwatchConfig,
    source: &S,
) -> Result<LoopSettings> {
    source.probe().await?;
    let region = source.resolve_region(&config.capture).await?;
    info!("Capture region: {region}");
    let settings = LoopSettings::from_config(config, region);
    check_settings(&settings)?;
    Ok(settings)
}

fn check_settings(settings: &LoopSettings) -> Result<()> {
    if settings.history_size < 2 {
        return Err(DriftwatchError::Configuration(
            "history size must be at least 2".into(),
        ));
    }
    if settings.dimensions().is_empty() {
        return Err(DriftwatchError::Configuration(format!(
            "capture region {} has no area",
            settings.region
        )));
    }
    Ok(())
}

fn failure_event(tick: u64, stage: Stage, err: &DriftwatchError, continuing: bool) -> LoopEvent {
    LoopEvent::new(
        EventKind::Failure,
        EventPayload::Failure(FailureEvent {
            tick,
            stage,
            message: err.to_string(),
            continuing,
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stop::stop_channel;
    use driftwatch_bus::{LocalBus, NullBus};
    use driftwatch_capture::{MockCapture, MockSource};
    use driftwatch_stream::MemorySink;
    use futures::StreamExt;
    use image::Rgb;

    const DIMS: Dimensions = Dimensions::new(40, 60);

    fn settings(history_size: usize, max_ticks: u64) -> LoopSettings {
        LoopSettings {
            region: Region::at_origin(DIMS),
            history_size,
            threshold: 30,
            tick_interval: Duration::from_millis(1),
            retry_backoff: Duration::from_millis(1),
            cadence: CadencePolicy::FullInterval,
            max_consecutive_failures: None,
            max_ticks: Some(max_ticks),
        }
    }

    fn frame_with_dot(x: u32, y: u32) -> Frame {
        let mut frame = Frame::solid(DIMS, [0, 0, 0]).into_image();
        frame.put_pixel(x, y, Rgb([255, 255, 255]));
        Frame::new(frame)
    }

    fn blank() -> Frame {
        Frame::solid(DIMS, [0, 0, 0])
    }

    fn right_half_lit(sink: &MemorySink, index: usize, x: u32, y: u32) -> bool {
        let recording = sink.recording();
        let recording = recording.lock().expect("recording");
        recording.frames[index].image().get_pixel(DIMS.width + x, y).0 == [255, 255, 255]
    }

    #[tokio::test]
    async fn loop_renders_every_tick_and_closes_sink_once() {
        let frames = vec![blank(), frame_with_dot(20, 45), blank(), blank(), blank()];
        let source = MockSource::from_frames(DIMS, frames);
        let mut capture_loop = CaptureLoop::new(settings(3, 5), source, NullBus).expect("loop");
        let sink = MemorySink::new(capture_loop.output_dimensions());
        let probe = sink.clone();
        let (_handle, stop) = stop_channel();

        let metrics = capture_loop.run(sink, stop).await.expect("run");
        assert_eq!(metrics.ticks, 5);
        assert_eq!(metrics.rendered_frames, 5);
        assert_eq!(capture_loop.state(), LoopState::Stopped);
        assert_eq!(capture_loop.frames().len(), 3);
        assert_eq!(capture_loop.diffs().len(), 2);

        let recording = probe.recording();
        {
            let recording = recording.lock().expect("recording");
            assert_eq!(recording.frames.len(), 5);
            assert_eq!(recording.close_calls, 1);
            for frame in &recording.frames {
                assert_eq!(frame.dimensions(), Dimensions::new(DIMS.width * 2, DIMS.height));
            }
        }

        // Tick 1 has no diff; ticks 2-3 carry the dot; it scrolls out by tick 5.
        assert!(!right_half_lit(&probe, 0, 20, 45));
        assert!(right_half_lit(&probe, 1, 20, 45));
        assert!(right_half_lit(&probe, 2, 20, 45));
        assert!(right_half_lit(&probe, 3, 20, 45));
        assert!(!right_half_lit(&probe, 4, 20, 45));
    }

    #[tokio::test]
    async fn transient_capture_failures_do_not_stop_the_loop() {
        let source = MockSource::new(
            DIMS,
            vec![
                MockCapture::Frame(blank()),
                MockCapture::Fail("scrot exited with status 2".into()),
                MockCapture::Frame(blank()),
            ],
        );
        let mut capture_loop = CaptureLoop::new(settings(4, 3), source, NullBus).expect("loop");
        let sink = MemorySink::new(capture_loop.output_dimensions());
        let probe = sink.clone();
        let (_handle, stop) = stop_channel();

        let metrics = capture_loop.run(sink, stop).await.expect("run");
        assert_eq!(metrics.ticks, 3);
        assert_eq!(metrics.capture_failures, 1);
        assert_eq!(metrics.rendered_frames, 2);
        assert_eq!(capture_loop.frames().len(), 2);
        assert_eq!(probe.frames_written(), 2);
    }

    #[tokio::test]
    async fn consecutive_failure_limit_stops_and_still_closes() {
        let source = MockSource::new(
            DIMS,
            vec![
                MockCapture::Fail("one".into()),
                MockCapture::Fail("two".into()),
                MockCapture::Frame(blank()),
            ],
        );
        let mut loop_settings = settings(3, 10);
        loop_settings.max_consecutive_failures = Some(2);
        let mut capture_loop = CaptureLoop::new(loop_settings, source, NullBus).expect("loop");
        let sink = MemorySink::new(capture_loop.output_dimensions());
        let recording = sink.recording();
        let (_handle, stop) = stop_channel();

        let err = capture_loop.run(sink, stop).await.expect_err("stops");
        assert!(err.is_transient());
        assert_eq!(capture_loop.state(), LoopState::Stopped);
        assert_eq!(recording.lock().expect("recording").close_calls, 1);
    }

    #[tokio::test]
    async fn stop_signal_ends_run_at_tick_boundary() {
        let frames = (0..100).map(|_| blank());
        let source = MockSource::from_frames(DIMS, frames);
        let mut loop_settings = settings(3, 1_000);
        loop_settings.max_ticks = None;
        loop_settings.tick_interval = Duration::from_millis(5);
        let mut capture_loop = CaptureLoop::new(loop_settings, source, NullBus).expect("loop");
        let sink = MemorySink::new(capture_loop.output_dimensions());
        let recording = sink.recording();
        let (handle, stop) = stop_channel();

        let stopper = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            handle.stop();
        });
        let metrics = capture_loop.run(sink, stop).await.expect("run");
        stopper.await.expect("join");

        assert!(metrics.ticks >= 1);
        assert!(metrics.ticks < 100);
        let recording = recording.lock().expect("recording");
        assert_eq!(recording.close_calls, 1);
        assert_eq!(recording.frames.len() as u64, metrics.rendered_frames);
    }

    #[tokio::test]
    async fn wrong_sink_size_is_rejected_and_closed() {
        let source = MockSource::from_frames(DIMS, [blank()]);
        let mut capture_loop = CaptureLoop::new(settings(3, 1), source, NullBus).expect("loop");
        let sink = MemorySink::new(DIMS);
        let recording = sink.recording();
        let (_handle, stop) = stop_channel();

        let err = capture_loop.run(sink, stop).await.expect_err("mismatch");
        assert!(matches!(err, DriftwatchError::DimensionMismatch { .. }));
        assert_eq!(recording.lock().expect("recording").close_calls, 1);
    }

    #[tokio::test]
    async fn tick_events_reach_subscribers() {
        let bus = LocalBus::new(32);
        let mut events = bus.subscribe();
        let source = MockSource::from_frames(DIMS, [blank(), frame_with_dot(1, 1)]);
        let mut capture_loop = CaptureLoop::new(settings(3, 2), source, bus).expect("loop");
        let sink = MemorySink::new(capture_loop.output_dimensions());
        let (_handle, stop) = stop_channel();
        capture_loop.run(sink, stop).await.expect("run");

        let mut ticks = Vec::new();
        while let Some(event) = events.next().await {
            match event.payload {
                EventPayload::Tick(tick) => ticks.push(tick),
                EventPayload::Lifecycle(lifecycle)
                    if lifecycle.phase == LifecyclePhase::Shutdown =>
                {
                    break
                }
                _ => {}
            }
        }
        assert_eq!(ticks.len(), 2);
        assert_eq!(ticks[0].changed_pixels, 0);
        assert_eq!(ticks[1].changed_pixels, 1);
        assert_eq!(ticks[1].masks_held, 1);
    }

    /// Hands back frames at whatever size it was given, ignoring the region.
    struct UnfittedSource {
        frames: std::sync::Mutex<Vec<Frame>>,
    }

    #[async_trait::async_trait]
    impl FrameSource for UnfittedSource {
        fn target(&self) -> driftwatch_types::config::CaptureTarget {
            driftwatch_types::config::CaptureTarget::Browser
        }

        async fn probe(&self) -> Result<()> {
            Ok(())
        }

        async fn resolve_region(
            &self,
            _config: &driftwatch_types::config::CaptureConfig,
        ) -> Result<Region> {
            Ok(Region::at_origin(DIMS))
        }

        async fn capture(&self, _region: Region) -> Result<Frame> {
            let mut frames = self.frames.lock().expect("frames");
            if frames.is_empty() {
                return Err(driftwatch_capture::capture_error("no more frames"));
            }
            Ok(frames.remove(0))
        }

        fn metrics(&self) -> driftwatch_capture::CaptureMetrics {
            driftwatch_capture::CaptureMetrics::default()
        }
    }

    #[tokio::test]
    async fn oversized_captures_are_resized_before_entering_the_rings() {
        let big = Dimensions::new(DIMS.width * 3, DIMS.height + 7);
        let source = UnfittedSource {
            frames: std::sync::Mutex::new(vec![
                Frame::solid(big, [0, 0, 0]),
                Frame::solid(Dimensions::new(5, 5), [200, 200, 200]),
                Frame::solid(big, [0, 0, 0]),
            ]),
        };
        let mut capture_loop = CaptureLoop::new(settings(3, 3), source, NullBus).expect("loop");
        let sink = MemorySink::new(capture_loop.output_dimensions());
        let probe = sink.clone();
        let (_handle, stop) = stop_channel();

        let metrics = capture_loop.run(sink, stop).await.expect("run");
        assert_eq!(metrics.rendered_frames, 3);
        assert_eq!(metrics.processing_failures, 0);
        assert!(capture_loop.frames().iter().all(|frame| frame.dimensions() == DIMS));
        assert!(capture_loop.diffs().iter().all(|mask| mask.dimensions() == DIMS));
        let recording = probe.recording();
        let recording = recording.lock().expect("recording");
        for frame in &recording.frames {
            assert_eq!(frame.dimensions(), Dimensions::new(DIMS.width * 2, DIMS.height));
        }
    }

    #[tokio::test]
    async fn startup_failure_is_published() {
        let bus = LocalBus::new(8);
        let mut events = bus.subscribe();
        let source = MockSource::from_frames(Dimensions::new(0, 0), []);
        let result = CaptureLoop::prepare(&DriftwatchConfig::default(), source, bus).await;
        assert!(matches!(result, Err(DriftwatchError::Configuration(_))));

        let event = events.next().await.expect("failure event");
        match event.payload {
            EventPayload::Failure(failure) => {
                assert_eq!(failure.stage, Stage::Startup);
                assert!(!failure.continuing);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn history_below_two_is_rejected() {
        let source = MockSource::from_frames(DIMS, []);
        assert!(CaptureLoop::new(settings(1, 1), source, NullBus).is_err());
    }

    #[test]
    fn cadence_policies() {
        let mut loop_settings = settings(3, 1);
        loop_settings.tick_interval = Duration::from_millis(100);
        assert_eq!(
            loop_settings.cadence_delay(Duration::from_millis(30)),
            Duration::from_millis(100)
        );
        loop_settings.cadence = CadencePolicy::Compensated;
        assert_eq!(
            loop_settings.cadence_delay(Duration::from_millis(30)),
            Duration::from_millis(70)
        );
        assert_eq!(
            loop_settings.cadence_delay(Duration::from_millis(130)),
            Duration::ZERO
        );
    }
}
