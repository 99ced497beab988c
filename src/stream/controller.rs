use anyhow::{anyhow, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::session::{EndReason, SessionStats, StreamSession, StreamState};
use crate::detect::{ModelConfig, ModelRegistry};
use crate::error::StreamError;
use crate::ingest::{FrameSource, ReadOutcome, SourceFactory, SourceSpec, SourceStats};
use crate::render::{RenderedFrame, ResultRenderer};
use crate::schedule::{
    Clock, SampleContext, SampleScheduler, SystemClock, DEFAULT_MIN_INTERVAL, DEFAULT_POLL,
    DEFAULT_STRIDE,
};

/// Everything `start` needs. Fixed for the lifetime of the session.
#[derive(Clone, Debug)]
pub struct StreamConfig {
    pub model: ModelConfig,
    pub source: SourceSpec,
    /// Count-based stride K: every K-th frame is processed.
    pub stride: u64,
    /// Time-based gate for single-capture sources.
    pub min_interval: Duration,
    /// Longest single sleep while waiting on the time gate.
    pub poll: Duration,
}

impl StreamConfig {
    pub fn new(model: ModelConfig, source: SourceSpec) -> Self {
        Self {
            model,
            source,
            stride: DEFAULT_STRIDE,
            min_interval: DEFAULT_MIN_INTERVAL,
            poll: DEFAULT_POLL,
        }
    }

    pub fn with_stride(mut self, stride: u64) -> Self {
        self.stride = stride;
        self
    }

    pub fn with_min_interval(mut self, interval: Duration) -> Self {
        self.min_interval = interval;
        self
    }

    pub fn scheduler(&self) -> Result<SampleScheduler> {
        SampleScheduler::for_source(
            self.source.kind(),
            self.stride,
            self.min_interval,
            self.poll,
        )
    }
}

/// Cooperative stop request, shareable with other threads and signal handlers.
///
/// The controller checks it at the top of every tick and again when the tick ends.
#[derive(Clone, Debug, Default)]
pub struct StopHandle {
    flag: Arc<AtomicBool>,
}

impl StopHandle {
    pub fn request(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    fn clear(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

/// What a single `tick` did.
#[derive(Debug)]
pub enum TickOutcome {
    /// The controller is idle; nothing was read.
    Idle,
    /// A stop request was honored before reading; the session is over.
    Stopped,
    /// The source reported end of stream; the session is over.
    Finished { frames_read: u64 },
    /// The frame was read and dropped by the sampler.
    Skipped { sequence: u64 },
    /// Inference failed for this frame only; the session continues.
    InferenceFailed { sequence: u64, error: StreamError },
    /// The frame was detected and rendered.
    Processed(RenderedFrame),
}

/// Totals from `StreamController::run`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RunReport {
    pub ticks: u64,
    pub processed: u64,
    pub skipped: u64,
    pub inference_failures: u64,
    pub end_reason: Option<EndReason>,
}

struct ActiveSession {
    session: StreamSession,
    source: FrameSource,
    scheduler: SampleScheduler,
    model: ModelConfig,
}

/// Drives acquisition, sampling, inference, and rendering for one session at a time.
///
/// The frame source is owned by the active session, so it is open exactly while
/// the controller is `Active`.
pub struct StreamController {
    registry: ModelRegistry,
    sources: Box<dyn SourceFactory>,
    renderer: ResultRenderer,
    clock: Box<dyn Clock>,
    stop: StopHandle,
    active: Option<ActiveSession>,
    last_session: Option<SessionStats>,
}

impl StreamController {
    pub fn new(
        registry: ModelRegistry,
        sources: Box<dyn SourceFactory>,
        renderer: ResultRenderer,
    ) -> Self {
        Self {
            registry,
            sources,
            renderer,
            clock: Box::new(SystemClock),
            stop: StopHandle::default(),
            active: None,
            last_session: None,
        }
    }

    pub fn with_clock(mut self, clock: Box<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn state(&self) -> StreamState {
        if self.active.is_some() {
            StreamState::Active
        } else {
            StreamState::Idle
        }
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn session(&self) -> Option<&StreamSession> {
        self.active.as_ref().map(|active| &active.session)
    }

    pub fn source_stats(&self) -> Option<SourceStats> {
        self.active.as_ref().map(|active| active.source.stats())
    }

    /// Counters of the most recently ended session.
    pub fn last_session(&self) -> Option<&SessionStats> {
        self.last_session.as_ref()
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    /// Idle -> Active. A no-op while already active.
    ///
    /// Loads the model, then opens the source. On any failure the controller stays
    /// idle and the error (`ModelLoad`, `SourceUnavailable`, `DeviceUnavailable`,
    /// `InvalidConfig`) is returned.
    pub fn start(&mut self, config: &StreamConfig) -> Result<()> {
        if let Some(active) = &self.active {
            log::debug!("start ignored: session {} is active", active.session.id);
            return Ok(());
        }
        config.model.validate()?;
        let scheduler = config.scheduler()?;

        let backend = self.registry.get_or_load(config.model.variant)?.backend_name();
        let source = self.sources.open(&config.source)?;

        self.stop.clear();
        let session = StreamSession::new(source.kind(), self.clock.now());
        log::info!(
            "session {} started: {} with {} ({})",
            session.id,
            config.source.describe(),
            config.model.variant.label(),
            backend
        );
        self.active = Some(ActiveSession {
            session,
            source,
            scheduler,
            model: config.model,
        });
        Ok(())
    }

    /// Active -> Idle, releasing the source immediately. A no-op while idle.
    pub fn stop(&mut self) {
        if self.active.is_none() {
            log::debug!("stop ignored: controller is idle");
            return;
        }
        self.end_session(EndReason::Stopped);
    }

    /// Run one read / sample / infer / render step.
    ///
    /// A read failure ends the session and is returned as `StreamError::StreamRead`.
    /// Inference failures are reported as `TickOutcome::InferenceFailed` and leave
    /// the session running.
    pub fn tick(&mut self) -> Result<TickOutcome> {
        let Some(active) = self.active.as_mut() else {
            return Ok(TickOutcome::Idle);
        };
        if self.stop.is_requested() {
            self.end_session(EndReason::Stopped);
            return Ok(TickOutcome::Stopped);
        }

        let stop = &self.stop;
        let gate_open = active.scheduler.wait_until_due(
            self.clock.as_ref(),
            active.session.last_sample_at,
            || stop.is_requested(),
        );
        if !gate_open {
            self.end_session(EndReason::Stopped);
            return Ok(TickOutcome::Stopped);
        }

        let frame = match active.source.read() {
            Ok(ReadOutcome::Frame(frame)) => frame,
            Ok(ReadOutcome::EndOfStream) => {
                let frames_read = active.session.frame_counter;
                self.end_session(EndReason::EndOfStream);
                return Ok(TickOutcome::Finished { frames_read });
            }
            Err(err) => {
                self.end_session(EndReason::ReadFailed);
                return Err(err);
            }
        };

        active.session.frame_counter += 1;
        let now = self.clock.now();
        let context = SampleContext {
            frame_index: active.session.frame_counter,
            now,
            last_sample_at: active.session.last_sample_at,
        };

        let outcome = if !active.scheduler.should_process(&context) {
            log::debug!(
                "frame {} skipped by sampler ({:?} old)",
                frame.sequence,
                frame.age()
            );
            TickOutcome::Skipped {
                sequence: frame.sequence,
            }
        } else {
            active.session.last_sample_at = Some(now);
            log::debug!("frame {} sampled ({:?} old)", frame.sequence, frame.age());
            let handle = self
                .registry
                .current_mut()
                .ok_or_else(|| anyhow!("no model loaded for active session"))?;
            match handle.infer(&frame, active.model.confidence, active.model.iou) {
                Ok(result) => {
                    let rendered = self.renderer.render(&frame, &result)?;
                    active.session.frames_processed += 1;
                    TickOutcome::Processed(rendered)
                }
                Err(err) => {
                    let Some(error) = StreamError::classify(&err)
                        .filter(|e| !e.is_fatal())
                        .cloned()
                    else {
                        return Err(err);
                    };
                    log::warn!("{}", error);
                    active.session.inference_failures += 1;
                    TickOutcome::InferenceFailed {
                        sequence: frame.sequence,
                        error,
                    }
                }
            }
        };

        if self.stop.is_requested() {
            self.end_session(EndReason::Stopped);
        }
        Ok(outcome)
    }

    /// Tick until the session ends, handing every outcome to `sink`.
    ///
    /// With `max_frames`, the session is stopped once that many frames were read.
    pub fn run<F>(&mut self, max_frames: Option<u64>, mut sink: F) -> Result<RunReport>
    where
        F: FnMut(&TickOutcome) -> Result<()>,
    {
        let mut report = RunReport::default();
        while self.active.is_some() {
            let frames_read = self.session().map_or(0, |s| s.frame_counter);
            if max_frames.is_some_and(|max| frames_read >= max) {
                self.stop();
                break;
            }
            let outcome = self.tick()?;
            report.ticks += 1;
            match &outcome {
                TickOutcome::Processed(_) => report.processed += 1,
                TickOutcome::Skipped { .. } => report.skipped += 1,
                TickOutcome::InferenceFailed { .. } => report.inference_failures += 1,
                TickOutcome::Idle | TickOutcome::Stopped | TickOutcome::Finished { .. } => {}
            }
            sink(&outcome)?;
        }
        report.end_reason = self.last_session.as_ref().map(|s| s.end_reason);
        Ok(report)
    }

    fn end_session(&mut self, reason: EndReason) {
        let Some(mut active) = self.active.take() else {
            return;
        };
        active.source.close();
        let stats = active.session.finish(reason, self.clock.now());
        log::info!(
            "session {} ended ({:?}): {} frames read, {} processed, {} inference failures",
            stats.id,
            reason,
            stats.frames_read,
            stats.frames_processed,
            stats.inference_failures
        );
        self.last_session = Some(stats);
    }
}

impl Drop for StreamController {
    fn drop(&mut self) {
        self.stop();
    }
}
