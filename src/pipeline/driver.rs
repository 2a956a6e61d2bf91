// src/pipeline/driver.rs
//
// The frame loop. Everything here runs on one thread: pull a frame,
// buffer it, score it, feed the state machine, and hand a snapshot to the
// dispatcher when an episode fires. The loop never waits for alerts.

use super::metrics::PipelineMetrics;
use crate::detection::{DetectionStateMachine, TriggerDecision};
use crate::dispatcher::AlertDispatcher;
use crate::evidence::EvidenceBuffer;
use crate::inference::Classifier;
use crate::types::{AlertEpisode, Frame};
use crate::video_processor::FrameSource;
use anyhow::{Context, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    Running,
    Stopping,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    EndOfStream,
    StopRequested,
    /// The source failed mid-stream; treated like the end of the stream
    SourceError,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub frames: u64,
    pub episodes: u64,
    pub reason: StopReason,
}

/// Cloneable stop signal, checked once per frame.
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

type Clock = Box<dyn FnMut() -> f64 + Send>;

pub struct PipelineDriver<S, C> {
    source: S,
    classifier: C,
    evidence: EvidenceBuffer,
    detector: DetectionStateMachine,
    dispatcher: AlertDispatcher,
    metrics: PipelineMetrics,
    stop: StopHandle,
    state: DriverState,
    frame_budget: Option<Duration>,
    clock: Clock,
    frames: u64,
    episodes: u64,
}

impl<S, C> PipelineDriver<S, C>
where
    S: FrameSource,
    C: Classifier,
{
    pub fn new(
        source: S,
        classifier: C,
        evidence: EvidenceBuffer,
        detector: DetectionStateMachine,
        dispatcher: AlertDispatcher,
        metrics: PipelineMetrics,
    ) -> Self {
        let started = Instant::now();
        Self {
            source,
            classifier,
            evidence,
            detector,
            dispatcher,
            metrics,
            stop: StopHandle::new(),
            state: DriverState::Stopped,
            frame_budget: None,
            clock: Box::new(move || started.elapsed().as_secs_f64()),
            frames: 0,
            episodes: 0,
        }
    }

    /// Sleep out the rest of each frame so the loop runs at most `fps`.
    pub fn with_max_fps(mut self, fps: Option<f64>) -> Self {
        self.frame_budget = fps
            .filter(|f| f.is_finite() && *f > 0.0)
            .map(|f| Duration::from_secs_f64(1.0 / f));
        self
    }

    /// Replace the monotonic clock (seconds) fed to the state machine.
    pub fn with_clock(mut self, clock: impl FnMut() -> f64 + Send + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    /// Run until the stream ends or a stop is requested. A classifier
    /// failure stops the loop and is returned as the error. The source is
    /// closed on every path out.
    pub fn run(&mut self) -> Result<RunSummary> {
        self.state = DriverState::Running;
        info!(
            "▶ Starting violence detection (threshold={:.2}, confirm={} frames, cooldown={:.0}s, evidence={} frames)",
            self.detector.config().conf_threshold,
            self.detector.config().frame_count_threshold,
            self.detector.config().alert_cooldown_secs,
            self.evidence.capacity()
        );

        let outcome = self.run_loop();

        self.state = DriverState::Stopping;
        info!("Stopping detection and cleaning up...");
        self.source.close();
        self.state = DriverState::Stopped;

        let summary = self.metrics.summary();
        info!(
            "■ Stopped after {} frame(s) ({:.1} fps), {} episode(s) fired",
            summary.total_frames, summary.fps, self.episodes
        );
        if let Ok(json) = serde_json::to_string(&summary) {
            debug!("Pipeline metrics: {}", json);
        }

        let reason = outcome?;
        Ok(RunSummary {
            frames: self.frames,
            episodes: self.episodes,
            reason,
        })
    }

    fn run_loop(&mut self) -> Result<StopReason> {
        loop {
            if self.stop.is_stopped() {
                info!("Stop requested");
                return Ok(StopReason::StopRequested);
            }

            let tick_start = Instant::now();

            let frame = match self.source.next_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    info!("Stream ended");
                    return Ok(StopReason::EndOfStream);
                }
                Err(e) => {
                    warn!("Error reading frame, ending stream: {:#}", e);
                    return Ok(StopReason::SourceError);
                }
            };

            self.tick(frame)?;

            if let Some(budget) = self.frame_budget {
                let elapsed = tick_start.elapsed();
                if elapsed < budget {
                    std::thread::sleep(budget - elapsed);
                }
            }
        }
    }

    fn tick(&mut self, frame: Frame) -> Result<TriggerDecision> {
        self.frames += 1;
        self.metrics.inc(&self.metrics.total_frames);

        let frame = Arc::new(frame);
        self.evidence.push(frame.clone());

        let inference_start = Instant::now();
        let probability = self
            .classifier
            .score(&frame)
            .with_context(|| format!("classifier failed on frame {}", frame.index))?;
        self.metrics.set_timing(
            &self.metrics.inference_time_us,
            inference_start.elapsed().as_micros() as u64,
        );

        if !(0.0..=1.0).contains(&probability) {
            anyhow::bail!(
                "classifier returned {} for frame {}, expected a probability in [0, 1]",
                probability,
                frame.index
            );
        }

        if probability >= self.detector.config().conf_threshold {
            self.metrics.inc(&self.metrics.frames_above_threshold);
            debug!("Frame {}: VIOLENCE {:.1}%", frame.index, probability * 100.0);
        } else {
            debug!(
                "Frame {}: non-violence {:.1}%",
                frame.index,
                (1.0 - probability) * 100.0
            );
        }

        let now = (self.clock)();
        let decision = self.detector.observe(probability, now);

        if decision.is_fire() {
            warn!(
                "[ALERT] Violence detected at frame {} (p={:.3})! Triggering all alerts in background...",
                frame.index, probability
            );
            let episode = AlertEpisode::new(probability, self.evidence.snapshot());
            // Detached: the loop only knows the dispatch started
            drop(self.dispatcher.fire(episode));
            self.episodes += 1;
        }

        Ok(decision)
    }
}
