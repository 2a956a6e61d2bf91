// src/pipeline/metrics.rs
//
// Counters shared by the frame loop and the dispatch tasks. Logged as a
// summary when the driver stops.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Clone)]
pub struct PipelineMetrics {
    pub total_frames: Arc<AtomicU64>,
    pub frames_above_threshold: Arc<AtomicU64>,
    pub episodes_fired: Arc<AtomicU64>,
    pub deliveries_succeeded: Arc<AtomicU64>,
    pub deliveries_failed: Arc<AtomicU64>,
    /// Latest classification latency
    pub inference_time_us: Arc<AtomicU64>,
    pub started_at: Instant,
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self {
            total_frames: Arc::new(AtomicU64::new(0)),
            frames_above_threshold: Arc::new(AtomicU64::new(0)),
            episodes_fired: Arc::new(AtomicU64::new(0)),
            deliveries_succeeded: Arc::new(AtomicU64::new(0)),
            deliveries_failed: Arc::new(AtomicU64::new(0)),
            inference_time_us: Arc::new(AtomicU64::new(0)),
            started_at: Instant::now(),
        }
    }

    pub fn inc(&self, counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_timing(&self, counter: &AtomicU64, duration_us: u64) {
        counter.store(duration_us, Ordering::Relaxed);
    }

    pub fn fps(&self) -> f64 {
        let frames = self.total_frames.load(Ordering::Relaxed);
        let elapsed = self.started_at.elapsed().as_secs_f64();
        if elapsed > 0.01 {
            frames as f64 / elapsed
        } else {
            0.0
        }
    }

    pub fn summary(&self) -> MetricsSummary {
        MetricsSummary {
            total_frames: self.total_frames.load(Ordering::Relaxed),
            fps: self.fps(),
            frames_above_threshold: self.frames_above_threshold.load(Ordering::Relaxed),
            episodes_fired: self.episodes_fired.load(Ordering::Relaxed),
            deliveries_succeeded: self.deliveries_succeeded.load(Ordering::Relaxed),
            deliveries_failed: self.deliveries_failed.load(Ordering::Relaxed),
            last_inference_us: self.inference_time_us.load(Ordering::Relaxed),
            elapsed_secs: self.started_at.elapsed().as_secs_f64(),
        }
    }
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct MetricsSummary {
    pub total_frames: u64,
    pub fps: f64,
    pub frames_above_threshold: u64,
    pub episodes_fired: u64,
    pub deliveries_succeeded: u64,
    pub deliveries_failed: u64,
    pub last_inference_us: u64,
    pub elapsed_secs: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_counters() {
        let metrics = PipelineMetrics::new();
        let other = metrics.clone();
        other.inc(&other.episodes_fired);
        metrics.inc(&metrics.total_frames);
        metrics.set_timing(&metrics.inference_time_us, 1_250);

        let summary = metrics.summary();
        assert_eq!(summary.episodes_fired, 1);
        assert_eq!(summary.total_frames, 1);
        assert_eq!(summary.last_inference_us, 1_250);

        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["episodes_fired"], 1);
    }
}
