// src/detection/state_machine.rs
//
// Turns the per-frame violence probability into debounced Fire decisions.
// A frame counts towards confirmation when its probability reaches the
// threshold; any frame below it resets the run. Once enough consecutive
// frames agree, the machine fires unless the previous fire is still
// inside the cooldown window.

use tracing::debug;

#[derive(Debug, Clone)]
pub struct DetectionConfig {
    /// CONF_THRESHOLD: probability at or above which a frame counts
    pub conf_threshold: f32,
    /// FRAME_COUNT_THRESHOLD: consecutive frames needed to confirm
    pub frame_count_threshold: u32,
    /// ALERT_COOLDOWN: minimum seconds between two fires
    pub alert_cooldown_secs: f64,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            conf_threshold: 0.90,
            frame_count_threshold: 5,
            alert_cooldown_secs: 60.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TriggerDecision {
    Fire,
    NoFire,
}

impl TriggerDecision {
    pub fn is_fire(self) -> bool {
        matches!(self, TriggerDecision::Fire)
    }
}

/// Observable summary of the machine at a given instant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DetectionState {
    Idle,
    Confirming(u32),
    /// New fires are suppressed until strictly after `until` (seconds)
    Cooldown { until: f64 },
}

pub struct DetectionStateMachine {
    config: DetectionConfig,
    count: u32,
    /// None until the first fire, which behaves as negative infinity
    last_trigger_at: Option<f64>,
}

impl DetectionStateMachine {
    pub fn new(config: DetectionConfig) -> Self {
        Self {
            config,
            count: 0,
            last_trigger_at: None,
        }
    }

    /// Feed one probability observed at `now` (monotonic seconds).
    pub fn observe(&mut self, probability: f32, now: f64) -> TriggerDecision {
        if probability >= self.config.conf_threshold {
            self.count = self.count.saturating_add(1);
        } else {
            self.count = 0;
        }

        let confirmed = self.count >= self.config.frame_count_threshold;
        let cooled_down = match self.last_trigger_at {
            None => true,
            Some(last) => now - last > self.config.alert_cooldown_secs,
        };

        if confirmed && cooled_down {
            debug!(
                "Confirmation reached ({} frames, p={:.3}), firing at t={:.3}s",
                self.count, probability, now
            );
            // Confirmation has to re-accumulate after every fire
            self.count = 0;
            self.last_trigger_at = Some(now);
            return TriggerDecision::Fire;
        }

        if confirmed {
            debug!(
                "Confirmed but cooling down ({:.1}s left)",
                self.cooldown_remaining(now)
            );
        }

        TriggerDecision::NoFire
    }

    pub fn state(&self, now: f64) -> DetectionState {
        if let Some(last) = self.last_trigger_at {
            if now - last <= self.config.alert_cooldown_secs {
                return DetectionState::Cooldown {
                    until: last + self.config.alert_cooldown_secs,
                };
            }
        }
        if self.count > 0 {
            DetectionState::Confirming(self.count)
        } else {
            DetectionState::Idle
        }
    }

    /// Consecutive frames at or above the threshold so far.
    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn last_trigger_at(&self) -> Option<f64> {
        self.last_trigger_at
    }

    pub fn config(&self) -> &DetectionConfig {
        &self.config
    }

    fn cooldown_remaining(&self, now: f64) -> f64 {
        self.last_trigger_at
            .map(|last| (last + self.config.alert_cooldown_secs - now).max(0.0))
            .unwrap_or(0.0)
    }
}
