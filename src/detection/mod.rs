// src/detection/mod.rs

mod state_machine;

pub use state_machine::{DetectionConfig, DetectionState, DetectionStateMachine, TriggerDecision};
