// src/lib.rs

pub mod channels;
pub mod config;
pub mod detection;
pub mod dispatcher;
pub mod evidence;
pub mod inference;
pub mod pipeline;
pub mod preprocessing;
pub mod types;
pub mod video_processor;
