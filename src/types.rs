// src/types.rs

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;

/// One decoded video frame, packed RGB8, row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub data: Vec<u8>,
    pub width: usize,
    pub height: usize,
    /// Position in the stream, starting at 0
    pub index: u64,
    pub timestamp_ms: f64,
}

impl Frame {
    pub fn new(data: Vec<u8>, width: usize, height: usize, index: u64, timestamp_ms: f64) -> Self {
        Self {
            data,
            width,
            height,
            index,
            timestamp_ms,
        }
    }

    /// Encode the frame as JPEG for evidence attachments.
    pub fn encode_jpeg(&self, quality: u8) -> Result<Vec<u8>> {
        use image::{ImageBuffer, RgbImage};
        use std::io::Cursor;

        let expected_len = self.width * self.height * 3;
        if self.data.len() < expected_len {
            anyhow::bail!(
                "frame {} has {} bytes, expected {} for {}x{} RGB",
                self.index,
                self.data.len(),
                expected_len,
                self.width,
                self.height
            );
        }

        let img: RgbImage = ImageBuffer::from_raw(
            self.width as u32,
            self.height as u32,
            self.data[..expected_len].to_vec(),
        )
        .context("frame dimensions do not fit the pixel buffer")?;

        let mut buf = Cursor::new(Vec::new());
        let encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut buf, quality);
        img.write_with_encoder(encoder)
            .with_context(|| format!("failed to JPEG-encode frame {}", self.index))?;

        Ok(buf.into_inner())
    }
}

/// A confirmed incident, bundled with the evidence captured when it fired.
///
/// Built exactly once per `Fire` decision and never mutated afterwards; the
/// dispatcher shares it read-only across its channel tasks.
#[derive(Debug, Clone)]
pub struct AlertEpisode {
    pub id: Uuid,
    pub triggered_at: DateTime<Utc>,
    /// Probability of the frame that completed confirmation
    pub probability: f32,
    /// Evidence snapshot, oldest first
    pub evidence: Vec<Arc<Frame>>,
}

impl AlertEpisode {
    pub fn new(probability: f32, evidence: Vec<Arc<Frame>>) -> Self {
        Self {
            id: Uuid::new_v4(),
            triggered_at: Utc::now(),
            probability,
            evidence,
        }
    }

    /// Short label used in every log line about this episode.
    pub fn label(&self) -> String {
        format!(
            "{} @ {}",
            &self.id.to_string()[..8],
            self.triggered_at.format("%Y-%m-%d %H:%M:%S%.3f")
        )
    }
}
