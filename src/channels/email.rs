// src/channels/email.rs

use super::NotificationChannel;
use crate::config::EmailSettings;
use crate::types::{AlertEpisode, Frame};
use anyhow::{Context, Result};
use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::{Attachment, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use std::sync::Arc;
use tracing::{info, warn};

const SUBJECT: &str = "!!! VIOLENCE ALERT DETECTED !!!";

/// Sends the evidence frames as JPEG attachments over authenticated
/// STARTTLS SMTP.
pub struct EmailChannel {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    to: Mailbox,
    jpeg_quality: u8,
}

impl EmailChannel {
    pub fn new(settings: EmailSettings) -> Result<Self> {
        let from: Mailbox = settings
            .sender
            .parse()
            .with_context(|| format!("invalid sender address {:?}", settings.sender))?;
        let to: Mailbox = settings
            .recipient
            .parse()
            .with_context(|| format!("invalid recipient address {:?}", settings.recipient))?;

        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&settings.smtp_server)
            .with_context(|| format!("invalid SMTP relay {}", settings.smtp_server))?
            .port(settings.smtp_port)
            .credentials(Credentials::new(
                settings.sender.clone(),
                settings.app_password.clone(),
            ))
            .build();

        Ok(Self {
            transport,
            from,
            to,
            jpeg_quality: settings.jpeg_quality,
        })
    }

    /// Assemble the alert message. Frames that fail to encode are skipped
    /// rather than holding back the whole email.
    pub fn build_message(&self, episode: &AlertEpisode) -> Result<Message> {
        let jpegs = encode_evidence(&episode.evidence, self.jpeg_quality);
        self.compose(episode, jpegs)
    }

    fn compose(&self, episode: &AlertEpisode, jpegs: Vec<(usize, Vec<u8>)>) -> Result<Message> {
        let body = format!(
            "Violence detected by your security system at {} (confidence {:.1}%).\n\
             See the {} attached frame(s) for evidence.\n\nIncident id: {}",
            episode.triggered_at.format("%Y-%m-%d %H:%M:%S UTC"),
            episode.probability * 100.0,
            jpegs.len(),
            episode.id,
        );

        let mut parts = MultiPart::mixed().singlepart(SinglePart::plain(body));

        let jpeg = ContentType::parse("image/jpeg").context("bad content type")?;
        for (i, bytes) in jpegs {
            parts = parts.singlepart(
                Attachment::new(format!("frame_{}.jpg", i)).body(bytes, jpeg.clone()),
            );
        }

        Message::builder()
            .from(self.from.clone())
            .to(self.to.clone())
            .subject(SUBJECT)
            .multipart(parts)
            .context("failed to build alert email")
    }
}

/// JPEG-encode each frame, keyed by its position in the evidence.
fn encode_evidence(evidence: &[Arc<Frame>], quality: u8) -> Vec<(usize, Vec<u8>)> {
    evidence
        .iter()
        .enumerate()
        .filter_map(|(i, frame)| match frame.encode_jpeg(quality) {
            Ok(bytes) => Some((i, bytes)),
            Err(e) => {
                warn!("Skipping evidence frame {}: {:#}", frame.index, e);
                None
            }
        })
        .collect()
}

#[async_trait]
impl NotificationChannel for EmailChannel {
    fn name(&self) -> &'static str {
        "email"
    }

    async fn deliver(&self, episode: &AlertEpisode) -> Result<()> {
        info!(
            "✉️ Preparing email with {} frame attachment(s) ({})",
            episode.evidence.len(),
            episode.label()
        );

        let evidence = episode.evidence.clone();
        let quality = self.jpeg_quality;
        let jpegs = tokio::task::spawn_blocking(move || encode_evidence(&evidence, quality))
            .await
            .context("evidence encoding task failed")?;

        let message = self.compose(episode, jpegs)?;
        self.transport
            .send(message)
            .await
            .context("SMTP delivery failed")?;

        info!("✉️ Email alert sent to {}", self.to);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> EmailSettings {
        EmailSettings {
            smtp_server: "smtp.example.com".to_string(),
            smtp_port: 587,
            sender: "camera@example.com".to_string(),
            recipient: "guard@example.com".to_string(),
            app_password: "app-pass".to_string(),
            jpeg_quality: 80,
        }
    }

    #[tokio::test]
    async fn test_one_attachment_per_frame() {
        let channel = EmailChannel::new(settings()).unwrap();
        let evidence = (0..3)
            .map(|i| Arc::new(Frame::new(vec![90u8; 8 * 8 * 3], 8, 8, i, 0.0)))
            .collect();
        let episode = AlertEpisode::new(0.96, evidence);

        let raw = String::from_utf8(channel.build_message(&episode).unwrap().formatted()).unwrap();

        assert!(raw.contains(SUBJECT));
        assert!(raw.contains("guard@example.com"));
        assert_eq!(raw.matches("Content-Type: image/jpeg").count(), 3);
        for i in 0..3 {
            assert!(raw.contains(&format!("frame_{}.jpg", i)));
        }
    }

    #[tokio::test]
    async fn test_bad_frame_is_skipped() {
        let channel = EmailChannel::new(settings()).unwrap();
        let evidence = vec![
            Arc::new(Frame::new(vec![1u8; 4], 8, 8, 0, 0.0)),
            Arc::new(Frame::new(vec![1u8; 8 * 8 * 3], 8, 8, 1, 0.0)),
        ];
        let episode = AlertEpisode::new(0.96, evidence);

        let raw = String::from_utf8(channel.build_message(&episode).unwrap().formatted()).unwrap();
        assert_eq!(raw.matches("Content-Type: image/jpeg").count(), 1);
    }

    #[tokio::test]
    async fn test_encoding_off_the_runtime_keeps_frame_positions() {
        let evidence = vec![
            Arc::new(Frame::new(vec![1u8; 4], 8, 8, 0, 0.0)),
            Arc::new(Frame::new(vec![1u8; 8 * 8 * 3], 8, 8, 1, 0.0)),
            Arc::new(Frame::new(vec![2u8; 8 * 8 * 3], 8, 8, 2, 0.0)),
        ];
        let jpegs = tokio::task::spawn_blocking(move || encode_evidence(&evidence, 80))
            .await
            .unwrap();

        let positions: Vec<usize> = jpegs.iter().map(|(i, _)| *i).collect();
        assert_eq!(positions, vec![1, 2]);
        assert!(jpegs.iter().all(|(_, b)| b.starts_with(&[0xFF, 0xD8])));
    }

    #[test]
    fn test_invalid_address_rejected() {
        let mut bad = settings();
        bad.recipient = "not an address".to_string();
        assert!(EmailChannel::new(bad).is_err());
    }
}
