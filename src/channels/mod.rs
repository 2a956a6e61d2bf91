// src/channels/mod.rs
//
// Notification channels. Each one is built once at startup from its
// resolved settings and only exposes `deliver` to the dispatcher.

pub mod buzzer;
pub mod email;
pub mod telephony;
pub mod webhook;

pub use buzzer::BuzzerChannel;
pub use email::EmailChannel;
pub use telephony::TelephonyChannel;
pub use webhook::WebhookChannel;

use crate::config::{Config, Disabled};
use crate::types::AlertEpisode;
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

#[async_trait]
pub trait NotificationChannel: Send + Sync + 'static {
    /// Name used in logs and dispatch reports.
    fn name(&self) -> &'static str;

    async fn deliver(&self, episode: &AlertEpisode) -> Result<()>;
}

/// Build every channel the config allows. A channel that is switched off,
/// lacks credentials or fails to construct is left out and reported once
/// here; the others are unaffected.
pub fn build_channels(config: &Config) -> Vec<Arc<dyn NotificationChannel>> {
    let mut channels: Vec<Arc<dyn NotificationChannel>> = Vec::new();

    match config.email.resolve() {
        Ok(settings) => match EmailChannel::new(settings) {
            Ok(channel) => channels.push(Arc::new(channel)),
            Err(e) => warn!("Channel email disabled: {:#}", e),
        },
        Err(reason) => report_disabled("email", &reason),
    }

    match config.telephony.resolve() {
        Ok(settings) => match TelephonyChannel::new(settings) {
            Ok(channel) => channels.push(Arc::new(channel)),
            Err(e) => warn!("Channel telephony disabled: {:#}", e),
        },
        Err(reason) => report_disabled("telephony", &reason),
    }

    if config.buzzer.enabled {
        match buzzer::open_pin(&config.buzzer) {
            Ok(pin) => channels.push(Arc::new(BuzzerChannel::new(pin, config.buzzer.pulse()))),
            Err(e) => warn!("Channel buzzer disabled: {:#}", e),
        }
    } else {
        report_disabled("buzzer", &Disabled::Off);
    }

    match config.webhook.resolve() {
        Ok((url, timeout)) => match WebhookChannel::new(url, timeout) {
            Ok(channel) => channels.push(Arc::new(channel)),
            Err(e) => warn!("Channel webhook disabled: {:#}", e),
        },
        Err(reason) => report_disabled("webhook", &reason),
    }

    let names: Vec<&str> = channels.iter().map(|c| c.name()).collect();
    info!("✓ {} notification channel(s) active: {:?}", channels.len(), names);

    channels
}

fn report_disabled(name: &str, reason: &Disabled) {
    match reason {
        Disabled::Off => info!("Channel {} off ({})", name, reason),
        Disabled::Missing(_) => warn!("Channel {} disabled: {}", name, reason),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_defaults_only_enable_webhook() {
        // No credentials anywhere: email is missing secrets, telephony and
        // buzzer are off, webhook has a default URL.
        let config = Config::default();
        let channels = build_channels(&config);
        let names: Vec<&str> = channels.iter().map(|c| c.name()).collect();
        assert_eq!(names, vec!["webhook"]);
    }

    #[tokio::test]
    async fn test_unreachable_buzzer_pin_is_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.webhook.enabled = false;
        config.buzzer.enabled = true;
        config.buzzer.sysfs_root = dir.path().join("missing").display().to_string();

        let channels = build_channels(&config);
        assert!(channels.is_empty());
    }

    #[tokio::test]
    async fn test_malformed_email_address_only_drops_email() {
        let mut config = Config::default();
        config
            .apply_env(|key: &str| match key {
                "SENDER_EMAIL" => Some("camera".to_string()),
                "RECEIVER_EMAIL" => Some("guard@example.com".to_string()),
                "GMAIL_APP_PASSWORD" => Some("app-pass".to_string()),
                _ => None,
            })
            .unwrap();
        assert!(config.email.resolve().is_ok());

        let channels = build_channels(&config);
        let names: Vec<&str> = channels.iter().map(|c| c.name()).collect();
        assert_eq!(names, vec!["webhook"]);
    }
}
