// src/channels/webhook.rs

use super::NotificationChannel;
use crate::types::AlertEpisode;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::time::Duration;
use tracing::info;

/// Pings the alert server, which takes care of the phone notifications.
pub struct WebhookChannel {
    http_client: reqwest::Client,
    url: String,
}

impl WebhookChannel {
    pub fn new(url: String, timeout: Duration) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self { http_client, url })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl NotificationChannel for WebhookChannel {
    fn name(&self) -> &'static str {
        "webhook"
    }

    async fn deliver(&self, episode: &AlertEpisode) -> Result<()> {
        info!("📡 Sending alert ping to server: {} ({})", self.url, episode.label());

        let response = self
            .http_client
            .post(&self.url)
            .send()
            .await
            .with_context(|| format!("could not connect to {}", self.url))?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("alert server answered {}", status);
        }

        info!("📡 Alert ping accepted ({})", status);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::StatusCode, routing::post, Router};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    async fn serve(status: StatusCode, hits: Arc<AtomicUsize>) -> String {
        let app = Router::new().route(
            "/alert",
            post(move |body: String| {
                let hits = hits.clone();
                async move {
                    assert!(body.is_empty());
                    hits.fetch_add(1, Ordering::SeqCst);
                    status
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}/alert", addr)
    }

    #[tokio::test]
    async fn test_accepts_any_2xx() {
        let hits = Arc::new(AtomicUsize::new(0));
        let url = serve(StatusCode::ACCEPTED, hits.clone()).await;

        let channel = WebhookChannel::new(url, Duration::from_secs(5)).unwrap();
        channel
            .deliver(&AlertEpisode::new(0.93, Vec::new()))
            .await
            .unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_server_error_is_a_failure() {
        let hits = Arc::new(AtomicUsize::new(0));
        let url = serve(StatusCode::INTERNAL_SERVER_ERROR, hits.clone()).await;

        let channel = WebhookChannel::new(url, Duration::from_secs(5)).unwrap();
        let err = channel
            .deliver(&AlertEpisode::new(0.93, Vec::new()))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("500"));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unreachable_server_is_a_failure() {
        // Bind then drop to get a port nobody listens on
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let channel =
            WebhookChannel::new(format!("http://{}/alert", addr), Duration::from_secs(2)).unwrap();
        assert!(channel
            .deliver(&AlertEpisode::new(0.93, Vec::new()))
            .await
            .is_err());
    }
}
