// src/channels/telephony.rs
//
// SMS + voice call through a Twilio-compatible REST API. The detector can
// use this directly, and the alert server uses it when pinged.

use super::NotificationChannel;
use crate::config::TelephonySettings;
use crate::types::AlertEpisode;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::{error, info};

pub struct TelephonyChannel {
    http_client: reqwest::Client,
    settings: TelephonySettings,
}

/// The part of the provider's resource we log.
#[derive(Debug, Deserialize)]
struct CreatedResource {
    sid: Option<String>,
}

impl TelephonyChannel {
    pub fn new(settings: TelephonySettings) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(settings.timeout)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            http_client,
            settings,
        })
    }

    /// Send the alert text message. Returns the provider's message SID.
    pub async fn send_sms(&self) -> Result<String> {
        info!("📱 Sending SMS alert to {}", self.settings.to_number);
        let sid = self
            .create(
                "Messages.json",
                &[
                    ("To", self.settings.to_number.as_str()),
                    ("From", self.settings.from_number.as_str()),
                    ("Body", self.settings.sms_body.as_str()),
                ],
            )
            .await
            .context("failed to send SMS")?;
        info!("📱 SMS alert sent (SID: {})", sid);
        Ok(sid)
    }

    /// Start the automated voice call. Returns the provider's call SID.
    pub async fn make_voice_call(&self) -> Result<String> {
        info!("📞 Starting voice call to {}", self.settings.to_number);
        let sid = self
            .create(
                "Calls.json",
                &[
                    ("To", self.settings.to_number.as_str()),
                    ("From", self.settings.from_number.as_str()),
                    ("Url", self.settings.twiml_url.as_str()),
                ],
            )
            .await
            .context("failed to make voice call")?;
        info!("📞 Voice call initiated (SID: {})", sid);
        Ok(sid)
    }

    /// Attempt both notifications; fails if either fails.
    pub async fn notify(&self) -> Result<()> {
        let (sms, call) = tokio::join!(self.send_sms(), self.make_voice_call());

        match (sms, call) {
            (Ok(_), Ok(_)) => Ok(()),
            (Err(e), Ok(_)) | (Ok(_), Err(e)) => Err(e),
            (Err(sms_err), Err(call_err)) => {
                error!("Both telephony notifications failed");
                Err(anyhow::anyhow!("{:#}; {:#}", sms_err, call_err))
            }
        }
    }

    async fn create(&self, resource: &str, form: &[(&str, &str)]) -> Result<String> {
        let url = format!(
            "{}/Accounts/{}/{}",
            self.settings.api_base, self.settings.account_sid, resource
        );

        let response = self
            .http_client
            .post(&url)
            .basic_auth(&self.settings.account_sid, Some(&self.settings.auth_token))
            .form(form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<no body>".to_string());
            anyhow::bail!("provider returned {}: {}", status, body);
        }

        let created: CreatedResource = response
            .json()
            .await
            .context("unexpected provider response")?;
        Ok(created.sid.unwrap_or_else(|| "<unknown>".to_string()))
    }
}

#[async_trait]
impl NotificationChannel for TelephonyChannel {
    fn name(&self) -> &'static str {
        "telephony"
    }

    async fn deliver(&self, episode: &AlertEpisode) -> Result<()> {
        info!("Triggering telephony notifications for {}", episode.label());
        self.notify().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        extract::{Form, Path, State},
        http::{header, HeaderMap, StatusCode},
        routing::post,
        Json, Router,
    };
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    #[derive(Clone, Default)]
    struct Provider {
        requests: Arc<Mutex<Vec<(String, String, HashMap<String, String>)>>>,
        fail_calls: bool,
    }

    async fn create(
        State(provider): State<Provider>,
        Path((sid, resource)): Path<(String, String)>,
        headers: HeaderMap,
        Form(form): Form<HashMap<String, String>>,
    ) -> (StatusCode, Json<serde_json::Value>) {
        assert!(headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.starts_with("Basic ")));

        provider
            .requests
            .lock()
            .unwrap()
            .push((sid, resource.clone(), form));

        if provider.fail_calls && resource == "Calls.json" {
            return (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({ "message": "invalid number" })),
            );
        }
        (
            StatusCode::CREATED,
            Json(serde_json::json!({ "sid": format!("SID-{}", resource) })),
        )
    }

    async fn spawn_provider(provider: Provider) -> String {
        let app = Router::new()
            .route("/Accounts/{sid}/{resource}", post(create))
            .with_state(provider);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn settings(api_base: String) -> TelephonySettings {
        TelephonySettings {
            api_base,
            account_sid: "AC42".to_string(),
            auth_token: "secret".to_string(),
            from_number: "+15550001".to_string(),
            to_number: "+15550002".to_string(),
            twiml_url: "https://handler.example/twiml".to_string(),
            sms_body: "alert".to_string(),
            timeout: Duration::from_secs(5),
        }
    }

    #[tokio::test]
    async fn test_sends_sms_and_call() {
        let provider = Provider::default();
        let base = spawn_provider(provider.clone()).await;

        let channel = TelephonyChannel::new(settings(base)).unwrap();
        channel
            .deliver(&AlertEpisode::new(0.99, Vec::new()))
            .await
            .unwrap();

        let requests = provider.requests.lock().unwrap();
        assert_eq!(requests.len(), 2);

        let sms = requests.iter().find(|r| r.1 == "Messages.json").unwrap();
        assert_eq!(sms.0, "AC42");
        assert_eq!(sms.2["To"], "+15550002");
        assert_eq!(sms.2["Body"], "alert");

        let call = requests.iter().find(|r| r.1 == "Calls.json").unwrap();
        assert_eq!(call.2["Url"], "https://handler.example/twiml");
        assert_eq!(call.2["From"], "+15550001");
    }

    #[tokio::test]
    async fn test_failed_call_still_sends_sms() {
        let provider = Provider {
            fail_calls: true,
            ..Provider::default()
        };
        let base = spawn_provider(provider.clone()).await;

        let channel = TelephonyChannel::new(settings(base)).unwrap();
        let err = channel
            .deliver(&AlertEpisode::new(0.99, Vec::new()))
            .await
            .unwrap_err();

        assert!(format!("{:#}", err).contains("voice call"));
        let requests = provider.requests.lock().unwrap();
        assert!(requests.iter().any(|r| r.1 == "Messages.json"));
    }
}
