// src/bin/alert_server.rs
//
// Receives the detector's webhook ping and turns it into an SMS plus a
// voice call.

use anyhow::{Context, Result};
use axum::{extract::State, routing::post, Json, Router};
use incident_watch::channels::TelephonyChannel;
use incident_watch::config::{self, Config, CONFIG_PATH_ENV};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const STATUS: &str = "alert ping received, Twilio notifications triggered";

#[derive(Clone)]
struct AppState {
    telephony: Option<Arc<TelephonyChannel>>,
}

#[derive(Debug, Serialize)]
struct AlertResponse {
    status: &'static str,
}

async fn receive_alert(State(state): State<AppState>) -> Json<AlertResponse> {
    warn!("!!! ALERT PING RECEIVED FROM DETECTOR !!!");

    match &state.telephony {
        Some(telephony) => {
            info!("Triggering SMS and voice call");
            if let Err(e) = telephony.notify().await {
                error!("Telephony notification failed: {:#}", e);
            }
        }
        None => error!("Telephony credentials not set; nothing to trigger"),
    }

    Json(AlertResponse { status: STATUS })
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/alert", post(receive_alert))
        .with_state(state)
}

fn build_state(config: &Config) -> Result<AppState> {
    let telephony = match config.telephony.resolve_credentials() {
        Ok(settings) => Some(Arc::new(TelephonyChannel::new(settings)?)),
        Err(reason) => {
            warn!(
                "One or more Twilio settings are missing ({}); pings will be acknowledged but no calls made",
                reason
            );
            None
        }
    };
    Ok(AppState { telephony })
}

#[tokio::main]
async fn main() -> Result<()> {
    let path = config::resolve_config_path(
        std::env::args().nth(1),
        std::env::var(CONFIG_PATH_ENV).ok(),
    );
    let config = Config::load(&path)?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let app = router(build_state(&config)?);

    let listener = tokio::net::TcpListener::bind(&config.server.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.bind_addr))?;
    info!("📡 Alert server listening on http://{}", config.server.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down alert server");
        })
        .await
        .context("alert server failed")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::Path;
    use axum::http::StatusCode;
    use std::sync::Mutex;

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_ping_acknowledged_without_credentials() {
        let base = serve(router(AppState { telephony: None })).await;

        let response = reqwest::Client::new()
            .post(format!("{}/alert", base))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body["status"], STATUS);
    }

    #[tokio::test]
    async fn test_ping_triggers_sms_and_call() {
        let seen: Arc<Mutex<Vec<String>>> = Arc::default();
        let provider = Router::new()
            .route(
                "/Accounts/{sid}/{resource}",
                post(
                    |State(seen): State<Arc<Mutex<Vec<String>>>>,
                     Path((_sid, resource)): Path<(String, String)>| async move {
                        seen.lock().unwrap().push(resource);
                        (StatusCode::CREATED, Json(serde_json::json!({ "sid": "SM1" })))
                    },
                ),
            )
            .with_state(seen.clone());
        let provider_base = serve(provider).await;

        let mut config = Config::default();
        config.telephony.api_base = provider_base;
        config
            .apply_env(|key: &str| match key {
                "TWILIO_ACCOUNT_SID" => Some("AC1".to_string()),
                "TWILIO_AUTH_TOKEN" => Some("tok".to_string()),
                "TWILIO_PHONE_NUMBER" => Some("+15550001".to_string()),
                "TWIML_BIN_URL" => Some("https://handler.example/twiml".to_string()),
                "TO_PHONE_NUMBER" => Some("+15550002".to_string()),
                _ => None,
            })
            .unwrap();

        let base = serve(router(build_state(&config).unwrap())).await;
        let response = reqwest::Client::new()
            .post(format!("{}/alert", base))
            .send()
            .await
            .unwrap();
        assert!(response.status().is_success());

        let mut resources = seen.lock().unwrap().clone();
        resources.sort();
        assert_eq!(resources, vec!["Calls.json", "Messages.json"]);
    }
}
