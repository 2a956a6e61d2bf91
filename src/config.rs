// src/config.rs
//
// File settings come from YAML, tunables can be overridden from the
// environment, and secrets are only ever read from the environment.

use crate::detection::DetectionConfig;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

pub const DEFAULT_CONFIG_PATH: &str = "config.yaml";
pub const CONFIG_PATH_ENV: &str = "INCIDENT_WATCH_CONFIG";

/// First CLI argument, then `INCIDENT_WATCH_CONFIG`, then `config.yaml`.
pub fn resolve_config_path(arg: Option<String>, env: Option<String>) -> PathBuf {
    arg.or(env)
        .filter(|p| !p.trim().is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub detection: DetectionSettings,
    pub source: SourceConfig,
    pub model: ModelConfig,
    pub email: EmailConfig,
    pub telephony: TelephonyConfig,
    pub buzzer: BuzzerConfig,
    pub webhook: WebhookConfig,
    pub dispatch: DispatchConfig,
    pub logging: LoggingConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionSettings {
    pub conf_threshold: f32,
    pub frame_count_threshold: u32,
    /// Evidence buffer capacity
    pub frame_save_count: usize,
    pub alert_cooldown_secs: f64,
}

impl Default for DetectionSettings {
    fn default() -> Self {
        Self {
            conf_threshold: 0.90,
            frame_count_threshold: 5,
            frame_save_count: 3,
            alert_cooldown_secs: 60.0,
        }
    }
}

impl DetectionSettings {
    pub fn state_machine_config(&self) -> DetectionConfig {
        DetectionConfig {
            conf_threshold: self.conf_threshold,
            frame_count_threshold: self.frame_count_threshold,
            alert_cooldown_secs: self.alert_cooldown_secs,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Images,
    Camera,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub kind: SourceKind,
    /// Device index ("0") or a video file / stream URL
    pub camera: String,
    pub image_dir: String,
    /// Pace the loop to at most this many frames per second
    pub max_fps: Option<f64>,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            kind: SourceKind::Images,
            camera: "0".to_string(),
            image_dir: "frames".to_string(),
            max_fps: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub path: String,
    /// Square input edge in pixels
    pub input_size: usize,
    pub num_threads: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            path: "model.onnx".to_string(),
            input_size: 128,
            num_threads: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmailConfig {
    pub enabled: bool,
    pub smtp_server: String,
    pub smtp_port: u16,
    pub sender: String,
    pub recipient: String,
    pub jpeg_quality: u8,
    #[serde(skip)]
    pub app_password: Option<String>,
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            smtp_server: "smtp.gmail.com".to_string(),
            smtp_port: 587,
            sender: String::new(),
            recipient: String::new(),
            jpeg_quality: 85,
            app_password: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EmailSettings {
    pub smtp_server: String,
    pub smtp_port: u16,
    pub sender: String,
    pub recipient: String,
    pub app_password: String,
    pub jpeg_quality: u8,
}

impl EmailConfig {
    pub fn resolve(&self) -> Result<EmailSettings, Disabled> {
        if !self.enabled {
            return Err(Disabled::Off);
        }
        let mut missing = Vec::new();
        require(&mut missing, "SENDER_EMAIL", Some(&self.sender));
        require(&mut missing, "RECEIVER_EMAIL", Some(&self.recipient));
        require(&mut missing, "GMAIL_APP_PASSWORD", self.app_password.as_ref());
        if !missing.is_empty() {
            return Err(Disabled::Missing(missing));
        }
        Ok(EmailSettings {
            smtp_server: self.smtp_server.clone(),
            smtp_port: self.smtp_port,
            sender: self.sender.clone(),
            recipient: self.recipient.clone(),
            app_password: self.app_password.clone().unwrap_or_default(),
            jpeg_quality: self.jpeg_quality.clamp(1, 100),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelephonyConfig {
    /// The detector normally leaves telephony to the alert server
    pub enabled: bool,
    pub api_base: String,
    pub to_number: String,
    pub sms_body: String,
    pub timeout_secs: u64,
    #[serde(skip)]
    pub account_sid: Option<String>,
    #[serde(skip)]
    pub auth_token: Option<String>,
    #[serde(skip)]
    pub from_number: Option<String>,
    #[serde(skip)]
    pub twiml_url: Option<String>,
}

impl Default for TelephonyConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_base: "https://api.twilio.com/2010-04-01".to_string(),
            to_number: String::new(),
            sms_body: "!!! VIOLENCE ALERT DETECTED !!! Check cameras. Email sent with frame captures."
                .to_string(),
            timeout_secs: 15,
            account_sid: None,
            auth_token: None,
            from_number: None,
            twiml_url: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TelephonySettings {
    pub api_base: String,
    pub account_sid: String,
    pub auth_token: String,
    pub from_number: String,
    pub to_number: String,
    pub twiml_url: String,
    pub sms_body: String,
    pub timeout: Duration,
}

impl TelephonyConfig {
    /// Resolve ignoring the `enabled` switch; the alert server always wants it.
    pub fn resolve_credentials(&self) -> Result<TelephonySettings, Disabled> {
        let mut missing = Vec::new();
        require(&mut missing, "TWILIO_ACCOUNT_SID", self.account_sid.as_ref());
        require(&mut missing, "TWILIO_AUTH_TOKEN", self.auth_token.as_ref());
        require(&mut missing, "TWILIO_PHONE_NUMBER", self.from_number.as_ref());
        require(&mut missing, "TWIML_BIN_URL", self.twiml_url.as_ref());
        require(&mut missing, "TO_PHONE_NUMBER", Some(&self.to_number));
        if !missing.is_empty() {
            return Err(Disabled::Missing(missing));
        }
        Ok(TelephonySettings {
            api_base: self.api_base.trim_end_matches('/').to_string(),
            account_sid: self.account_sid.clone().unwrap_or_default(),
            auth_token: self.auth_token.clone().unwrap_or_default(),
            from_number: self.from_number.clone().unwrap_or_default(),
            to_number: self.to_number.clone(),
            twiml_url: self.twiml_url.clone().unwrap_or_default(),
            sms_body: self.sms_body.clone(),
            timeout: Duration::from_secs(self.timeout_secs.max(1)),
        })
    }

    pub fn resolve(&self) -> Result<TelephonySettings, Disabled> {
        if !self.enabled {
            return Err(Disabled::Off);
        }
        self.resolve_credentials()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BuzzerConfig {
    pub enabled: bool,
    pub pin: u8,
    pub duration_secs: f64,
    pub sysfs_root: String,
}

impl Default for BuzzerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            pin: 17,
            duration_secs: 3.0,
            sysfs_root: "/sys/class/gpio".to_string(),
        }
    }
}

impl BuzzerConfig {
    pub fn pulse(&self) -> Duration {
        Duration::from_secs_f64(self.duration_secs.max(0.0))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookConfig {
    pub enabled: bool,
    pub url: String,
    pub timeout_secs: u64,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            url: "http://127.0.0.1:8000/alert".to_string(),
            timeout_secs: 10,
        }
    }
}

impl WebhookConfig {
    pub fn resolve(&self) -> Result<(String, Duration), Disabled> {
        if !self.enabled {
            return Err(Disabled::Off);
        }
        let mut missing = Vec::new();
        require(&mut missing, "FASTAPI_SERVER_URL", Some(&self.url));
        if !missing.is_empty() {
            return Err(Disabled::Missing(missing));
        }
        Ok((
            self.url.clone(),
            Duration::from_secs(self.timeout_secs.max(1)),
        ))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Upper bound on a single channel's delivery; `None` waits forever
    pub channel_timeout_secs: Option<f64>,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            channel_timeout_secs: Some(30.0),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "incident_watch=info,alert_server=info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8000".to_string(),
        }
    }
}

/// Why a channel is not taking part in dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disabled {
    Off,
    Missing(Vec<&'static str>),
}

impl fmt::Display for Disabled {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Disabled::Off => write!(f, "disabled in config"),
            Disabled::Missing(keys) => write!(f, "missing {}", keys.join(", ")),
        }
    }
}

fn require(missing: &mut Vec<&'static str>, key: &'static str, value: Option<&String>) {
    if value.map_or(true, |v| v.trim().is_empty()) {
        missing.push(key);
    }
}

impl Config {
    /// Load the YAML file (defaults if it does not exist), then apply the
    /// process environment and validate.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        Self::load_with(path, |key| std::env::var(key).ok())
    }

    /// `load` with the environment supplied by `lookup`.
    pub fn load_with<F>(path: impl AsRef<Path>, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let contents = fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            Self::from_yaml(&contents)
                .with_context(|| format!("Failed to parse {}", path.display()))?
        } else {
            info!("{} not found, using built-in defaults", path.display());
            Self::default()
        };

        config.apply_env(lookup)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml(contents: &str) -> Result<Self> {
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(contents)?)
    }

    /// Apply overrides and secrets through `lookup`, so tests never have to
    /// touch the real process environment.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        if let Some(v) = get("CONF_THRESHOLD") {
            self.detection.conf_threshold = parse_key("CONF_THRESHOLD", &v)?;
        }
        if let Some(v) = get("FRAME_COUNT_THRESHOLD") {
            self.detection.frame_count_threshold = parse_key("FRAME_COUNT_THRESHOLD", &v)?;
        }
        if let Some(v) = get("FRAME_SAVE_COUNT") {
            self.detection.frame_save_count = parse_key("FRAME_SAVE_COUNT", &v)?;
        }
        if let Some(v) = get("ALERT_COOLDOWN") {
            self.detection.alert_cooldown_secs = parse_key("ALERT_COOLDOWN", &v)?;
        }
        if let Some(v) = get("BUZZER_PIN") {
            self.buzzer.pin = parse_key("BUZZER_PIN", &v)?;
        }

        if let Some(v) = get("CAMERA_SOURCE") {
            self.source.camera = v;
        }
        if let Some(v) = get("MODEL_FILE_PATH") {
            self.model.path = v;
        }
        if let Some(v) = get("FASTAPI_SERVER_URL") {
            self.webhook.url = v;
        }
        if let Some(v) = get("SENDER_EMAIL") {
            self.email.sender = v;
        }
        if let Some(v) = get("RECEIVER_EMAIL") {
            self.email.recipient = v;
        }
        if let Some(v) = get("TO_PHONE_NUMBER") {
            self.telephony.to_number = v;
        }

        self.email.app_password = get("GMAIL_APP_PASSWORD");
        self.telephony.account_sid = get("TWILIO_ACCOUNT_SID");
        self.telephony.auth_token = get("TWILIO_AUTH_TOKEN");
        self.telephony.from_number = get("TWILIO_PHONE_NUMBER");
        self.telephony.twiml_url = get("TWIML_BIN_URL");

        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let d = &self.detection;
        if !(d.conf_threshold > 0.0 && d.conf_threshold <= 1.0) {
            anyhow::bail!("CONF_THRESHOLD must be in (0, 1], got {}", d.conf_threshold);
        }
        if d.frame_count_threshold == 0 {
            anyhow::bail!("FRAME_COUNT_THRESHOLD must be at least 1");
        }
        if d.frame_save_count == 0 {
            anyhow::bail!("FRAME_SAVE_COUNT must be at least 1");
        }
        if !d.alert_cooldown_secs.is_finite() || d.alert_cooldown_secs < 0.0 {
            anyhow::bail!(
                "ALERT_COOLDOWN must be a non-negative number of seconds, got {}",
                d.alert_cooldown_secs
            );
        }
        if let Some(fps) = self.source.max_fps {
            if !fps.is_finite() || fps <= 0.0 {
                anyhow::bail!("source.max_fps must be positive, got {}", fps);
            }
        }
        if let Some(t) = self.dispatch.channel_timeout_secs {
            if !t.is_finite() || t <= 0.0 {
                anyhow::bail!("dispatch.channel_timeout_secs must be positive, got {}", t);
            }
        }
        if self.model.input_size == 0 {
            anyhow::bail!("model.input_size must be at least 1");
        }
        Ok(())
    }
}

fn parse_key<T>(key: &str, value: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .parse::<T>()
        .with_context(|| format!("{} has an invalid value: {:?}", key, value))
}
