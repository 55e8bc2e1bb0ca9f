use std::{fs, path::Path, time::Duration};

use serde::Deserialize;
use thiserror::Error;
use url::Url;

use crate::upload::{CompletionPolicy, UploadSettings};

pub const DEFAULT_BACKEND_URL: &str = "http://localhost:8000";
pub const DEFAULT_SETTINGS_FILE: &str = "lifelog.toml";

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("invalid value for {key}: '{value}' ({reason})")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },
    #[error("failed to parse settings file '{path}': {reason}")]
    InvalidFile { path: String, reason: String },
}

#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub backend_url: String,
    pub token_database_url: String,
    pub demo_email: Option<String>,
    pub demo_password: String,
    pub timeline_page_size: u32,
    pub summary_limit: u32,
    pub upload: UploadSettings,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            backend_url: DEFAULT_BACKEND_URL.into(),
            token_database_url: "sqlite://./data/lifelog_client.db".into(),
            demo_email: None,
            demo_password: "demo123".into(),
            timeline_page_size: 20,
            summary_limit: 5,
            upload: UploadSettings::default(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct FileSettings {
    backend_url: Option<String>,
    token_database_url: Option<String>,
    demo_email: Option<String>,
    demo_password: Option<String>,
    timeline_page_size: Option<u32>,
    summary_limit: Option<u32>,
    progress_tick_ms: Option<u64>,
    completion_mode: Option<String>,
    completion_delay_ms: Option<u64>,
    status_poll_ms: Option<u64>,
    status_poll_attempts: Option<u32>,
    max_file_size_bytes: Option<u64>,
}

/// Defaults, then `lifelog.toml` in the working directory, then the environment.
pub fn load_settings() -> Result<ClientSettings, SettingsError> {
    load_settings_with(Path::new(DEFAULT_SETTINGS_FILE), |key: &str| {
        std::env::var(key).ok()
    })
}

pub fn load_settings_with(
    file: &Path,
    env: impl Fn(&str) -> Option<String>,
) -> Result<ClientSettings, SettingsError> {
    let mut file_cfg = FileSettings::default();
    if let Ok(raw) = fs::read_to_string(file) {
        file_cfg = toml::from_str(&raw).map_err(|err| SettingsError::InvalidFile {
            path: file.display().to_string(),
            reason: err.to_string(),
        })?;
    }

    let mut settings = ClientSettings::default();
    let mut completion_mode = file_cfg.completion_mode.clone();
    let mut completion_delay_ms = file_cfg.completion_delay_ms;
    let mut status_poll_ms = file_cfg.status_poll_ms;
    let mut status_poll_attempts = file_cfg.status_poll_attempts;

    if let Some(v) = file_cfg.backend_url {
        settings.backend_url = v;
    }
    if let Some(v) = file_cfg.token_database_url {
        settings.token_database_url = v;
    }
    if let Some(v) = file_cfg.demo_email {
        settings.demo_email = Some(v);
    }
    if let Some(v) = file_cfg.demo_password {
        settings.demo_password = v;
    }
    if let Some(v) = file_cfg.timeline_page_size {
        settings.timeline_page_size = v;
    }
    if let Some(v) = file_cfg.summary_limit {
        settings.summary_limit = v;
    }
    if let Some(v) = file_cfg.progress_tick_ms {
        settings.upload.progress_tick = Duration::from_millis(v);
    }
    if let Some(v) = file_cfg.max_file_size_bytes {
        settings.upload.max_file_size_bytes = v;
    }

    for key in ["NEXT_PUBLIC_BACKEND_URL", "LIFELOG_BACKEND_URL", "APP__BACKEND_URL"] {
        if let Some(v) = env(key) {
            settings.backend_url = v;
        }
    }
    if let Some(v) = env("APP__TOKEN_DATABASE_URL") {
        settings.token_database_url = v;
    }
    if let Some(v) = env("APP__DEMO_EMAIL") {
        settings.demo_email = Some(v);
    }
    if let Some(v) = env("APP__DEMO_PASSWORD") {
        settings.demo_password = v;
    }
    if let Some(v) = env("APP__PROGRESS_TICK_MS") {
        settings.upload.progress_tick = Duration::from_millis(parse_number("APP__PROGRESS_TICK_MS", &v)?);
    }
    if let Some(v) = env("APP__MAX_FILE_SIZE_BYTES") {
        settings.upload.max_file_size_bytes = parse_number("APP__MAX_FILE_SIZE_BYTES", &v)?;
    }
    if let Some(v) = env("APP__COMPLETION_MODE") {
        completion_mode = Some(v);
    }
    if let Some(v) = env("APP__COMPLETION_DELAY_MS") {
        completion_delay_ms = Some(parse_number("APP__COMPLETION_DELAY_MS", &v)?);
    }
    if let Some(v) = env("APP__STATUS_POLL_MS") {
        status_poll_ms = Some(parse_number("APP__STATUS_POLL_MS", &v)?);
    }
    if let Some(v) = env("APP__STATUS_POLL_ATTEMPTS") {
        status_poll_attempts = Some(parse_number("APP__STATUS_POLL_ATTEMPTS", &v)?);
    }

    settings.upload.completion = completion_policy(
        completion_mode.as_deref(),
        completion_delay_ms,
        status_poll_ms,
        status_poll_attempts,
    )?;
    settings.backend_url = normalize_backend_url(&settings.backend_url)?;
    if settings
        .demo_email
        .as_deref()
        .is_some_and(|email| email.trim().is_empty())
    {
        settings.demo_email = None;
    }

    Ok(settings)
}

fn completion_policy(
    mode: Option<&str>,
    delay_ms: Option<u64>,
    poll_ms: Option<u64>,
    poll_attempts: Option<u32>,
) -> Result<CompletionPolicy, SettingsError> {
    let (default_interval, default_attempts) = match CompletionPolicy::default() {
        CompletionPolicy::PollStatus {
            interval,
            max_attempts,
        } => (interval, max_attempts),
        CompletionPolicy::FixedDelay(_) => (Duration::from_secs(1), 30),
    };

    match mode.map(|m| m.trim().to_ascii_lowercase()).as_deref() {
        None | Some("poll") | Some("poll_status") => Ok(CompletionPolicy::PollStatus {
            interval: poll_ms.map(Duration::from_millis).unwrap_or(default_interval),
            max_attempts: poll_attempts.unwrap_or(default_attempts),
        }),
        Some("fixed_delay") | Some("delay") => Ok(CompletionPolicy::FixedDelay(
            Duration::from_millis(delay_ms.unwrap_or(3000)),
        )),
        Some(other) => Err(SettingsError::InvalidValue {
            key: "completion_mode".into(),
            value: other.into(),
            reason: "expected 'poll' or 'fixed_delay'".into(),
        }),
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T, SettingsError>
where
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse::<T>()
        .map_err(|err| SettingsError::InvalidValue {
            key: key.into(),
            value: raw.into(),
            reason: err.to_string(),
        })
}

/// Validates the backend base URL and strips trailing slashes so endpoint
/// paths can be appended verbatim.
pub fn normalize_backend_url(raw: &str) -> Result<String, SettingsError> {
    let trimmed = raw.trim();
    let parsed = Url::parse(trimmed).map_err(|err| SettingsError::InvalidValue {
        key: "backend_url".into(),
        value: raw.into(),
        reason: err.to_string(),
    })?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(SettingsError::InvalidValue {
            key: "backend_url".into(),
            value: raw.into(),
            reason: "backend_url must start with http:// or https://".into(),
        });
    }
    Ok(trimmed.trim_end_matches('/').to_string())
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
