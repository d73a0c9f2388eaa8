use std::{fs, path::Path, time::Duration};

use serde::Deserialize;
use tracing::warn;

pub const DEFAULT_CONFIG_FILE: &str = "docchat.toml";
pub const DEFAULT_SERVER_URL: &str = "http://localhost:5000";
pub const DEFAULT_FALLBACK_REPLY: &str = "No response from AI";
const DEFAULT_CHAT_TIMEOUT: Duration = Duration::from_secs(60);
const DEFAULT_UPLOAD_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSettings {
    pub server_url: String,
    /// `None` waits indefinitely.
    pub chat_timeout: Option<Duration>,
    pub upload_timeout: Option<Duration>,
    /// Send the active upload reference as `uploadedFileUrl` with each chat query.
    pub forward_upload_reference: bool,
    pub fallback_reply: String,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.into(),
            chat_timeout: Some(DEFAULT_CHAT_TIMEOUT),
            upload_timeout: Some(DEFAULT_UPLOAD_TIMEOUT),
            forward_upload_reference: true,
            fallback_reply: DEFAULT_FALLBACK_REPLY.into(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileSettings {
    server_url: Option<String>,
    chat_timeout_secs: Option<u64>,
    upload_timeout_secs: Option<u64>,
    forward_upload_reference: Option<bool>,
    fallback_reply: Option<String>,
}

/// Loads settings from `docchat.toml` in the working directory and the
/// process environment.
pub fn load_settings() -> ClientSettings {
    load_settings_from(Path::new(DEFAULT_CONFIG_FILE), |key| std::env::var(key).ok())
}

/// Defaults, then the config file (if readable), then environment overrides.
pub fn load_settings_from(
    path: &Path,
    env: impl Fn(&str) -> Option<String>,
) -> ClientSettings {
    let mut settings = ClientSettings::default();

    if let Ok(raw) = fs::read_to_string(path) {
        match toml::from_str::<FileSettings>(&raw) {
            Ok(file_cfg) => apply_file_settings(&mut settings, file_cfg),
            Err(err) => warn!(path = %path.display(), "ignoring unreadable config file: {err}"),
        }
    }

    if let Some(v) = env("DOCCHAT_SERVER_URL") {
        settings.server_url = v;
    }
    if let Some(v) = env("APP__SERVER_URL") {
        settings.server_url = v;
    }

    if let Some(v) = env("APP__CHAT_TIMEOUT_SECS") {
        match v.trim().parse::<u64>() {
            Ok(secs) => settings.chat_timeout = timeout_from_secs(secs),
            Err(_) => warn!(value = %v, "ignoring invalid APP__CHAT_TIMEOUT_SECS"),
        }
    }
    if let Some(v) = env("APP__UPLOAD_TIMEOUT_SECS") {
        match v.trim().parse::<u64>() {
            Ok(secs) => settings.upload_timeout = timeout_from_secs(secs),
            Err(_) => warn!(value = %v, "ignoring invalid APP__UPLOAD_TIMEOUT_SECS"),
        }
    }

    if let Some(v) = env("APP__FORWARD_UPLOAD_REFERENCE") {
        match parse_flag(&v) {
            Some(flag) => settings.forward_upload_reference = flag,
            None => warn!(value = %v, "ignoring invalid APP__FORWARD_UPLOAD_REFERENCE"),
        }
    }

    if let Some(v) = env("APP__FALLBACK_REPLY") {
        settings.fallback_reply = v;
    }

    settings
}

fn apply_file_settings(settings: &mut ClientSettings, file_cfg: FileSettings) {
    if let Some(v) = file_cfg.server_url {
        settings.server_url = v;
    }
    if let Some(secs) = file_cfg.chat_timeout_secs {
        settings.chat_timeout = timeout_from_secs(secs);
    }
    if let Some(secs) = file_cfg.upload_timeout_secs {
        settings.upload_timeout = timeout_from_secs(secs);
    }
    if let Some(v) = file_cfg.forward_upload_reference {
        settings.forward_upload_reference = v;
    }
    if let Some(v) = file_cfg.fallback_reply {
        settings.fallback_reply = v;
    }
}

/// Zero disables the bound.
pub fn timeout_from_secs(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
