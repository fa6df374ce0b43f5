use std::{fs, path::Path, time::Duration};

use client_core::{CommandSenderConfig, ReconnectPolicy, StatusChannelConfig};
use serde::Deserialize;
use session::SessionTimings;

pub const CONFIG_FILE: &str = "gait.toml";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub api_base_url: String,
    pub ws_path: String,
    pub auth_token: Option<String>,
    pub reconnect_enabled: bool,
    pub reconnect_delay_ms: u64,
    pub reconnect_max_attempts: u32,
    pub advance_delay_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:8080".into(),
            ws_path: "/ws/websocket".into(),
            auth_token: None,
            reconnect_enabled: true,
            reconnect_delay_ms: 1_000,
            reconnect_max_attempts: 5,
            advance_delay_ms: 1_000,
        }
    }
}

/// Optional keys accepted in `gait.toml`.
#[derive(Debug, Default, Deserialize)]
struct FileSettings {
    api_base_url: Option<String>,
    ws_path: Option<String>,
    auth_token: Option<String>,
    reconnect_enabled: Option<bool>,
    reconnect_delay_ms: Option<u64>,
    reconnect_max_attempts: Option<u32>,
    advance_delay_ms: Option<u64>,
}

impl Settings {
    pub fn status_channel_config(&self) -> StatusChannelConfig {
        let mut config = StatusChannelConfig::new(self.api_base_url.clone());
        config.ws_path = self.ws_path.clone();
        config.auth_token = self.auth_token.clone();
        config.reconnect = ReconnectPolicy {
            enabled: self.reconnect_enabled,
            delay: Duration::from_millis(self.reconnect_delay_ms),
            max_attempts: self.reconnect_max_attempts,
            ..ReconnectPolicy::default()
        };
        config
    }

    pub fn command_sender_config(&self) -> CommandSenderConfig {
        let mut config = CommandSenderConfig::new(self.api_base_url.clone());
        config.auth_token = self.auth_token.clone();
        config
    }

    pub fn session_timings(&self) -> SessionTimings {
        SessionTimings {
            advance_delay: Duration::from_millis(self.advance_delay_ms),
            ..SessionTimings::default()
        }
    }

    fn merge_file(&mut self, file: FileSettings) {
        if let Some(v) = file.api_base_url {
            self.api_base_url = v;
        }
        if let Some(v) = file.ws_path {
            self.ws_path = v;
        }
        if let Some(v) = file.auth_token {
            self.auth_token = Some(v);
        }
        if let Some(v) = file.reconnect_enabled {
            self.reconnect_enabled = v;
        }
        if let Some(v) = file.reconnect_delay_ms {
            self.reconnect_delay_ms = v;
        }
        if let Some(v) = file.reconnect_max_attempts {
            self.reconnect_max_attempts = v;
        }
        if let Some(v) = file.advance_delay_ms {
            self.advance_delay_ms = v;
        }
    }

    fn merge_env(&mut self, env: impl Fn(&str) -> Option<String>) {
        if let Some(v) = env("GAIT_API_BASE_URL") {
            self.api_base_url = v;
        }
        if let Some(v) = env("APP__API_BASE_URL") {
            self.api_base_url = v;
        }

        if let Some(v) = env("GAIT_AUTH_TOKEN") {
            self.auth_token = Some(v);
        }

        if let Some(v) = env("APP__WS_PATH") {
            self.ws_path = v;
        }

        if let Some(v) = env("APP__RECONNECT_ENABLED") {
            if let Ok(parsed) = v.parse::<bool>() {
                self.reconnect_enabled = parsed;
            }
        }
        if let Some(v) = env("APP__RECONNECT_DELAY_MS") {
            if let Ok(parsed) = v.parse::<u64>() {
                self.reconnect_delay_ms = parsed;
            }
        }
        if let Some(v) = env("APP__RECONNECT_MAX_ATTEMPTS") {
            if let Ok(parsed) = v.parse::<u32>() {
                self.reconnect_max_attempts = parsed;
            }
        }
        if let Some(v) = env("APP__ADVANCE_DELAY_MS") {
            if let Ok(parsed) = v.parse::<u64>() {
                self.advance_delay_ms = parsed;
            }
        }
    }
}

/// Defaults, then `gait.toml` in the working directory, then the environment.
pub fn load_settings() -> Settings {
    load_settings_from(Path::new(CONFIG_FILE), |key| std::env::var(key).ok())
}

fn load_settings_from(path: &Path, env: impl Fn(&str) -> Option<String>) -> Settings {
    let mut settings = Settings::default();

    if let Ok(raw) = fs::read_to_string(path) {
        match toml::from_str::<FileSettings>(&raw) {
            Ok(file) => settings.merge_file(file),
            Err(err) => tracing::warn!(
                path = %path.display(),
                error = %err,
                "config: ignoring unreadable settings file"
            ),
        }
    }

    settings.merge_env(env);
    settings
}
