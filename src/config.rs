use anyhow::{Context, Result};
use serde::Deserialize;
use std::time::Duration;

use crate::api::VoiceApi;
use crate::audio::AudioBackendConfig;
use crate::session::{PracticeMode, SessionConfig, TransportKind};

/// Overrides every other source of the backend URL
pub const API_URL_ENV: &str = "AUSSIE_VOICE_API_URL";

const DEFAULT_BASE_URL: &str = "http://localhost:3001/api";

/// Public hosts whose backend lives elsewhere
const PRODUCTION_HOSTS: &[(&str, &str)] = &[
    (
        "youraussieuncle.io",
        "https://aussie-english-practice-production-ef99.up.railway.app/api",
    ),
    (
        "www.youraussieuncle.io",
        "https://aussie-english-practice-production-ef99.up.railway.app/api",
    ),
];

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub backend: BackendConfig,
    pub audio: AudioConfig,
    pub session: SessionSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Explicit API root, e.g. `http://localhost:3001/api`
    pub base_url: Option<String>,
    /// Site the client is deployed under; selects a known backend
    pub site_host: Option<String>,
    pub auth_token: Option<String>,
    pub request_timeout_secs: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            site_host: None,
            auth_token: None,
            request_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub channels: u16,
    pub buffer_duration_ms: u64,
    pub fft_size: usize,
    pub smoothing_time_constant: f32,
    pub min_decibels: f32,
    pub max_decibels: f32,
    pub realtime_playback: bool,
}

impl Default for AudioConfig {
    fn default() -> Self {
        let defaults = AudioBackendConfig::default();
        Self {
            sample_rate: defaults.target_sample_rate,
            channels: defaults.target_channels,
            buffer_duration_ms: defaults.buffer_duration_ms,
            fft_size: defaults.fft_size,
            smoothing_time_constant: defaults.smoothing_time_constant,
            min_decibels: defaults.min_decibels,
            max_decibels: defaults.max_decibels,
            realtime_playback: defaults.realtime_playback,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    pub mode: PracticeMode,
    pub transport: TransportKind,
    pub greeting: Option<String>,
}

impl Default for SessionSettings {
    fn default() -> Self {
        let defaults = SessionConfig::default();
        Self {
            mode: PracticeMode::default(),
            transport: defaults.transport,
            greeting: defaults.greeting,
        }
    }
}

impl Config {
    /// Defaults, then `path` (if it exists), then `AUSSIE_VOICE__*` variables
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(
                config::Environment::with_prefix("AUSSIE_VOICE")
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()
            .with_context(|| format!("Failed to load configuration from {}", path))?;

        settings
            .try_deserialize()
            .context("Invalid configuration")
    }

    /// API root after applying the environment override
    pub fn base_url(&self) -> String {
        resolve_base_url(
            std::env::var(API_URL_ENV).ok().as_deref(),
            self.backend.base_url.as_deref(),
            self.backend.site_host.as_deref(),
        )
    }

    pub fn voice_api(&self) -> Result<VoiceApi> {
        VoiceApi::new(
            self.base_url(),
            self.backend.auth_token.clone(),
            Duration::from_secs(self.backend.request_timeout_secs.max(1)),
        )
    }

    pub fn audio_backend_config(&self) -> AudioBackendConfig {
        AudioBackendConfig {
            target_sample_rate: self.audio.sample_rate,
            target_channels: self.audio.channels,
            buffer_duration_ms: self.audio.buffer_duration_ms,
            fft_size: self.audio.fft_size,
            smoothing_time_constant: self.audio.smoothing_time_constant,
            min_decibels: self.audio.min_decibels,
            max_decibels: self.audio.max_decibels,
            realtime_playback: self.audio.realtime_playback,
        }
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            transport: self.session.transport,
            greeting: self.session.greeting.clone(),
        }
    }
}

/// Pick the backend root: environment, explicit config, known site, local dev
pub fn resolve_base_url(env: Option<&str>, configured: Option<&str>, site_host: Option<&str>) -> String {
    if let Some(url) = env.map(str::trim).filter(|u| !u.is_empty()) {
        return url.to_string();
    }
    if let Some(url) = configured.map(str::trim).filter(|u| !u.is_empty()) {
        return url.to_string();
    }
    if let Some(host) = site_host {
        if let Some((_, url)) = PRODUCTION_HOSTS.iter().find(|(h, _)| h.eq_ignore_ascii_case(host)) {
            return url.to_string();
        }
    }
    DEFAULT_BASE_URL.to_string()
}
