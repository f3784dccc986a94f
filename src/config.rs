// Конфигурация приложения
// Уровень логирования по умолчанию зависит от режима сборки

use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

#[cfg(debug_assertions)]
pub const DEFAULT_LOG_FILTER: &str = "callsync_lib=debug,callsync=debug,webrtc=warn"; // В режиме отладки подробный лог

#[cfg(not(debug_assertions))]
pub const DEFAULT_LOG_FILTER: &str = "callsync_lib=info,callsync=info,webrtc=error"; // В продакшене только важное

/// Поведение при состоянии `Failed`
#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum FailedPolicy {
    /// Один ICE restart в пределах `failure_grace_window`, затем сброс
    #[default]
    RestartOnce,
    /// Сразу сбрасываем сессию и ищем нового собеседника
    ResetImmediately,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct RecoveryConfig {
    pub recovery_window_ms: u64,
    pub failure_grace_window_ms: u64,
    pub failed_policy: FailedPolicy,
    pub max_ice_restarts: u32,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            recovery_window_ms: 3_000,
            failure_grace_window_ms: 5_000,
            failed_policy: FailedPolicy::RestartOnce,
            max_ice_restarts: 1,
        }
    }
}

impl RecoveryConfig {
    pub fn recovery_window(&self) -> Duration {
        Duration::from_millis(self.recovery_window_ms)
    }

    pub fn failure_grace_window(&self) -> Duration {
        Duration::from_millis(self.failure_grace_window_ms)
    }
}

/// Какие локальные треки отдаёт источник медиа
#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct MediaConfig {
    pub audio: bool,
    pub video: bool,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            audio: true,
            video: true,
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct Config {
    pub signaling_url: String,
    pub turn_config_url: Option<String>,
    pub reconnect_delay_ms: u64,
    pub log_filter: Option<String>,
    pub recovery: RecoveryConfig,
    pub media: MediaConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            signaling_url: "ws://localhost:8080/ws".into(),
            turn_config_url: None,
            reconnect_delay_ms: 2_000,
            log_filter: None,
            recovery: RecoveryConfig::default(),
            media: MediaConfig::default(),
        }
    }
}

impl Config {
    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| Error::Config(e.to_string()))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn log_filter(&self) -> &str {
        self.log_filter.as_deref().unwrap_or(DEFAULT_LOG_FILTER)
    }
}
