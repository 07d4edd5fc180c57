//! Configuration loading and defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::document::AppState;

/// Default quiet period before a debounced stage is applied.
pub const DEFAULT_STAGE_DEBOUNCE_MS: u64 = 200;

/// App-state keys kept by the storage sanitizer when none are configured.
pub const DEFAULT_APP_STATE_KEYS: &[&str] = &[
    "viewBackgroundColor",
    "theme",
    "gridSize",
    "name",
    "zoom",
    "scrollX",
    "scrollY",
    "currentItemStrokeColor",
    "currentItemBackgroundColor",
    "currentItemFillStyle",
    "currentItemStrokeWidth",
    "currentItemRoughness",
    "currentItemOpacity",
    "currentItemFontFamily",
    "currentItemFontSize",
    "currentItemTextAlign",
    "viewModeEnabled",
    "zenModeEnabled",
];

/// Top-level Xenote configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bridge: Option<BridgeConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage: Option<StorageConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// URL of the embedding document. Outbound messages are scoped to its origin.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub referrer: Option<String>,

    /// Quiet period for debounced staging, in milliseconds (default: 200).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage_debounce_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// App-state keys that survive storage sanitizing.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app_state_keys: Option<Vec<String>>,

    /// Values merged over the built-in default app-state.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_app_state: Option<AppState>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log format: "plain" (default) or "json".
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Log level override (trace/debug/info/warn/error).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
}

fn default_log_format() -> String {
    "plain".into()
}

/// Substitute `${ENV_VAR}` patterns in a string with their environment variable values.
fn substitute_env_vars(input: &str) -> String {
    let re = match regex::Regex::new(r"\$\{([^}]+)\}") {
        Ok(re) => re,
        Err(_) => return input.to_string(),
    };
    re.replace_all(input, |caps: &regex::Captures| {
        std::env::var(&caps[1]).unwrap_or_default()
    })
    .into_owned()
}

impl Config {
    /// Load config from a JSON5 file, substituting `${ENV_VAR}` references.
    ///
    /// A missing file yields the default config.
    pub fn load(path: &Path) -> crate::error::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path)?;
        let substituted = substitute_env_vars(&raw);

        let config: Config = json5::from_str(&substituted)
            .map_err(|e| crate::error::XenoteError::Config(e.to_string()))?;

        tracing::debug!(path = %path.display(), "Loaded config");
        Ok(config)
    }

    /// Write the config as pretty-printed JSON.
    pub fn save(&self, path: &Path) -> crate::error::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Default config file location.
    pub fn default_path() -> PathBuf {
        data_dir().join("config.json")
    }

    /// Referrer URL of the embedding document, if configured.
    pub fn referrer(&self) -> Option<&str> {
        self.bridge.as_ref().and_then(|b| b.referrer.as_deref())
    }

    /// Quiet period for debounced staging.
    pub fn stage_debounce(&self) -> Duration {
        let ms = self
            .bridge
            .as_ref()
            .and_then(|b| b.stage_debounce_ms)
            .unwrap_or(DEFAULT_STAGE_DEBOUNCE_MS);
        Duration::from_millis(ms)
    }

    /// App-state keys kept when sanitizing for storage.
    pub fn app_state_keys(&self) -> Vec<String> {
        self.storage
            .as_ref()
            .and_then(|s| s.app_state_keys.clone())
            .unwrap_or_else(|| DEFAULT_APP_STATE_KEYS.iter().map(|k| k.to_string()).collect())
    }

    /// Configured overrides for the default app-state.
    pub fn default_app_state_overrides(&self) -> AppState {
        self.storage
            .as_ref()
            .and_then(|s| s.default_app_state.clone())
            .unwrap_or_default()
    }

    /// Log level, `info` unless configured.
    pub fn log_level(&self) -> &str {
        self.logging
            .as_ref()
            .and_then(|l| l.level.as_deref())
            .unwrap_or("info")
    }

    /// Whether logs should be emitted as JSON.
    pub fn json_logs(&self) -> bool {
        self.logging.as_ref().is_some_and(|l| l.format == "json")
    }
}

pub fn data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".xenote")
}
