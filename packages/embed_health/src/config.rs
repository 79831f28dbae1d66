use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::inference::{
    DEFAULT_CLOSE_CODE, DEFAULT_ERROR_FRAGMENT, DEFAULT_READY_COMMAND, EngineConfig,
};

// =============================================================================
// File config (figment-deserialized from defaults / config.toml / env vars)
// =============================================================================
//
// Three equivalent ways to configure:
//
//   config.toml:     [detection]
//                    error_threshold = 3
//
//   env var:         EMBED_HEALTH_DETECTION__ERROR_THRESHOLD=3   (double underscore = nesting)
//
//   (single underscore stays within field names: EMBED_HEALTH_DETECTION__RECOVERY_WINDOW_MS)

pub const CONFIG_FILE_NAME: &str = "config.toml";
pub const ENV_PREFIX: &str = "EMBED_HEALTH_";

/// Top-level tunable configuration, deserialized by figment.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FileConfig {
    /// URL of the embedded application used when none is given on the command line
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default)]
    pub detection: DetectionFileConfig,
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            detection: DetectionFileConfig::default(),
        }
    }
}

/// Heuristic tunables (lives under `[detection]` in config.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DetectionFileConfig {
    #[serde(default = "default_error_fragment")]
    pub error_fragment: String,
    #[serde(default = "default_close_code")]
    pub close_code: u16,
    #[serde(default = "default_ready_command")]
    pub ready_command: String,
    #[serde(default = "default_error_threshold")]
    pub error_threshold: u32,
    #[serde(default = "default_recovery_window_ms")]
    pub recovery_window_ms: u64,
    #[serde(default = "default_recovery_check_interval_ms")]
    pub recovery_check_interval_ms: u64,
}

impl Default for DetectionFileConfig {
    fn default() -> Self {
        Self {
            error_fragment: default_error_fragment(),
            close_code: default_close_code(),
            ready_command: default_ready_command(),
            error_threshold: default_error_threshold(),
            recovery_window_ms: default_recovery_window_ms(),
            recovery_check_interval_ms: default_recovery_check_interval_ms(),
        }
    }
}

fn default_endpoint() -> String {
    "http://localhost:8081".to_string()
}
fn default_error_fragment() -> String {
    DEFAULT_ERROR_FRAGMENT.to_string()
}
fn default_close_code() -> u16 {
    DEFAULT_CLOSE_CODE
}
fn default_ready_command() -> String {
    DEFAULT_READY_COMMAND.to_string()
}
fn default_error_threshold() -> u32 {
    2
}
fn default_recovery_window_ms() -> u64 {
    10_000
}
fn default_recovery_check_interval_ms() -> u64 {
    5_000
}

/// Build a figment that layers: defaults → config.toml → EMBED_HEALTH_* env vars.
///
/// Env vars use double-underscore for nesting into sections:
///   `EMBED_HEALTH_ENDPOINT=http://n8n:5678`  →  `endpoint = "http://n8n:5678"`
///   `EMBED_HEALTH_DETECTION__CLOSE_CODE=1006`  →  `detection.close_code = 1006`
pub fn load_config(config_dir: &Path) -> figment::Figment {
    use figment::{
        Figment,
        providers::{Env, Format, Serialized, Toml},
    };

    Figment::from(Serialized::defaults(FileConfig::default()))
        .merge(Toml::file(config_dir.join(CONFIG_FILE_NAME)))
        .merge(Env::prefixed(ENV_PREFIX).split("__"))
}

/// `<platform config dir>/embed-health`, or `./embed-health` when the platform has none
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("embed-health")
}

// =============================================================================
// Runtime config (derived from FileConfig)
// =============================================================================

impl EngineConfig {
    pub fn from_file(fc: &DetectionFileConfig) -> Self {
        Self {
            error_fragment: fc.error_fragment.clone(),
            close_code: fc.close_code,
            ready_command: fc.ready_command.clone(),
            error_threshold: fc.error_threshold.max(1),
            recovery_window: Duration::from_millis(fc.recovery_window_ms),
            recovery_check_interval: Duration::from_millis(fc.recovery_check_interval_ms),
        }
    }
}
