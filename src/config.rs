//! Engine configuration: JSON file with per-section defaults and env overrides.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::keypoints::motion::DEFAULT_VELOCITY_CORRECTION;
use crate::recognizer::state_machine::SegmentationThresholds;
use crate::recognizer::vote::{required_votes, VoteRounding};

pub const DEFAULT_CONFIG_PATH: &str = "quietcare.json";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid configuration value for {key}: {message}")]
    Invalid { key: &'static str, message: String },
}

fn invalid(key: &'static str, message: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        key,
        message: message.into(),
    }
}

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct EngineConfig {
    pub server: ServerConfig,
    pub models: ModelPaths,
    pub worker: WorkerConfig,
    pub recognizer: RecognizerConfig,
    pub translator: TranslatorConfig,
    pub sessions: SessionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_addr: String,
    /// Upper bound on an uploaded frame.
    pub max_frame_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:8000".to_string(),
            max_frame_bytes: 8 * 1024 * 1024,
        }
    }
}

/// Model artifact locations.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ModelPaths {
    pub classifier: PathBuf,
    pub labels: PathBuf,
    /// Per-dimension mean/std. Absent is valid.
    pub stats: Option<PathBuf>,
    pub translator_model: Option<PathBuf>,
    pub translator_tokenizer: Option<PathBuf>,
}

impl Default for ModelPaths {
    fn default() -> Self {
        Self::in_dir(Path::new("models"))
    }
}

impl ModelPaths {
    /// Conventional layout inside a models directory.
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            classifier: dir.join("classifier.pth"),
            labels: dir.join("labels.txt"),
            stats: Some(dir.join("mean_std.json")),
            translator_model: Some(dir.join("gloss-bart-model")),
            translator_tokenizer: Some(dir.join("gloss-bart-tokenizer")),
        }
    }
}

/// Python model worker pool.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WorkerConfig {
    pub python_bin: String,
    pub script: PathBuf,
    pub pool_size: usize,
    pub health_interval_secs: u64,
    pub max_health_failures: u32,
    /// Per-session landmark trackers each worker keeps before dropping the
    /// least recently used.
    pub max_trackers: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            python_bin: "python3".to_string(),
            script: PathBuf::from("model-worker/worker.py"),
            pool_size: 2,
            health_interval_secs: 30,
            max_health_failures: 3,
            max_trackers: 64,
        }
    }
}

/// Recognition tunables.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RecognizerConfig {
    pub start_threshold: f32,
    pub end_threshold: f32,
    pub end_stability_frames: u32,
    /// Classify at most once every this many frames.
    pub prediction_rate: u64,
    /// Majority-vote window capacity.
    pub prediction_queue_length: usize,
    pub majority_vote_threshold: f32,
    pub vote_rounding: VoteRounding,
    pub require_hand: bool,
    /// Sequence buffer capacity in frames.
    pub sequence_length: usize,
    pub velocity_correction: f32,
    pub clear_buffer_on_start: bool,
    /// Ask the extractor to mirror frames (selfie cameras).
    pub mirror_frames: bool,
}

impl Default for RecognizerConfig {
    fn default() -> Self {
        Self {
            start_threshold: 0.02,
            end_threshold: 0.01,
            end_stability_frames: 8,
            prediction_rate: 5,
            prediction_queue_length: 15,
            majority_vote_threshold: 0.5,
            vote_rounding: VoteRounding::Ceil,
            require_hand: true,
            sequence_length: 50,
            velocity_correction: DEFAULT_VELOCITY_CORRECTION,
            clear_buffer_on_start: false,
            mirror_frames: true,
        }
    }
}

impl RecognizerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.end_threshold >= 0.0) {
            return Err(invalid("end_threshold", "must be non-negative"));
        }
        if !(self.start_threshold > self.end_threshold) {
            return Err(invalid(
                "start_threshold",
                format!(
                    "must exceed end_threshold ({} <= {})",
                    self.start_threshold, self.end_threshold
                ),
            ));
        }
        if self.end_stability_frames == 0 {
            return Err(invalid("end_stability_frames", "must be at least 1"));
        }
        if self.prediction_rate == 0 {
            return Err(invalid("prediction_rate", "must be at least 1"));
        }
        if self.prediction_queue_length == 0 {
            return Err(invalid("prediction_queue_length", "must be at least 1"));
        }
        if !(self.majority_vote_threshold > 0.0 && self.majority_vote_threshold <= 1.0) {
            return Err(invalid("majority_vote_threshold", "must be in (0, 1]"));
        }
        if self.sequence_length == 0 {
            return Err(invalid("sequence_length", "must be at least 1"));
        }
        if !(self.velocity_correction > 0.0) {
            return Err(invalid("velocity_correction", "must be positive"));
        }
        Ok(())
    }

    pub fn thresholds(&self) -> SegmentationThresholds {
        SegmentationThresholds {
            start: self.start_threshold,
            end: self.end_threshold,
            end_stability_frames: self.end_stability_frames,
            require_hand: self.require_hand,
        }
    }

    pub fn required_votes(&self) -> usize {
        required_votes(
            self.prediction_queue_length,
            self.majority_vote_threshold,
            self.vote_rounding,
        )
    }
}

/// Which sentence generator backs the translator.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TranslatorBackend {
    Worker,
    Remote,
    Disabled,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TranslatorConfig {
    pub backend: TranslatorBackend,
    pub max_length: u32,
    pub cache_capacity: usize,
    pub cache_ttl_secs: u64,
    pub remote: RemoteConfig,
}

impl Default for TranslatorConfig {
    fn default() -> Self {
        Self {
            backend: TranslatorBackend::Worker,
            max_length: 50,
            cache_capacity: 256,
            cache_ttl_secs: 600,
            remote: RemoteConfig::default(),
        }
    }
}

/// OpenAI-compatible chat-completions endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RemoteConfig {
    pub base_url: String,
    pub model: String,
    pub api_key_env: String,
    pub timeout_secs: u64,
    pub min_interval_ms: u64,
    /// Retries after HTTP 429 before giving up.
    pub max_rate_limit_retries: u32,
    /// Retries after a 5xx response.
    pub max_server_error_retries: u32,
    /// First 5xx backoff; doubles per attempt.
    pub backoff_base_ms: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.deepseek.com".to_string(),
            model: "deepseek-chat".to_string(),
            api_key_env: "QUIETCARE_TRANSLATOR_API_KEY".to_string(),
            timeout_secs: 30,
            min_interval_ms: 100,
            max_rate_limit_retries: 3,
            max_server_error_retries: 2,
            backoff_base_ms: 500,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionConfig {
    pub capacity: usize,
    pub idle_ttl_secs: u64,
    pub sweep_interval_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            capacity: 64,
            idle_ttl_secs: 300,
            sweep_interval_secs: 30,
        }
    }
}

impl SessionConfig {
    pub fn idle_ttl(&self) -> Duration {
        Duration::from_secs(self.idle_ttl_secs)
    }
}

impl EngineConfig {
    /// Load from a JSON file. Missing fields use defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    /// Load from a file, or defaults if the file does not exist.
    /// Malformed files are still an error.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        match Self::load(path) {
            Err(ConfigError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                Ok(Self::default())
            }
            other => other,
        }
    }

    /// Apply environment variable overrides:
    /// - QUIETCARE_LISTEN_ADDR → server.listen_addr
    /// - QUIETCARE_PYTHON → worker.python_bin
    /// - QUIETCARE_MODELS_DIR → models.* (conventional layout)
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(addr) = non_empty_env("QUIETCARE_LISTEN_ADDR") {
            self.server.listen_addr = addr;
        }
        if let Some(python) = non_empty_env("QUIETCARE_PYTHON") {
            self.worker.python_bin = python;
        }
        if let Some(dir) = non_empty_env("QUIETCARE_MODELS_DIR") {
            self.models = ModelPaths::in_dir(Path::new(&dir));
        }
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.listen_addr()?;
        self.recognizer.validate()?;
        if self.worker.pool_size == 0 {
            return Err(invalid("worker.pool_size", "must be at least 1"));
        }
        if self.worker.max_trackers == 0 {
            return Err(invalid("worker.max_trackers", "must be at least 1"));
        }
        if self.sessions.capacity == 0 {
            return Err(invalid("sessions.capacity", "must be at least 1"));
        }
        if self.translator.cache_capacity == 0 {
            return Err(invalid("translator.cache_capacity", "must be at least 1"));
        }
        Ok(())
    }

    pub fn listen_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.server
            .listen_addr
            .parse()
            .map_err(|e| invalid("server.listen_addr", format!("{e}")))
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::Mutex;
    use tempfile::NamedTempFile;

    // Serializes tests that touch process environment.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn test_defaults_match_reference_tuning() {
        let config = RecognizerConfig::default();
        assert_eq!(config.start_threshold, 0.02);
        assert_eq!(config.end_threshold, 0.01);
        assert_eq!(config.end_stability_frames, 8);
        assert_eq!(config.prediction_rate, 5);
        assert_eq!(config.prediction_queue_length, 15);
        assert_eq!(config.majority_vote_threshold, 0.5);
        assert!(config.require_hand);
        assert_eq!(config.sequence_length, 50);
        assert_eq!(config.velocity_correction, 3.0);
        assert_eq!(config.required_votes(), 8);
        assert!(config.validate().is_ok());
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn test_inverted_thresholds_rejected() {
        let config = RecognizerConfig {
            start_threshold: 0.01,
            end_threshold: 0.02,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid {
                key: "start_threshold",
                ..
            })
        ));

        let equal = RecognizerConfig {
            start_threshold: 0.02,
            end_threshold: 0.02,
            ..Default::default()
        };
        assert!(equal.validate().is_err());
    }

    #[test]
    fn test_zero_values_rejected() {
        let cases = [
            RecognizerConfig {
                end_stability_frames: 0,
                ..Default::default()
            },
            RecognizerConfig {
                prediction_rate: 0,
                ..Default::default()
            },
            RecognizerConfig {
                prediction_queue_length: 0,
                ..Default::default()
            },
            RecognizerConfig {
                sequence_length: 0,
                ..Default::default()
            },
            RecognizerConfig {
                majority_vote_threshold: 0.0,
                ..Default::default()
            },
            RecognizerConfig {
                velocity_correction: 0.0,
                ..Default::default()
            },
            RecognizerConfig {
                start_threshold: f32::NAN,
                ..Default::default()
            },
        ];
        for config in cases {
            assert!(config.validate().is_err(), "{config:?} should be invalid");
        }
    }

    #[test]
    fn test_load_partial_json_uses_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "server": {{"listen_addr": "0.0.0.0:9000"}},
                "recognizer": {{"prediction_rate": 3, "vote_rounding": "floor"}},
                "translator": {{"backend": "disabled"}}
            }}"#
        )
        .unwrap();

        let config = EngineConfig::load(file.path()).unwrap();
        assert_eq!(config.server.listen_addr, "0.0.0.0:9000");
        assert_eq!(config.recognizer.prediction_rate, 3);
        assert_eq!(config.recognizer.vote_rounding, VoteRounding::Floor);
        assert_eq!(config.recognizer.required_votes(), 7);
        assert_eq!(config.recognizer.sequence_length, 50);
        assert_eq!(config.translator.backend, TranslatorBackend::Disabled);
        assert_eq!(config.sessions, SessionConfig::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let config = EngineConfig::load_or_default(Path::new("/nonexistent/quietcare.json")).unwrap();
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn test_load_or_default_malformed_file_is_error() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{{ not json").unwrap();
        assert!(matches!(
            EngineConfig::load_or_default(file.path()),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_bad_listen_addr() {
        let mut config = EngineConfig::default();
        config.server.listen_addr = "not an address".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid {
                key: "server.listen_addr",
                ..
            })
        ));
    }

    #[test]
    fn test_env_overrides() {
        let _guard = ENV_LOCK.lock().unwrap();
        std::env::set_var("QUIETCARE_LISTEN_ADDR", "127.0.0.1:7777");
        std::env::set_var("QUIETCARE_PYTHON", "/opt/venv/bin/python");
        std::env::set_var("QUIETCARE_MODELS_DIR", "/srv/models");

        let config = EngineConfig::default().with_env_overrides();

        std::env::remove_var("QUIETCARE_LISTEN_ADDR");
        std::env::remove_var("QUIETCARE_PYTHON");
        std::env::remove_var("QUIETCARE_MODELS_DIR");

        assert_eq!(config.server.listen_addr, "127.0.0.1:7777");
        assert_eq!(config.worker.python_bin, "/opt/venv/bin/python");
        assert_eq!(config.models.labels, PathBuf::from("/srv/models/labels.txt"));
        assert_eq!(
            config.models.stats,
            Some(PathBuf::from("/srv/models/mean_std.json"))
        );
    }

    #[test]
    fn test_empty_env_ignored() {
        let _guard = ENV_LOCK.lock().unwrap();
        std::env::set_var("QUIETCARE_PYTHON", "");
        let config = EngineConfig::default().with_env_overrides();
        std::env::remove_var("QUIETCARE_PYTHON");
        assert_eq!(config.worker.python_bin, "python3");
    }
}
