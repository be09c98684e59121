//! Runtime configuration for the loop binary.
//!
//! ## Precedence (highest to lowest)
//!
//! 1. Command-line flags (applied by `main`)
//! 2. TOML file passed with `--config`
//! 3. Environment variables (`PERSONAL_API_KEY`, `OPENAI_API_KEY`, ...)
//! 4. Built-in defaults
//!
//! Every section is `#[serde(default)]`, so a config file only needs the
//! keys it wants to change.

use std::env;
use std::path::{Path, PathBuf};

use resolution::search::SearchConfig;
use resolution::submission::DEFAULT_MAX_ATTEMPTS;
use resolution::{EngineConfig, LocatorError, LocatorResult, RESTRICTED_SENTINEL};
use rig::providers::openai;
use serde::{Deserialize, Serialize};

const DEFAULT_CENTRAL_URL: &str = "https://c3ntrala.ag3nts.org";
const DEFAULT_TASK: &str = "loop";
const DEFAULT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_LLM_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "gpt-4o-mini";

const ENV_CENTRAL_URL: &str = "LOOP_CENTRAL_URL";
const ENV_CENTRAL_API_KEY: &str = "PERSONAL_API_KEY";
const ENV_LLM_URL: &str = "LOOP_LLM_URL";
const ENV_LLM_API_KEY: &str = "OPENAI_API_KEY";
const ENV_CACHE_DIR: &str = "LOOP_CACHE_DIR";

/// The demo API serving `/people`, `/places` and `/report`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CentralConfig {
    pub base_url: String,
    /// Injected as `apikey` into every request body.
    pub api_key: String,
    /// Task name sent with `/report` submissions.
    pub task: String,
    pub timeout_secs: u64,
    pub restricted_sentinel: String,
}

impl Default for CentralConfig {
    fn default() -> Self {
        Self {
            base_url: env::var(ENV_CENTRAL_URL).unwrap_or_else(|_| DEFAULT_CENTRAL_URL.to_string()),
            api_key: env::var(ENV_CENTRAL_API_KEY).unwrap_or_default(),
            task: DEFAULT_TASK.to_string(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            restricted_sentinel: RESTRICTED_SENTINEL.to_string(),
        }
    }
}

/// Per-role model assignment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub extraction: String,
    pub normalizer: String,
    pub resolver: String,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            extraction: DEFAULT_MODEL.to_string(),
            normalizer: DEFAULT_MODEL.to_string(),
            resolver: DEFAULT_MODEL.to_string(),
        }
    }
}

/// OpenAI-compatible completion endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub base_url: String,
    pub api_key: String,
    pub models: ModelConfig,
    pub temperature: f64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: env::var(ENV_LLM_URL).unwrap_or_else(|_| DEFAULT_LLM_URL.to_string()),
            api_key: env::var(ENV_LLM_API_KEY).unwrap_or_default(),
            models: ModelConfig::default(),
            temperature: 0.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SubmissionConfig {
    pub max_attempts: u32,
}

impl Default for SubmissionConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopConfig {
    pub central: CentralConfig,
    pub llm: LlmConfig,
    pub search: SearchConfig,
    pub submission: SubmissionConfig,
    /// Directory for cached completions; caching is off when unset.
    pub cache_dir: Option<PathBuf>,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            central: CentralConfig::default(),
            llm: LlmConfig::default(),
            search: SearchConfig::default(),
            submission: SubmissionConfig::default(),
            cache_dir: env::var(ENV_CACHE_DIR).ok().map(PathBuf::from),
        }
    }
}

impl LoopConfig {
    /// Parse a TOML document; missing keys keep their env/default values.
    pub fn from_toml(text: &str) -> LocatorResult<Self> {
        toml::from_str(text)
            .map_err(|e| LocatorError::Configuration(format!("invalid config file: {e}")))
    }

    pub fn from_file(path: &Path) -> LocatorResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            LocatorError::Configuration(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_toml(&text)
    }

    /// Engine-side view of this config.
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            search: self.search.clone(),
            max_attempts: self.submission.max_attempts,
        }
    }

    pub fn validate(&self) -> LocatorResult<()> {
        self.engine_config().validate()?;
        for (name, url) in [
            ("central.base_url", &self.central.base_url),
            ("llm.base_url", &self.llm.base_url),
        ] {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(LocatorError::Configuration(format!(
                    "{name} must be an http(s) URL, got {url:?}"
                )));
            }
        }
        if self.central.api_key.trim().is_empty() {
            return Err(LocatorError::Configuration(format!(
                "central.api_key is empty (set {ENV_CENTRAL_API_KEY})"
            )));
        }
        if self.central.task.trim().is_empty() {
            return Err(LocatorError::Configuration(
                "central.task must not be empty".to_string(),
            ));
        }
        if self.central.timeout_secs == 0 {
            return Err(LocatorError::Configuration(
                "central.timeout_secs must be > 0".to_string(),
            ));
        }
        if self.central.restricted_sentinel.trim().is_empty() {
            return Err(LocatorError::Configuration(
                "central.restricted_sentinel must not be empty".to_string(),
            ));
        }
        if !(0.0..=2.0).contains(&self.llm.temperature) {
            return Err(LocatorError::Configuration(format!(
                "llm.temperature must be in [0, 2], got {}",
                self.llm.temperature
            )));
        }
        let models = &self.llm.models;
        if [&models.extraction, &models.normalizer, &models.resolver]
            .iter()
            .any(|m| m.trim().is_empty())
        {
            return Err(LocatorError::Configuration(
                "every llm.models role needs a model name".to_string(),
            ));
        }
        Ok(())
    }

    /// Build a Rig OpenAI-compatible client for the configured endpoint.
    pub fn llm_client(&self) -> LocatorResult<openai::CompletionsClient> {
        openai::CompletionsClient::builder()
            .api_key(&self.llm.api_key)
            .base_url(&self.llm.base_url)
            .build()
            .map_err(|e| LocatorError::Configuration(format!("failed to build LLM client: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keyed() -> LoopConfig {
        let mut cfg = LoopConfig::default();
        cfg.central.api_key = "test-key".into();
        cfg
    }

    #[test]
    fn keyed_default_validates() {
        keyed().validate().expect("default config with key should be valid");
    }

    #[test]
    fn missing_api_key_is_rejected() {
        let mut cfg = keyed();
        cfg.central.api_key = "  ".into();
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("PERSONAL_API_KEY"));
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let cfg = LoopConfig::from_toml(
            r#"
            [central]
            api_key = "abc"
            task = "loop"

            [search]
            max_parallel_lookups = 4

            [llm.models]
            resolver = "gpt-4o"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.central.api_key, "abc");
        assert_eq!(cfg.central.timeout_secs, DEFAULT_TIMEOUT_SECS);
        assert_eq!(cfg.search.max_parallel_lookups, 4);
        assert_eq!(cfg.search.target_name, "BARBARA");
        assert_eq!(cfg.llm.models.resolver, "gpt-4o");
        assert_eq!(cfg.llm.models.extraction, DEFAULT_MODEL);
        assert_eq!(cfg.submission.max_attempts, 5);
    }

    #[test]
    fn bad_toml_is_configuration_error() {
        let err = LoopConfig::from_toml("[central\n").unwrap_err();
        assert!(matches!(err, LocatorError::Configuration(_)));
    }

    #[test]
    fn non_http_url_rejected() {
        let mut cfg = keyed();
        cfg.central.base_url = "ftp://example".into();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn temperature_out_of_range_rejected() {
        let mut cfg = keyed();
        cfg.llm.temperature = 3.5;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn engine_config_carries_search_and_attempts() {
        let mut cfg = keyed();
        cfg.submission.max_attempts = 2;
        cfg.search.target_name = "RAFAL".into();
        let engine = cfg.engine_config();
        assert_eq!(engine.max_attempts, 2);
        assert_eq!(engine.search.target_name, "RAFAL");
    }

    #[test]
    fn zero_attempts_fails_through_engine_validation() {
        let mut cfg = keyed();
        cfg.submission.max_attempts = 0;
        assert!(cfg.validate().is_err());
    }
}
