//! Configuration for the refusal swap engine.
//!
//! Settings come from three layers, highest priority first:
//! environment variables (including a `.env` file), an optional TOML file,
//! and built-in defaults. Every construction path ends in
//! [`SwapConfig::validate`], so a `SwapConfig` handed to the engine is
//! always usable as-is.

use std::path::Path;
use std::time::Duration;

use secrecy::SecretString;
use serde::Deserialize;

use crate::error::ConfigError;

const DEFAULT_SECONDARY_MODEL: &str = "dolphin-mistral";
const DEFAULT_JUDGE_MODEL: &str = "llama3.2";
const DEFAULT_BASE_URL: &str = "http://host.docker.internal:11434";
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 600;
const DEFAULT_JUDGE_PREVIEW_CHARS: usize = 1000;
const DEFAULT_JUDGE_MAX_TOKENS: u32 = 10;
const MAX_JUDGE_MAX_TOKENS: u32 = 64;

/// Settings for one refusal filter bound to one inference runtime.
#[derive(Debug, Clone)]
pub struct SwapConfig {
    /// Abliterated/uncensored model that writes the replacement answer.
    pub secondary_model: String,
    /// Small, fast model used only to classify refusals.
    pub judge_model: String,
    /// Base URL of the Ollama runtime (e.g. `http://localhost:11434`).
    pub base_url: String,
    /// Bearer token for runtimes sitting behind an authenticating proxy.
    pub api_key: Option<SecretString>,
    /// Raise the default log level to debug.
    pub debug: bool,
    /// Transport timeout applied to every runtime request.
    pub request_timeout: Duration,
    /// How many characters of the candidate answer the judge sees.
    pub judge_preview_chars: usize,
    /// Output token cap for the judge (`num_predict`).
    pub judge_max_tokens: u32,
    /// Query the runtime after a swap and warn if residency was not restored.
    pub verify_residency: bool,
    /// Hold a per-runtime lock from evicting the primary until it is reloaded.
    pub serialize_swaps: bool,
}

impl Default for SwapConfig {
    fn default() -> Self {
        Self {
            secondary_model: DEFAULT_SECONDARY_MODEL.to_string(),
            judge_model: DEFAULT_JUDGE_MODEL.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: None,
            debug: false,
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            judge_preview_chars: DEFAULT_JUDGE_PREVIEW_CHARS,
            judge_max_tokens: DEFAULT_JUDGE_MAX_TOKENS,
            verify_residency: false,
            serialize_swaps: true,
        }
    }
}

/// On-disk TOML shape. Every key is optional; absent keys fall through to
/// the environment and then to defaults.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    secondary_model: Option<String>,
    judge_model: Option<String>,
    base_url: Option<String>,
    api_key: Option<String>,
    debug: Option<bool>,
    request_timeout_secs: Option<u64>,
    judge_preview_chars: Option<usize>,
    judge_max_tokens: Option<u32>,
    verify_residency: Option<bool>,
    serialize_swaps: Option<bool>,
}

impl SwapConfig {
    /// Build a validated config for the three required identities, leaving
    /// everything else at its default.
    pub fn new(
        secondary_model: impl Into<String>,
        judge_model: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Result<Self, ConfigError> {
        let config = Self {
            secondary_model: secondary_model.into(),
            judge_model: judge_model.into(),
            base_url: base_url.into(),
            ..Self::default()
        };
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(None)
    }

    /// Load configuration from a TOML file, with environment overrides.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        Self::load(Some(path))
    }

    /// Parse a TOML document without consulting the environment.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let file: ConfigFile = toml::from_str(content)?;
        let config = Self::merge(file, |_| Ok(None))?;
        config.validate()?;
        Ok(config)
    }

    /// Resolve env > file > default, then validate.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let file = match path {
            Some(path) => {
                if !path.exists() {
                    return Err(ConfigError::MissingRequired {
                        key: path.display().to_string(),
                        hint: "config file does not exist".to_string(),
                    });
                }
                let content = std::fs::read_to_string(path)?;
                toml::from_str(&content)?
            }
            None => ConfigFile::default(),
        };

        let config = Self::merge(file, optional_env)?;
        config.validate()?;
        Ok(config)
    }

    fn merge<F>(file: ConfigFile, env: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Result<Option<String>, ConfigError>,
    {
        let defaults = Self::default();

        let api_key = env("OLLAMA_API_KEY")?
            .or(file.api_key)
            .map(SecretString::from);
        let timeout_secs = layered(
            &env,
            "REFUSAL_REQUEST_TIMEOUT_SECS",
            file.request_timeout_secs,
            defaults.request_timeout.as_secs(),
        )?;

        Ok(Self {
            secondary_model: layered(
                &env,
                "REFUSAL_SECONDARY_MODEL",
                file.secondary_model,
                defaults.secondary_model,
            )?,
            judge_model: layered(
                &env,
                "REFUSAL_JUDGE_MODEL",
                file.judge_model,
                defaults.judge_model,
            )?,
            base_url: layered(&env, "OLLAMA_BASE_URL", file.base_url, defaults.base_url)?,
            api_key,
            debug: layered(&env, "REFUSAL_DEBUG", file.debug, defaults.debug)?,
            request_timeout: Duration::from_secs(timeout_secs),
            judge_preview_chars: layered(
                &env,
                "REFUSAL_JUDGE_PREVIEW_CHARS",
                file.judge_preview_chars,
                defaults.judge_preview_chars,
            )?,
            judge_max_tokens: layered(
                &env,
                "REFUSAL_JUDGE_MAX_TOKENS",
                file.judge_max_tokens,
                defaults.judge_max_tokens,
            )?,
            verify_residency: layered(
                &env,
                "REFUSAL_VERIFY_RESIDENCY",
                file.verify_residency,
                defaults.verify_residency,
            )?,
            serialize_swaps: layered(
                &env,
                "REFUSAL_SERIALIZE_SWAPS",
                file.serialize_swaps,
                defaults.serialize_swaps,
            )?,
        })
    }

    /// Check every field. Called by all constructors.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (key, value) in [
            ("secondary_model", &self.secondary_model),
            ("judge_model", &self.judge_model),
        ] {
            if value.trim().is_empty() {
                return Err(ConfigError::InvalidValue {
                    key: key.to_string(),
                    message: "model identifier must not be empty".to_string(),
                });
            }
        }

        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            return Err(ConfigError::InvalidValue {
                key: "base_url".to_string(),
                message: format!(
                    "'{}' must start with http:// or https://",
                    self.base_url
                ),
            });
        }

        if self.judge_preview_chars == 0 {
            return Err(ConfigError::InvalidValue {
                key: "judge_preview_chars".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }

        if self.judge_max_tokens == 0 || self.judge_max_tokens > MAX_JUDGE_MAX_TOKENS {
            return Err(ConfigError::InvalidValue {
                key: "judge_max_tokens".to_string(),
                message: format!("must be between 1 and {MAX_JUDGE_MAX_TOKENS}"),
            });
        }

        if self.request_timeout.is_zero() {
            return Err(ConfigError::InvalidValue {
                key: "request_timeout_secs".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }

        Ok(())
    }

    /// Default `tracing` directive for this config.
    pub fn log_directive(&self) -> &'static str {
        if self.debug {
            "refusal_swap=debug"
        } else {
            "refusal_swap=info"
        }
    }
}

fn layered<T, F>(env: &F, key: &str, file: Option<T>, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Result<Option<String>, ConfigError>,
{
    match env(key)? {
        Some(raw) => raw.parse().map_err(|e| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("{e}"),
        }),
        None => Ok(file.unwrap_or(default)),
    }
}

pub(crate) fn optional_env(key: &str) -> Result<Option<String>, ConfigError> {
    match std::env::var(key) {
        Ok(val) if val.is_empty() => Ok(None),
        Ok(val) => Ok(Some(val)),
        Err(std::env::VarError::NotPresent) => Ok(None),
        Err(e) => Err(ConfigError::ParseError(format!(
            "failed to read {key}: {e}"
        ))),
    }
}
