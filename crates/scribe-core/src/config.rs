//! Configuration management for scribe.toml

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;
use crate::retry::RetryConfig;

/// Name of the project-local config file
pub const CONFIG_FILE_NAME: &str = "scribe.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub agent: AgentSettings,
    #[serde(default)]
    pub context: ContextSettings,
    #[serde(default)]
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    /// Environment variable holding the API credential
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_temperature")]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSettings {
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    /// Write a checkpoint every N iterations (0 disables)
    #[serde(default = "default_checkpoint_interval")]
    pub checkpoint_interval: usize,
    /// Continue the iteration counter from a recovered checkpoint
    #[serde(default)]
    pub cumulative_iterations: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextSettings {
    #[serde(default = "default_token_limit")]
    pub token_limit: usize,
    #[serde(default = "default_compression_threshold")]
    pub compression_threshold: usize,
    #[serde(default = "default_max_summary_tokens")]
    pub max_summary_tokens: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    #[serde(default = "default_output_root")]
    pub root: PathBuf,
}

fn default_base_url() -> String {
    "https://api.z.ai/api/coding/paas/v4".to_string()
}

fn default_model() -> String {
    "glm-4.7".to_string()
}

fn default_api_key_env() -> String {
    "ZAI_API_KEY".to_string()
}

fn default_temperature() -> Option<f32> {
    Some(1.0)
}

fn default_timeout_secs() -> u64 {
    600
}

fn default_max_retries() -> u32 {
    3
}

fn default_max_iterations() -> usize {
    300
}

fn default_checkpoint_interval() -> usize {
    50
}

fn default_token_limit() -> usize {
    200_000
}

fn default_compression_threshold() -> usize {
    180_000
}

fn default_max_summary_tokens() -> usize {
    8_000
}

fn default_output_root() -> PathBuf {
    PathBuf::from("output")
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            model: default_model(),
            api_key_env: default_api_key_env(),
            temperature: default_temperature(),
            max_tokens: None,
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
        }
    }
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            checkpoint_interval: default_checkpoint_interval(),
            cumulative_iterations: false,
        }
    }
}

impl Default for ContextSettings {
    fn default() -> Self {
        Self {
            token_limit: default_token_limit(),
            compression_threshold: default_compression_threshold(),
            max_summary_tokens: default_max_summary_tokens(),
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            root: default_output_root(),
        }
    }
}

impl Config {
    /// Load from scribe.toml (cwd or parents), then the user config dir,
    /// falling back to defaults when neither exists
    pub fn load() -> Result<Self> {
        match Self::find_config_path() {
            Some(path) => Self::load_from(path),
            None => Ok(Self::default()),
        }
    }

    /// Load configuration from a specific path
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read {}", path.as_ref().display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.as_ref().display()))?;

        config.validate()?;
        Ok(config)
    }

    /// Search the current directory and parents, then the user config dir
    pub fn find_config_path() -> Option<PathBuf> {
        if let Ok(mut current) = std::env::current_dir() {
            for _ in 0..10 {
                let candidate = current.join(CONFIG_FILE_NAME);
                if candidate.exists() {
                    return Some(candidate);
                }
                if !current.pop() {
                    break;
                }
            }
        }

        Self::user_config_path().filter(|p| p.exists())
    }

    /// `<config_dir>/scribe/config.toml`
    pub fn user_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("scribe").join("config.toml"))
    }

    /// Check invariants between settings
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.context.token_limit == 0 {
            return Err(ConfigError::ZeroValue {
                field: "context.token_limit",
            });
        }
        if self.agent.max_iterations == 0 {
            return Err(ConfigError::ZeroValue {
                field: "agent.max_iterations",
            });
        }
        if self.context.compression_threshold >= self.context.token_limit {
            return Err(ConfigError::InvalidThreshold {
                threshold: self.context.compression_threshold,
                limit: self.context.token_limit,
            });
        }
        Ok(())
    }

    /// Read the API credential from the configured environment variable
    pub fn api_key(&self) -> Result<String, ConfigError> {
        match std::env::var(&self.api.api_key_env) {
            Ok(key) if !key.trim().is_empty() => Ok(key.trim().to_string()),
            _ => Err(ConfigError::MissingApiKey {
                var: self.api.api_key_env.clone(),
            }),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.api.timeout_secs)
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig::with_retries(self.api.max_retries)
    }
}

/// Mask an API key for display, keeping the first and last four characters
pub fn mask_key(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() <= 8 {
        return "*".repeat(chars.len());
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}...{}", head, tail)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_config() {
        let toml = r#"
[api]
base_url = "https://api.openai.com/v1"
model = "gpt-4o"
api_key_env = "OPENAI_API_KEY"
max_retries = 5

[agent]
max_iterations = 40
cumulative_iterations = true

[context]
token_limit = 128000
compression_threshold = 115000

[output]
root = "books"
"#;

        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.api.model, "gpt-4o");
        assert_eq!(config.api.max_retries, 5);
        assert_eq!(config.api.timeout_secs, 600);
        assert_eq!(config.agent.max_iterations, 40);
        assert_eq!(config.agent.checkpoint_interval, 50);
        assert!(config.agent.cumulative_iterations);
        assert_eq!(config.context.compression_threshold, 115000);
        assert_eq!(config.output.root, PathBuf::from("books"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.api.model, "glm-4.7");
        assert_eq!(config.api.api_key_env, "ZAI_API_KEY");
        assert_eq!(config.agent.max_iterations, 300);
        assert_eq!(config.context.token_limit, 200_000);
        assert_eq!(config.context.compression_threshold, 180_000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_threshold_above_limit_rejected() {
        let mut config = Config::default();
        config.context.compression_threshold = config.context.token_limit;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidThreshold { .. })
        ));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, "[agent]\nmax_iterations = 7\n").unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.agent.max_iterations, 7);
    }

    #[test]
    fn test_load_from_missing_file_errors() {
        let dir = tempfile::TempDir::new().unwrap();
        let err = Config::load_from(dir.path().join("nope.toml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read"));
    }

    #[test]
    fn test_missing_api_key() {
        let mut config = Config::default();
        config.api.api_key_env = "SCRIBE_TEST_KEY_THAT_IS_NOT_SET".to_string();
        let err = config.api_key().unwrap_err();
        assert!(matches!(err, ConfigError::MissingApiKey { .. }));
    }

    #[test]
    fn test_mask_key() {
        assert_eq!(mask_key("abcd1234efgh5678"), "abcd...5678");
        assert_eq!(mask_key("short"), "*****");
    }
}
