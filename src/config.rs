use anyhow::Result;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Name of the dot-directory holding config, state, and history.
pub const APP_DIR: &str = ".taskpilot";

/// An entry in the model catalogue.
///
/// Prices are USD per million tokens. Loaded once from configuration and
/// never mutated afterwards; a missing price classifies the model as cheap.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ModelDescriptor {
    pub id: String,
    #[serde(default)]
    pub input_price: Option<f64>,
    #[serde(default)]
    pub output_price: Option<f64>,
    #[serde(default = "default_context_window")]
    pub context_window: u32,
}

fn default_context_window() -> u32 {
    128_000
}

impl ModelDescriptor {
    pub fn new(id: &str, input_price: f64, output_price: f64) -> Self {
        Self {
            id: id.to_string(),
            input_price: Some(input_price),
            output_price: Some(output_price),
            context_window: default_context_window(),
        }
    }
}

/// Spending budget for the whole process.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BudgetConfig {
    #[serde(default = "default_cap_usd")]
    pub cap_usd: f64,
}

fn default_cap_usd() -> f64 {
    10.0
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            cap_usd: default_cap_usd(),
        }
    }
}

/// Loop and governor limits.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LimitsConfig {
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,
    #[serde(default = "default_wall_clock_secs")]
    pub wall_clock_secs: u64,
    #[serde(default = "default_calls_per_minute")]
    pub calls_per_minute: usize,
    #[serde(default = "default_breaker_threshold")]
    pub breaker_threshold: u32,
    #[serde(default = "default_breaker_cooldown_secs")]
    pub breaker_cooldown_secs: u64,
}

fn default_max_steps() -> usize {
    15
}
fn default_wall_clock_secs() -> u64 {
    120
}
fn default_calls_per_minute() -> usize {
    30
}
fn default_breaker_threshold() -> u32 {
    3
}
fn default_breaker_cooldown_secs() -> u64 {
    300
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
            wall_clock_secs: default_wall_clock_secs(),
            calls_per_minute: default_calls_per_minute(),
            breaker_threshold: default_breaker_threshold(),
            breaker_cooldown_secs: default_breaker_cooldown_secs(),
        }
    }
}

/// Limits for the shell and code-execution tools.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ShellConfig {
    #[serde(default = "default_shell_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_max_output_bytes")]
    pub max_output_bytes: usize,
}

fn default_shell_timeout_ms() -> u64 {
    30_000
}
fn default_max_output_bytes() -> usize {
    64_000
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_shell_timeout_ms(),
            max_output_bytes: default_max_output_bytes(),
        }
    }
}

/// Configuration for the model-calling backend (OpenAI-compatible).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BackendConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default)]
    pub api_key: Option<String>,
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_api_key_env() -> String {
    "TASKPILOT_API_KEY".to_string()
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key_env: default_api_key_env(),
            api_key: None,
        }
    }
}

impl BackendConfig {
    /// Resolve the API key from config or environment.
    pub fn resolve_api_key(&self) -> Result<SecretString> {
        if let Some(key) = &self.api_key {
            return Ok(SecretString::from(key.clone()));
        }
        match std::env::var(&self.api_key_env) {
            Ok(key) => Ok(SecretString::from(key)),
            Err(_) => Err(anyhow::anyhow!(
                "no API key: set {} or backend.api_key in config",
                self.api_key_env
            )),
        }
    }
}

/// Main configuration structure.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct Config {
    /// Model catalogue in stable preference order. Within a tier, the first
    /// eligible entry wins.
    #[serde(default)]
    pub models: Vec<ModelDescriptor>,
    #[serde(default)]
    pub budget: BudgetConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub shell: ShellConfig,
    #[serde(default)]
    pub backend: BackendConfig,
}

impl Config {
    /// Create config with the built-in model catalogue.
    ///
    /// Prices are USD per 1M tokens, from the published vendor price sheets.
    pub fn with_builtin_models() -> Self {
        Config {
            models: vec![
                ModelDescriptor::new("gpt-4", 30.00, 60.00),
                ModelDescriptor::new("o1", 15.00, 60.00),
                ModelDescriptor::new("claude-sonnet-4", 3.00, 15.00),
                ModelDescriptor::new("gpt-4o", 2.50, 10.00),
                ModelDescriptor::new("claude-haiku-3-5", 0.80, 4.00),
                ModelDescriptor::new("gpt-4o-mini", 0.15, 0.60),
                ModelDescriptor::new("llama-3.1-8b", 0.02, 0.04),
            ],
            budget: BudgetConfig::default(),
            limits: LimitsConfig::default(),
            shell: ShellConfig::default(),
            backend: BackendConfig::default(),
        }
    }

    /// Load configuration from default paths.
    /// Priority: project (.taskpilot/config.toml) > user (~/.taskpilot/config.toml)
    /// Starts with built-in models, then merges user and project configs.
    pub fn load() -> Result<Self> {
        let mut config = Self::with_builtin_models();

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(APP_DIR).join("config.toml");
            if user_config.exists() {
                let user = Self::load_from(&user_config)?;
                config.merge(user);
            }
        }

        let project_config = Path::new(APP_DIR).join("config.toml");
        if project_config.exists() {
            let project = Self::load_from(&project_config)?;
            config.merge(project);
        }

        Ok(config)
    }

    /// Load configuration from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Merge another config into this one (other takes priority).
    /// A non-empty model catalogue replaces the current one wholesale so the
    /// preference order stays exactly what the user wrote.
    pub fn merge(&mut self, other: Config) {
        if !other.models.is_empty() {
            self.models = other.models;
        }
        self.budget = other.budget;
        self.limits = other.limits;
        self.shell = other.shell;
        self.backend = other.backend;
    }

    /// Look up a model descriptor by id.
    pub fn model(&self, id: &str) -> Option<&ModelDescriptor> {
        self.models.iter().find(|m| m.id == id)
    }
}

/// Path to the user-level app directory (~/.taskpilot), if resolvable.
pub fn app_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(APP_DIR))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_catalogue_order_is_stable() {
        let config = Config::with_builtin_models();
        assert_eq!(config.models[0].id, "gpt-4");
        assert!(config.models.len() >= 5);
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.budget.cap_usd, 10.0);
        assert_eq!(config.limits.max_steps, 15);
        assert_eq!(config.limits.wall_clock_secs, 120);
        assert_eq!(config.limits.breaker_threshold, 3);
        assert_eq!(config.limits.breaker_cooldown_secs, 300);
    }

    #[test]
    fn test_merge_replaces_catalogue_only_when_present() {
        let mut base = Config::with_builtin_models();
        let n = base.models.len();

        let empty_override: Config = toml::from_str("[budget]\ncap_usd = 2.5").unwrap();
        base.merge(empty_override);
        assert_eq!(base.models.len(), n);
        assert_eq!(base.budget.cap_usd, 2.5);

        let catalogue_override: Config = toml::from_str(
            r#"
            [[models]]
            id = "local-llm"
            input_price = 0.0
            output_price = 0.0
            "#,
        )
        .unwrap();
        base.merge(catalogue_override);
        assert_eq!(base.models.len(), 1);
        assert_eq!(base.models[0].id, "local-llm");
    }

    #[test]
    fn test_parse_model_with_missing_price() {
        let config: Config = toml::from_str(
            r#"
            [[models]]
            id = "mystery"
            "#,
        )
        .unwrap();
        assert_eq!(config.models[0].id, "mystery");
        assert!(config.models[0].input_price.is_none());
    }
}
