//! Application configuration for paperbrief.
//!
//! User config lives at `~/.paperbrief/paperbrief.toml`.
//! CLI flags override config file values, which override defaults.
//! The file is read once at startup; components receive the runtime
//! configs derived from it through their constructors.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{PaperBriefError, Result};
use crate::types::Tier;

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "paperbrief.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".paperbrief";

/// Placeholder replaced with the violation list in the correction instruction.
pub const VIOLATIONS_PLACEHOLDER: &str = "{violations}";

// ---------------------------------------------------------------------------
// Config structs (matching paperbrief.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Language-model endpoint and model choices.
    #[serde(default)]
    pub llm: LlmConfig,

    /// Orchestrator policy.
    #[serde(default)]
    pub pipeline: PipelineSettings,

    /// Per-tier admission ceilings.
    #[serde(default)]
    pub rate_limits: RateLimitConfig,

    /// Cache backend.
    #[serde(default)]
    pub cache: CacheConfig,

    /// arXiv API access.
    #[serde(default)]
    pub arxiv: ArxivConfig,

    /// Report output.
    #[serde(default)]
    pub report: ReportConfig,

    /// USD pricing per model, keyed by model name.
    #[serde(default = "default_pricing")]
    pub pricing: BTreeMap<String, ModelPricing>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            llm: LlmConfig::default(),
            pipeline: PipelineSettings::default(),
            rate_limits: RateLimitConfig::default(),
            cache: CacheConfig::default(),
            arxiv: ArxivConfig::default(),
            report: ReportConfig::default(),
            pricing: default_pricing(),
        }
    }
}

/// `[llm]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// OpenAI-compatible API root (self-hosted endpoints work too).
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Name of the env var holding the API key (never store the key itself).
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Whether a missing key is a startup error. Local endpoints often need none.
    #[serde(default = "default_true")]
    pub require_api_key: bool,

    /// Stage B summarizer model.
    #[serde(default = "default_model")]
    pub model: String,

    /// Stage A sanitizer model.
    #[serde(default = "default_model")]
    pub model_pre: String,

    /// Stage C validator model.
    #[serde(default = "default_model")]
    pub model_val: String,

    #[serde(default = "default_temperature")]
    pub temperature: f64,

    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,

    /// Per-invocation timeout.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// How many times a throttled call is retried.
    #[serde(default = "default_rate_limit_retries")]
    pub rate_limit_retries: u32,

    /// Base delay for exponential backoff between throttled retries.
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key_env: default_api_key_env(),
            require_api_key: true,
            model: default_model(),
            model_pre: default_model(),
            model_val: default_model(),
            temperature: default_temperature(),
            max_output_tokens: default_max_output_tokens(),
            request_timeout_secs: default_request_timeout(),
            rate_limit_retries: default_rate_limit_retries(),
            backoff_base_ms: default_backoff_base_ms(),
        }
    }
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".into()
}
fn default_api_key_env() -> String {
    "OPENAI_API_KEY".into()
}
fn default_true() -> bool {
    true
}
fn default_model() -> String {
    "gpt-4o-mini".into()
}
fn default_temperature() -> f64 {
    0.2
}
fn default_max_output_tokens() -> u32 {
    800
}
fn default_request_timeout() -> u64 {
    60
}
fn default_rate_limit_retries() -> u32 {
    3
}
fn default_backoff_base_ms() -> u64 {
    500
}

/// `[pipeline]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSettings {
    /// Bump to invalidate every cached summary after a prompt change.
    #[serde(default = "default_prompt_version")]
    pub prompt_version: String,

    /// Global ceiling on simultaneously executing runs.
    #[serde(default = "default_max_concurrent_runs")]
    pub max_concurrent_runs: usize,

    /// Hard ceiling for a whole run.
    #[serde(default = "default_run_timeout")]
    pub run_timeout_secs: u64,

    #[serde(default = "default_stage_a_attempts")]
    pub stage_a_attempts: u32,

    #[serde(default = "default_stage_b_attempts")]
    pub stage_b_attempts: u32,

    /// Run the LLM validator pass in Stage C in addition to local checks.
    #[serde(default = "default_true")]
    pub llm_validation: bool,

    /// Lifetime of the in-flight marker for a (paper, model, version) key.
    #[serde(default = "default_lock_ttl")]
    pub lock_ttl_secs: u64,

    /// How long a run waits for another run's in-flight result.
    #[serde(default = "default_lock_wait")]
    pub lock_wait_secs: u64,

    /// Appended to the Stage B prompt on re-generation. `{violations}` is
    /// replaced with the Stage C findings.
    #[serde(default = "default_correction_instruction")]
    pub correction_instruction: String,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            prompt_version: default_prompt_version(),
            max_concurrent_runs: default_max_concurrent_runs(),
            run_timeout_secs: default_run_timeout(),
            stage_a_attempts: default_stage_a_attempts(),
            stage_b_attempts: default_stage_b_attempts(),
            llm_validation: true,
            lock_ttl_secs: default_lock_ttl(),
            lock_wait_secs: default_lock_wait(),
            correction_instruction: default_correction_instruction(),
        }
    }
}

fn default_prompt_version() -> String {
    "v1".into()
}
fn default_max_concurrent_runs() -> usize {
    3
}
fn default_run_timeout() -> u64 {
    180
}
fn default_stage_a_attempts() -> u32 {
    2
}
fn default_stage_b_attempts() -> u32 {
    2
}
fn default_lock_ttl() -> u64 {
    120
}
fn default_lock_wait() -> u64 {
    30
}
fn default_correction_instruction() -> String {
    "上一版摘要未通過檢查，問題如下：{violations}。\n\
     請修正上述問題後重新輸出完整 JSON：每段不超過 900 字，bullet_points 為 3 到 5 項，\
     全部內容使用繁體中文（專有名詞可保留英文）。"
        .into()
}

/// `[rate_limits]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_per_minute")]
    pub default_per_minute: u32,
    #[serde(default = "default_per_day")]
    pub default_per_day: u32,
    #[serde(default = "trusted_per_minute")]
    pub trusted_per_minute: u32,
    #[serde(default = "trusted_per_day")]
    pub trusted_per_day: u32,
    /// Requesters promoted to the trusted tier.
    #[serde(default)]
    pub trusted_requesters: Vec<String>,
    /// Requesters promoted to the admin tier.
    #[serde(default)]
    pub admin_requesters: Vec<String>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            default_per_minute: default_per_minute(),
            default_per_day: default_per_day(),
            trusted_per_minute: trusted_per_minute(),
            trusted_per_day: trusted_per_day(),
            trusted_requesters: Vec::new(),
            admin_requesters: Vec::new(),
        }
    }
}

impl RateLimitConfig {
    /// Tier for a requester according to the configured lists.
    pub fn tier_for(&self, requester_id: &str) -> Tier {
        if self.admin_requesters.iter().any(|r| r == requester_id) {
            Tier::Admin
        } else if self.trusted_requesters.iter().any(|r| r == requester_id) {
            Tier::Trusted
        } else {
            Tier::Default
        }
    }
}

fn default_per_minute() -> u32 {
    3
}
fn default_per_day() -> u32 {
    20
}
fn trusted_per_minute() -> u32 {
    6
}
fn trusted_per_day() -> u32 {
    100
}

/// Which cache backend to open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    #[default]
    Libsql,
    Memory,
}

/// `[cache]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default)]
    pub backend: CacheBackend,
    /// Database path for the libsql backend. Defaults to `~/.paperbrief/cache.db`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl CacheConfig {
    /// Resolved database path for the libsql backend.
    pub fn resolved_path(&self) -> Result<PathBuf> {
        match &self.path {
            Some(p) => Ok(PathBuf::from(p)),
            None => Ok(config_dir()?.join("cache.db")),
        }
    }
}

/// `[arxiv]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArxivConfig {
    #[serde(default = "default_arxiv_api_url")]
    pub api_url: String,
    #[serde(default = "default_arxiv_timeout")]
    pub timeout_secs: u64,
    /// Delay before the single retry of a failed fetch.
    #[serde(default = "default_arxiv_backoff")]
    pub retry_backoff_ms: u64,
}

impl Default for ArxivConfig {
    fn default() -> Self {
        Self {
            api_url: default_arxiv_api_url(),
            timeout_secs: default_arxiv_timeout(),
            retry_backoff_ms: default_arxiv_backoff(),
        }
    }
}

fn default_arxiv_api_url() -> String {
    "https://export.arxiv.org/api/query".into()
}
fn default_arxiv_timeout() -> u64 {
    30
}
fn default_arxiv_backoff() -> u64 {
    1000
}

/// `[report]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportConfig {
    #[serde(default = "default_report_dir")]
    pub output_dir: String,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            output_dir: default_report_dir(),
        }
    }
}

fn default_report_dir() -> String {
    "data/reports".into()
}

/// USD price per 1k tokens.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelPricing {
    pub input_per_1k: f64,
    pub output_per_1k: f64,
}

fn default_pricing() -> BTreeMap<String, ModelPricing> {
    BTreeMap::from([
        (
            "gpt-4o-mini".to_string(),
            ModelPricing {
                input_per_1k: 0.00015,
                output_per_1k: 0.0006,
            },
        ),
        (
            "gpt-4o".to_string(),
            ModelPricing {
                input_per_1k: 0.0025,
                output_per_1k: 0.01,
            },
        ),
        (
            "gpt-4".to_string(),
            ModelPricing {
                input_per_1k: 0.03,
                output_per_1k: 0.06,
            },
        ),
    ])
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.paperbrief/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| PaperBriefError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.paperbrief/paperbrief.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| PaperBriefError::io(path, e))?;

    let config: AppConfig = toml::from_str(&content).map_err(|e| {
        PaperBriefError::config(format!("failed to parse {}: {e}", path.display()))
    })?;
    validate_config(&config)?;
    Ok(config)
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| PaperBriefError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| PaperBriefError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| PaperBriefError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Reject settings that would make the pipeline unable to run.
pub fn validate_config(config: &AppConfig) -> Result<()> {
    if config.pipeline.max_concurrent_runs == 0 {
        return Err(PaperBriefError::config(
            "pipeline.max_concurrent_runs must be at least 1",
        ));
    }
    if config.pipeline.stage_a_attempts == 0 || config.pipeline.stage_b_attempts == 0 {
        return Err(PaperBriefError::config(
            "pipeline stage attempts must be at least 1",
        ));
    }
    if config.pipeline.prompt_version.trim().is_empty() {
        return Err(PaperBriefError::config("pipeline.prompt_version is empty"));
    }
    if !(0.0..=2.0).contains(&config.llm.temperature) {
        return Err(PaperBriefError::config(format!(
            "llm.temperature {} out of range 0.0..=2.0",
            config.llm.temperature
        )));
    }
    Ok(())
}

/// Read the API key from the env var named in the config.
pub fn resolve_api_key(config: &AppConfig) -> Option<String> {
    std::env::var(&config.llm.api_key_env)
        .ok()
        .filter(|v| !v.is_empty())
}

/// Check that the API key env var is set and non-empty when one is required.
pub fn validate_api_key(config: &AppConfig) -> Result<()> {
    if !config.llm.require_api_key || resolve_api_key(config).is_some() {
        return Ok(());
    }
    let var_name = &config.llm.api_key_env;
    Err(PaperBriefError::config(format!(
        "API key not found. Set the {var_name} environment variable, \
         or set llm.require_api_key = false for a keyless endpoint."
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("prompt_version"));
        assert!(toml_str.contains("OPENAI_API_KEY"));
        assert!(toml_str.contains("gpt-4o-mini"));
    }

    #[test]
    fn config_roundtrip() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize");
        let parsed: AppConfig = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(parsed.rate_limits.default_per_minute, 3);
        assert_eq!(parsed.rate_limits.trusted_per_day, 100);
        assert_eq!(parsed.pipeline.max_concurrent_runs, 3);
        assert_eq!(parsed.llm.max_output_tokens, 800);
        assert_eq!(parsed.pricing.len(), 3);
    }

    #[test]
    fn partial_config_fills_defaults() {
        let toml_str = r#"
[llm]
base_url = "http://localhost:8000/v1"
require_api_key = false
model = "qwen2.5-7b-instruct"

[rate_limits]
trusted_requesters = ["alice"]
admin_requesters = ["root"]

[cache]
backend = "memory"
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        assert_eq!(config.llm.model, "qwen2.5-7b-instruct");
        assert_eq!(config.llm.model_pre, "gpt-4o-mini");
        assert_eq!(config.cache.backend, CacheBackend::Memory);
        assert_eq!(config.pipeline.prompt_version, "v1");
        assert!(config.pricing.contains_key("gpt-4o-mini"));
        assert!(validate_api_key(&config).is_ok());

        assert_eq!(config.rate_limits.tier_for("alice"), Tier::Trusted);
        assert_eq!(config.rate_limits.tier_for("root"), Tier::Admin);
        assert_eq!(config.rate_limits.tier_for("bob"), Tier::Default);
    }

    #[test]
    fn correction_instruction_has_placeholder() {
        let config = AppConfig::default();
        assert!(
            config
                .pipeline
                .correction_instruction
                .contains(VIOLATIONS_PLACEHOLDER)
        );
    }

    #[test]
    fn invalid_settings_are_rejected() {
        let mut config = AppConfig::default();
        config.pipeline.max_concurrent_runs = 0;
        assert!(validate_config(&config).is_err());

        let mut config = AppConfig::default();
        config.llm.temperature = 3.5;
        assert!(validate_config(&config).is_err());

        assert!(validate_config(&AppConfig::default()).is_ok());
    }

    #[test]
    fn api_key_validation() {
        let mut config = AppConfig::default();
        // Use a unique env var name to avoid interfering with other tests
        config.llm.api_key_env = "PB_TEST_NONEXISTENT_KEY_12345".into();
        let result = validate_api_key(&config);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("API key not found"));
        assert!(resolve_api_key(&config).is_none());
    }
}
