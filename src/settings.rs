//! Settings
//!
//! The binary's configuration file (TOML) and environment overrides. Every
//! section has defaults, so an empty file (or none at all) is valid.
//!
//! Resolution order: `--config PATH`, then `CHAMADO_CONFIG`, then
//! `<config dir>/chamado-agent/config.toml` when it exists. Environment
//! variables are applied on top of whatever was loaded.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chamado_core::builders::{
    DEFAULT_DIMENSION_TABLE, DEFAULT_FACT_TABLE, DEFAULT_PARTITION_COLUMN,
};
use chamado_core::{PipelineConfig, PipelineConfigBuilder};
use chamado_engine::BigQueryConfig;
use chamado_llm::{ProviderConfig, ProviderType};
use serde::{Deserialize, Serialize};

use crate::logging::{LogFormat, LOG_LEVELS};
use crate::utils::error::{AppError, AppResult};
use crate::utils::paths::default_config_path;

/// Environment variable naming an explicit settings file
pub const CONFIG_ENV: &str = "CHAMADO_CONFIG";

// ============================================================================
// Sections
// ============================================================================

/// `[pipeline]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    /// Byte ceiling for dry-run estimates and billed bytes
    pub max_bytes_scanned: u64,
    pub execution_timeout_secs: u64,
    pub planning_timeout_secs: u64,
    pub llm_timeout_secs: u64,
    /// Window applied when the question names no dates
    pub defensive_window_days: u32,
    pub max_synthesis_retries: u32,
    pub fact_table: String,
    pub dimension_table: String,
    pub partition_column: String,
    pub max_result_rows: usize,
    /// Read column types from INFORMATION_SCHEMA at startup
    pub schema_discovery: bool,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        let defaults = PipelineConfig::default();
        Self {
            max_bytes_scanned: defaults.max_bytes_scanned,
            execution_timeout_secs: defaults.execution_timeout.as_secs(),
            planning_timeout_secs: defaults.planning_timeout.as_secs(),
            llm_timeout_secs: defaults.llm_timeout.as_secs(),
            defensive_window_days: defaults.defensive_window_days,
            max_synthesis_retries: defaults.max_synthesis_retries,
            fact_table: DEFAULT_FACT_TABLE.to_string(),
            dimension_table: DEFAULT_DIMENSION_TABLE.to_string(),
            partition_column: DEFAULT_PARTITION_COLUMN.to_string(),
            max_result_rows: defaults.max_result_rows,
            schema_discovery: false,
        }
    }
}

/// `[engine]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Billing project for query jobs
    pub project_id: String,
    pub location: Option<String>,
    /// OAuth bearer token (usually from `BQ_ACCESS_TOKEN`)
    #[serde(skip_serializing)]
    pub access_token: Option<String>,
    pub base_url: Option<String>,
    /// Value of the `env` job label
    pub env_label: String,
    pub use_query_cache: bool,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            project_id: String::new(),
            location: None,
            access_token: None,
            base_url: None,
            env_label: "dev".to_string(),
            use_query_cache: true,
        }
    }
}

/// `[llm]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmSettings {
    pub enabled: bool,
    pub provider: ProviderType,
    pub model: String,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            provider: ProviderType::OpenAI,
            model: "gpt-4o-mini".to_string(),
            api_key: None,
            base_url: None,
            max_tokens: 220,
            temperature: 0.2,
        }
    }
}

/// `[logging]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Compact,
        }
    }
}

// ============================================================================
// Settings
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub pipeline: PipelineSettings,
    pub engine: EngineSettings,
    pub llm: LlmSettings,
    pub logging: LoggingSettings,
}

impl Settings {
    /// Load from the resolved file (if any), apply environment overrides and
    /// validate.
    pub fn load(explicit: Option<&Path>) -> AppResult<Self> {
        let lookup = |key: &str| std::env::var(key).ok();
        let mut settings = match resolve_path(explicit, &lookup)? {
            Some(path) => Self::load_from_file(&path)?,
            None => Self::default(),
        };
        settings.apply_env(&lookup)?;
        settings.validate().map_err(AppError::validation)?;
        Ok(settings)
    }

    /// Parse one TOML file without environment overrides.
    pub fn load_from_file(path: &Path) -> AppResult<Self> {
        let content = fs::read_to_string(path)?;
        let settings: Settings = toml::from_str(&content)?;
        Ok(settings)
    }

    /// Apply environment overrides from `lookup`.
    pub fn apply_env(&mut self, lookup: &impl Fn(&str) -> Option<String>) -> AppResult<()> {
        if let Some(v) = lookup("CHAMADO_MAX_BYTES_BILLED") {
            self.pipeline.max_bytes_scanned = parse_number("CHAMADO_MAX_BYTES_BILLED", &v)?;
        }
        if let Some(v) = lookup("CHAMADO_QUERY_TIMEOUT_SECS") {
            self.pipeline.execution_timeout_secs = parse_number("CHAMADO_QUERY_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = lookup("CHAMADO_LLM_ENABLED") {
            self.llm.enabled = parse_flag("CHAMADO_LLM_ENABLED", &v)?;
        }
        if let Some(v) = lookup("PROJECT_ID") {
            self.engine.project_id = v;
        }
        if let Some(v) = lookup("BQ_LOCATION") {
            self.engine.location = Some(v);
        }
        if let Some(v) = lookup("BQ_ACCESS_TOKEN") {
            self.engine.access_token = Some(v);
        }
        if let Some(v) = lookup("OPENAI_API_KEY") {
            self.llm.api_key = Some(v);
        }
        if let Some(v) = lookup("OPENAI_MODEL") {
            self.llm.model = v;
        }
        if let Some(v) = lookup("LOG_LEVEL") {
            self.logging.level = v.trim().to_lowercase();
        }
        if let Some(v) = lookup("LOG_FORMAT") {
            self.logging.format = LogFormat::parse(&v)
                .ok_or_else(|| AppError::config(format!("LOG_FORMAT: unknown format '{}'", v)))?;
        }
        Ok(())
    }

    /// Validate the settings
    pub fn validate(&self) -> Result<(), String> {
        if !LOG_LEVELS.contains(&self.logging.level.as_str()) {
            return Err(format!(
                "Invalid log level: {}. Must be one of {}",
                self.logging.level,
                LOG_LEVELS.join(", ")
            ));
        }

        if !(0.0..=2.0).contains(&self.llm.temperature) {
            return Err("llm.temperature must be between 0 and 2".to_string());
        }

        if self.llm.max_tokens == 0 {
            return Err("llm.max_tokens must be > 0".to_string());
        }

        // Budgets and timeouts are checked by the pipeline builder
        self.to_pipeline_config()
            .map(|_| ())
            .map_err(|e| e.to_string())
    }

    pub fn to_pipeline_config(&self) -> AppResult<PipelineConfig> {
        let p = &self.pipeline;
        let config = PipelineConfigBuilder::new()
            .max_bytes_scanned(p.max_bytes_scanned)
            .execution_timeout(Duration::from_secs(p.execution_timeout_secs))
            .planning_timeout(Duration::from_secs(p.planning_timeout_secs))
            .llm_timeout(Duration::from_secs(p.llm_timeout_secs))
            .defensive_window_days(p.defensive_window_days)
            .max_synthesis_retries(p.max_synthesis_retries)
            .llm_enabled(self.llm.enabled)
            .fact_table(p.fact_table.clone())
            .dimension_table(p.dimension_table.clone())
            .partition_column(p.partition_column.clone())
            .max_result_rows(p.max_result_rows)
            .build()?;
        Ok(config)
    }

    /// Engine client configuration. Requires a project and a token.
    pub fn to_bigquery_config(&self) -> AppResult<BigQueryConfig> {
        let e = &self.engine;
        if e.project_id.trim().is_empty() {
            return Err(AppError::config(
                "engine.project_id is not set (PROJECT_ID)",
            ));
        }
        let token = e
            .access_token
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| AppError::config("engine access token is not set (BQ_ACCESS_TOKEN)"))?;

        let mut config = BigQueryConfig::new(e.project_id.trim(), token.trim());
        config.location = e.location.clone();
        if let Some(url) = &e.base_url {
            config.base_url = url.clone();
        }
        config
            .labels
            .insert("env".to_string(), e.env_label.clone());
        config.use_query_cache = e.use_query_cache;
        Ok(config)
    }

    pub fn to_provider_config(&self) -> ProviderConfig {
        let l = &self.llm;
        ProviderConfig {
            provider: l.provider,
            api_key: l.api_key.clone(),
            base_url: l.base_url.clone(),
            model: l.model.clone(),
            max_tokens: l.max_tokens,
            temperature: l.temperature,
        }
    }
}

/// Pick the settings file. An explicitly named file must exist; the default
/// location is optional.
fn resolve_path(
    explicit: Option<&Path>,
    lookup: &impl Fn(&str) -> Option<String>,
) -> AppResult<Option<PathBuf>> {
    let named = explicit
        .map(Path::to_path_buf)
        .or_else(|| lookup(CONFIG_ENV).filter(|v| !v.is_empty()).map(PathBuf::from));
    if let Some(path) = named {
        if !path.exists() {
            return Err(AppError::config(format!(
                "settings file not found: {}",
                path.display()
            )));
        }
        return Ok(Some(path));
    }

    match default_config_path() {
        Ok(path) if path.exists() => Ok(Some(path)),
        _ => Ok(None),
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> AppResult<T> {
    value
        .trim()
        .replace('_', "")
        .parse()
        .map_err(|_| AppError::config(format!("{}: expected a number, got '{}'", key, value)))
}

fn parse_flag(key: &str, value: &str) -> AppResult<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "on" | "yes" => Ok(true),
        "0" | "false" | "off" | "no" => Ok(false),
        _ => Err(AppError::config(format!(
            "{}: expected true/false, got '{}'",
            key, value
        ))),
    }
}
