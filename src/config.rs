//! Configuration
//!
//! Every tunable lives here, read from the environment once at startup
//! (`.env` supported via dotenv) and validated before anything connects.
//! Thresholds that components consume (row limits, routing floors, round
//! caps) are carried as plain fields and handed to the components as policy
//! values, never read from the environment at call time.

use crate::error::{AskDbError, Result};
use crate::guardrail::GuardrailPolicy;
use crate::investigator::InvestigatorConfig;
use crate::llm::{LlmBackend, LlmClient};
use crate::router::RouterPolicy;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Settings {
    pub db_path: PathBuf,
    /// Schema file (DDL or JSON); when unset the database is introspected.
    pub schema_path: Option<PathBuf>,
    pub llm_backend: LlmBackend,
    pub ollama_base_url: String,
    pub ollama_model: String,
    pub openai_base_url: String,
    pub openai_api_key: String,
    pub openai_model: String,
    pub llm_timeout: Duration,
    pub llm_max_tokens: u32,
    pub default_row_limit: u64,
    pub max_row_limit: u64,
    pub allow_system_tables: bool,
    pub router_complex_threshold: f64,
    pub router_confidence_floor: f64,
    pub max_rounds: usize,
    pub confidence_target: f64,
    pub gain_per_supported_round: f64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("./data.db"),
            schema_path: None,
            llm_backend: LlmBackend::Ollama,
            ollama_base_url: "http://127.0.0.1:11434".to_string(),
            ollama_model: "llama3.1".to_string(),
            openai_base_url: "https://api.openai.com/v1".to_string(),
            openai_api_key: String::new(),
            openai_model: "gpt-4o-mini".to_string(),
            llm_timeout: Duration::from_secs(120),
            llm_max_tokens: 1024,
            default_row_limit: 500,
            max_row_limit: 10_000,
            allow_system_tables: false,
            router_complex_threshold: 0.5,
            router_confidence_floor: 0.7,
            max_rounds: 5,
            confidence_target: 0.85,
            gain_per_supported_round: 0.30,
        }
    }
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        let defaults = Settings::default();
        let backend = match env_or("LLM_BACKEND", "ollama").to_lowercase().as_str() {
            "ollama" => LlmBackend::Ollama,
            // groq speaks the OpenAI chat API
            "openai" | "groq" => LlmBackend::OpenAiCompatible,
            other => {
                return Err(AskDbError::Config(format!(
                    "LLM_BACKEND must be 'ollama' or 'openai', got '{other}'"
                )))
            }
        };

        Ok(Self {
            db_path: PathBuf::from(env_or("ASKDB_DB", "./data.db")),
            schema_path: std::env::var("ASKDB_SCHEMA").ok().map(PathBuf::from),
            llm_backend: backend,
            ollama_base_url: env_or("OLLAMA_BASE_URL", &defaults.ollama_base_url),
            ollama_model: env_or("OLLAMA_MODEL", &defaults.ollama_model),
            openai_base_url: env_or("OPENAI_BASE_URL", &defaults.openai_base_url),
            openai_api_key: env_or("OPENAI_API_KEY", ""),
            openai_model: env_or("OPENAI_MODEL", &defaults.openai_model),
            llm_timeout: Duration::from_secs(parse_env("LLM_TIMEOUT_SECS", 120)?),
            llm_max_tokens: parse_env("LLM_MAX_TOKENS", defaults.llm_max_tokens)?,
            default_row_limit: parse_env("DEFAULT_ROW_LIMIT", defaults.default_row_limit)?,
            max_row_limit: parse_env("MAX_ROW_LIMIT", defaults.max_row_limit)?,
            allow_system_tables: parse_env("ALLOW_SYSTEM_TABLES", false)?,
            router_complex_threshold: parse_env(
                "ROUTER_COMPLEX_THRESHOLD",
                defaults.router_complex_threshold,
            )?,
            router_confidence_floor: parse_env(
                "ROUTER_CONFIDENCE_FLOOR",
                defaults.router_confidence_floor,
            )?,
            max_rounds: parse_env("MAX_ROUNDS", defaults.max_rounds)?,
            confidence_target: parse_env("CONFIDENCE_TARGET", defaults.confidence_target)?,
            gain_per_supported_round: parse_env(
                "GAIN_PER_SUPPORTED_ROUND",
                defaults.gain_per_supported_round,
            )?,
        })
    }

    pub fn validate(&self) -> Result<()> {
        if !self.db_path.exists() {
            return Err(AskDbError::Config(format!(
                "database not found at {}",
                self.db_path.display()
            )));
        }
        if self.llm_backend == LlmBackend::OpenAiCompatible && self.openai_api_key.is_empty() {
            return Err(AskDbError::Config(
                "OPENAI_API_KEY is required for the openai backend".to_string(),
            ));
        }
        if let Some(path) = &self.schema_path {
            if !path.exists() {
                return Err(AskDbError::Config(format!(
                    "schema file not found at {}",
                    path.display()
                )));
            }
        }
        Ok(())
    }

    pub fn guardrail_policy(&self) -> GuardrailPolicy {
        GuardrailPolicy {
            default_row_limit: self.default_row_limit,
            max_row_limit: self.max_row_limit,
            allow_system_tables: self.allow_system_tables,
            ..GuardrailPolicy::default()
        }
    }

    pub fn router_policy(&self) -> RouterPolicy {
        RouterPolicy {
            complex_threshold: self.router_complex_threshold,
            confidence_floor: self.router_confidence_floor,
            ..RouterPolicy::default()
        }
    }

    pub fn investigator_config(&self) -> InvestigatorConfig {
        InvestigatorConfig {
            max_rounds: self.max_rounds,
            confidence_target: self.confidence_target,
            gain_per_supported_round: self.gain_per_supported_round,
            model_max_tokens: self.llm_max_tokens,
            ..InvestigatorConfig::default()
        }
    }

    pub fn llm_client(&self) -> LlmClient {
        match self.llm_backend {
            LlmBackend::Ollama => LlmClient::new(
                LlmBackend::Ollama,
                self.ollama_base_url.clone(),
                self.ollama_model.clone(),
                String::new(),
                self.llm_timeout,
            ),
            LlmBackend::OpenAiCompatible => LlmClient::new(
                LlmBackend::OpenAiCompatible,
                self.openai_base_url.clone(),
                self.openai_model.clone(),
                self.openai_api_key.clone(),
                self.llm_timeout,
            ),
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> Result<T> {
    match std::env::var(key) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| AskDbError::Config(format!("invalid value for {key}: '{raw}'"))),
        Err(_) => Ok(default),
    }
}
