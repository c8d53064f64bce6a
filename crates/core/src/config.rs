use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::NaiveTime;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::errors::DomainError;
use crate::scheduling::{BusinessHours, PastDatePolicy, SlotAllocator};

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub llm: LlmConfig,
    pub safety: SafetyConfig,
    pub retrieval: RetrievalConfig,
    pub scheduling: SchedulingConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

/// The generative fallback service.
#[derive(Clone, Debug)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub api_key: Option<SecretString>,
    pub base_url: Option<String>,
    pub model: String,
    pub temperature: f32,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub context_window_turns: usize,
    pub system_prompt: String,
}

#[derive(Clone, Debug)]
pub struct SafetyConfig {
    pub provider: SafetyProvider,
    pub endpoint: Option<String>,
    pub api_key: Option<SecretString>,
    pub toxicity_threshold: f32,
    pub timeout_ms: u64,
}

#[derive(Clone, Debug)]
pub struct RetrievalConfig {
    pub similarity_threshold: f32,
    pub faq_path: PathBuf,
    pub embedder: EmbedderKind,
    pub embedding_endpoint: String,
    pub embedding_model: String,
    pub embedding_dim: usize,
    pub timeout_ms: u64,
}

#[derive(Clone, Debug)]
pub struct SchedulingConfig {
    pub open_time: NaiveTime,
    pub close_time: NaiveTime,
    pub break_start: NaiveTime,
    pub break_end: NaiveTime,
    pub slot_minutes: u32,
    pub past_dates: PastDatePolicy,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub graceful_shutdown_secs: u64,
    pub session_idle_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmProvider {
    OpenAi,
    Groq,
    Ollama,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SafetyProvider {
    Lexicon,
    Http,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbedderKind {
    Hash,
    Ollama,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub llm_provider: Option<LlmProvider>,
    pub llm_model: Option<String>,
    pub llm_api_key: Option<String>,
    pub safety_provider: Option<SafetyProvider>,
    pub similarity_threshold: Option<f32>,
    pub faq_path: Option<PathBuf>,
    pub past_dates: Option<PastDatePolicy>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant for a medical practice. \
Answer general questions about the practice briefly and politely. Do not give diagnoses; \
suggest booking an appointment when the patient needs to see a doctor.";

fn clock(hour: u32, minute: u32) -> NaiveTime {
    NaiveTime::from_num_seconds_from_midnight_opt(hour * 3600 + minute * 60, 0)
        .unwrap_or(NaiveTime::MIN)
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://medidesk.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            llm: LlmConfig {
                provider: LlmProvider::Ollama,
                api_key: None,
                base_url: None,
                model: "llama3.1".to_string(),
                temperature: 0.5,
                timeout_secs: 30,
                max_retries: 1,
                context_window_turns: 10,
                system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            },
            safety: SafetyConfig {
                provider: SafetyProvider::Lexicon,
                endpoint: None,
                api_key: None,
                toxicity_threshold: 0.5,
                timeout_ms: 2_000,
            },
            retrieval: RetrievalConfig {
                similarity_threshold: 0.75,
                faq_path: PathBuf::from("faq.txt"),
                embedder: EmbedderKind::Hash,
                embedding_endpoint: "http://localhost:11434".to_string(),
                embedding_model: "all-minilm".to_string(),
                embedding_dim: 384,
                timeout_ms: 2_000,
            },
            scheduling: SchedulingConfig {
                open_time: clock(9, 0),
                close_time: clock(17, 0),
                break_start: clock(13, 0),
                break_end: clock(14, 0),
                slot_minutes: 30,
                past_dates: PastDatePolicy::Reject,
            },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 8080,
                graceful_shutdown_secs: 15,
                session_idle_secs: 1800,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for LlmProvider {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "openai" | "open_ai" => Ok(Self::OpenAi),
            "groq" => Ok(Self::Groq),
            "ollama" => Ok(Self::Ollama),
            other => Err(ConfigError::Validation(format!(
                "unsupported llm provider `{other}` (expected openai|groq|ollama)"
            ))),
        }
    }
}

impl std::str::FromStr for SafetyProvider {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "lexicon" => Ok(Self::Lexicon),
            "http" => Ok(Self::Http),
            other => Err(ConfigError::Validation(format!(
                "unsupported safety provider `{other}` (expected lexicon|http)"
            ))),
        }
    }
}

impl std::str::FromStr for EmbedderKind {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "hash" => Ok(Self::Hash),
            "ollama" => Ok(Self::Ollama),
            other => Err(ConfigError::Validation(format!(
                "unsupported embedder `{other}` (expected hash|ollama)"
            ))),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl LlmConfig {
    /// OpenAI-compatible base URL, falling back to the provider's public endpoint.
    pub fn endpoint(&self) -> String {
        if let Some(base_url) = self.base_url.as_deref().filter(|url| !url.trim().is_empty()) {
            return base_url.trim_end_matches('/').to_string();
        }
        match self.provider {
            LlmProvider::OpenAi => "https://api.openai.com/v1".to_string(),
            LlmProvider::Groq => "https://api.groq.com/openai/v1".to_string(),
            LlmProvider::Ollama => "http://localhost:11434/v1".to_string(),
        }
    }
}

impl SchedulingConfig {
    pub fn business_hours(&self) -> Result<BusinessHours, DomainError> {
        BusinessHours::try_new(
            self.open_time,
            self.close_time,
            self.break_start,
            self.break_end,
            self.slot_minutes,
        )
    }

    pub fn allocator(&self) -> Result<SlotAllocator, DomainError> {
        Ok(SlotAllocator::new(self.business_hours()?, self.past_dates))
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch)?;
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("medidesk.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) -> Result<(), ConfigError> {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(llm) = patch.llm {
            if let Some(provider) = llm.provider {
                self.llm.provider = provider;
            }
            if let Some(llm_api_key_value) = llm.api_key {
                self.llm.api_key = Some(secret_value(llm_api_key_value));
            }
            if let Some(base_url) = llm.base_url {
                self.llm.base_url = Some(base_url);
            }
            if let Some(model) = llm.model {
                self.llm.model = model;
            }
            if let Some(temperature) = llm.temperature {
                self.llm.temperature = temperature;
            }
            if let Some(timeout_secs) = llm.timeout_secs {
                self.llm.timeout_secs = timeout_secs;
            }
            if let Some(max_retries) = llm.max_retries {
                self.llm.max_retries = max_retries;
            }
            if let Some(context_window_turns) = llm.context_window_turns {
                self.llm.context_window_turns = context_window_turns;
            }
            if let Some(system_prompt) = llm.system_prompt {
                self.llm.system_prompt = system_prompt;
            }
        }

        if let Some(safety) = patch.safety {
            if let Some(provider) = safety.provider {
                self.safety.provider = provider;
            }
            if let Some(endpoint) = safety.endpoint {
                self.safety.endpoint = Some(endpoint);
            }
            if let Some(safety_api_key_value) = safety.api_key {
                self.safety.api_key = Some(secret_value(safety_api_key_value));
            }
            if let Some(toxicity_threshold) = safety.toxicity_threshold {
                self.safety.toxicity_threshold = toxicity_threshold;
            }
            if let Some(timeout_ms) = safety.timeout_ms {
                self.safety.timeout_ms = timeout_ms;
            }
        }

        if let Some(retrieval) = patch.retrieval {
            if let Some(similarity_threshold) = retrieval.similarity_threshold {
                self.retrieval.similarity_threshold = similarity_threshold;
            }
            if let Some(faq_path) = retrieval.faq_path {
                self.retrieval.faq_path = faq_path;
            }
            if let Some(embedder) = retrieval.embedder {
                self.retrieval.embedder = embedder;
            }
            if let Some(embedding_endpoint) = retrieval.embedding_endpoint {
                self.retrieval.embedding_endpoint = embedding_endpoint;
            }
            if let Some(embedding_model) = retrieval.embedding_model {
                self.retrieval.embedding_model = embedding_model;
            }
            if let Some(embedding_dim) = retrieval.embedding_dim {
                self.retrieval.embedding_dim = embedding_dim;
            }
            if let Some(timeout_ms) = retrieval.timeout_ms {
                self.retrieval.timeout_ms = timeout_ms;
            }
        }

        if let Some(scheduling) = patch.scheduling {
            if let Some(value) = scheduling.open_time {
                self.scheduling.open_time = parse_clock("scheduling.open_time", &value)?;
            }
            if let Some(value) = scheduling.close_time {
                self.scheduling.close_time = parse_clock("scheduling.close_time", &value)?;
            }
            if let Some(value) = scheduling.break_start {
                self.scheduling.break_start = parse_clock("scheduling.break_start", &value)?;
            }
            if let Some(value) = scheduling.break_end {
                self.scheduling.break_end = parse_clock("scheduling.break_end", &value)?;
            }
            if let Some(slot_minutes) = scheduling.slot_minutes {
                self.scheduling.slot_minutes = slot_minutes;
            }
            if let Some(past_dates) = scheduling.past_dates {
                self.scheduling.past_dates = past_dates;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
            if let Some(session_idle_secs) = server.session_idle_secs {
                self.server.session_idle_secs = session_idle_secs;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }

        Ok(())
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("MEDIDESK_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("MEDIDESK_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections =
                parse_env("MEDIDESK_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("MEDIDESK_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_env("MEDIDESK_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("MEDIDESK_LLM_PROVIDER") {
            self.llm.provider = value.parse()?;
        }
        if let Some(value) = read_env("MEDIDESK_LLM_API_KEY") {
            self.llm.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("MEDIDESK_LLM_BASE_URL") {
            self.llm.base_url = Some(value);
        }
        if let Some(value) = read_env("MEDIDESK_LLM_MODEL") {
            self.llm.model = value;
        }
        if let Some(value) = read_env("MEDIDESK_LLM_TEMPERATURE") {
            self.llm.temperature = parse_env("MEDIDESK_LLM_TEMPERATURE", &value)?;
        }
        if let Some(value) = read_env("MEDIDESK_LLM_TIMEOUT_SECS") {
            self.llm.timeout_secs = parse_env("MEDIDESK_LLM_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("MEDIDESK_LLM_MAX_RETRIES") {
            self.llm.max_retries = parse_env("MEDIDESK_LLM_MAX_RETRIES", &value)?;
        }
        if let Some(value) = read_env("MEDIDESK_LLM_CONTEXT_WINDOW_TURNS") {
            self.llm.context_window_turns =
                parse_env("MEDIDESK_LLM_CONTEXT_WINDOW_TURNS", &value)?;
        }

        if let Some(value) = read_env("MEDIDESK_SAFETY_PROVIDER") {
            self.safety.provider = value.parse()?;
        }
        if let Some(value) = read_env("MEDIDESK_SAFETY_ENDPOINT") {
            self.safety.endpoint = Some(value);
        }
        if let Some(value) = read_env("MEDIDESK_SAFETY_API_KEY") {
            self.safety.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("MEDIDESK_SAFETY_TOXICITY_THRESHOLD") {
            self.safety.toxicity_threshold =
                parse_env("MEDIDESK_SAFETY_TOXICITY_THRESHOLD", &value)?;
        }
        if let Some(value) = read_env("MEDIDESK_SAFETY_TIMEOUT_MS") {
            self.safety.timeout_ms = parse_env("MEDIDESK_SAFETY_TIMEOUT_MS", &value)?;
        }

        if let Some(value) = read_env("MEDIDESK_RETRIEVAL_SIMILARITY_THRESHOLD") {
            self.retrieval.similarity_threshold =
                parse_env("MEDIDESK_RETRIEVAL_SIMILARITY_THRESHOLD", &value)?;
        }
        if let Some(value) = read_env("MEDIDESK_RETRIEVAL_FAQ_PATH") {
            self.retrieval.faq_path = PathBuf::from(value);
        }
        if let Some(value) = read_env("MEDIDESK_RETRIEVAL_EMBEDDER") {
            self.retrieval.embedder = value.parse()?;
        }
        if let Some(value) = read_env("MEDIDESK_RETRIEVAL_EMBEDDING_ENDPOINT") {
            self.retrieval.embedding_endpoint = value;
        }
        if let Some(value) = read_env("MEDIDESK_RETRIEVAL_EMBEDDING_MODEL") {
            self.retrieval.embedding_model = value;
        }
        if let Some(value) = read_env("MEDIDESK_RETRIEVAL_TIMEOUT_MS") {
            self.retrieval.timeout_ms = parse_env("MEDIDESK_RETRIEVAL_TIMEOUT_MS", &value)?;
        }

        if let Some(value) = read_env("MEDIDESK_SCHEDULING_PAST_DATES") {
            self.scheduling.past_dates = value.parse().map_err(|_| {
                ConfigError::InvalidEnvOverride {
                    key: "MEDIDESK_SCHEDULING_PAST_DATES".to_string(),
                    value: value.clone(),
                }
            })?;
        }

        if let Some(value) = read_env("MEDIDESK_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("MEDIDESK_SERVER_PORT") {
            self.server.port = parse_env("MEDIDESK_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("MEDIDESK_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_env("MEDIDESK_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }
        if let Some(value) = read_env("MEDIDESK_SERVER_SESSION_IDLE_SECS") {
            self.server.session_idle_secs =
                parse_env("MEDIDESK_SERVER_SESSION_IDLE_SECS", &value)?;
        }

        let log_level =
            read_env("MEDIDESK_LOGGING_LEVEL").or_else(|| read_env("MEDIDESK_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("MEDIDESK_LOGGING_FORMAT").or_else(|| read_env("MEDIDESK_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(llm_provider) = overrides.llm_provider {
            self.llm.provider = llm_provider;
        }
        if let Some(llm_model) = overrides.llm_model {
            self.llm.model = llm_model;
        }
        if let Some(llm_api_key) = overrides.llm_api_key {
            self.llm.api_key = Some(secret_value(llm_api_key));
        }
        if let Some(safety_provider) = overrides.safety_provider {
            self.safety.provider = safety_provider;
        }
        if let Some(similarity_threshold) = overrides.similarity_threshold {
            self.retrieval.similarity_threshold = similarity_threshold;
        }
        if let Some(faq_path) = overrides.faq_path {
            self.retrieval.faq_path = faq_path;
        }
        if let Some(past_dates) = overrides.past_dates {
            self.scheduling.past_dates = past_dates;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_llm(&self.llm)?;
        validate_safety(&self.safety)?;
        validate_retrieval(&self.retrieval)?;
        validate_scheduling(&self.scheduling)?;
        validate_server(&self.server)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("medidesk.toml"), PathBuf::from("config/medidesk.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_llm(llm: &LlmConfig) -> Result<(), ConfigError> {
    if llm.timeout_secs == 0 || llm.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "llm.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    if llm.context_window_turns == 0 || llm.context_window_turns > 50 {
        return Err(ConfigError::Validation(
            "llm.context_window_turns must be in range 1..=50".to_string(),
        ));
    }

    if !(0.0..=2.0).contains(&llm.temperature) {
        return Err(ConfigError::Validation(
            "llm.temperature must be in range 0.0..=2.0".to_string(),
        ));
    }

    if llm.model.trim().is_empty() {
        return Err(ConfigError::Validation("llm.model must not be empty".to_string()));
    }

    match llm.provider {
        LlmProvider::OpenAi | LlmProvider::Groq => {
            let missing = llm
                .api_key
                .as_ref()
                .map(|value| value.expose_secret().trim().is_empty())
                .unwrap_or(true);
            if missing {
                return Err(ConfigError::Validation(
                    "llm.api_key is required for openai/groq providers".to_string(),
                ));
            }
        }
        LlmProvider::Ollama => {}
    }

    if let Some(base_url) = &llm.base_url {
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(ConfigError::Validation(
                "llm.base_url must start with http:// or https://".to_string(),
            ));
        }
    }

    Ok(())
}

fn validate_safety(safety: &SafetyConfig) -> Result<(), ConfigError> {
    if !(safety.toxicity_threshold > 0.0 && safety.toxicity_threshold <= 1.0) {
        return Err(ConfigError::Validation(
            "safety.toxicity_threshold must be in range (0.0, 1.0]".to_string(),
        ));
    }

    if safety.timeout_ms == 0 || safety.timeout_ms > 60_000 {
        return Err(ConfigError::Validation(
            "safety.timeout_ms must be in range 1..=60000".to_string(),
        ));
    }

    if safety.provider == SafetyProvider::Http {
        let endpoint = safety.endpoint.as_deref().map(str::trim).unwrap_or_default();
        if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
            return Err(ConfigError::Validation(
                "safety.endpoint must be an http(s) URL when safety.provider = http".to_string(),
            ));
        }
    }

    Ok(())
}

fn validate_retrieval(retrieval: &RetrievalConfig) -> Result<(), ConfigError> {
    if !(retrieval.similarity_threshold > 0.0 && retrieval.similarity_threshold <= 1.0) {
        return Err(ConfigError::Validation(
            "retrieval.similarity_threshold must be in range (0.0, 1.0]".to_string(),
        ));
    }

    if retrieval.timeout_ms == 0 || retrieval.timeout_ms > 60_000 {
        return Err(ConfigError::Validation(
            "retrieval.timeout_ms must be in range 1..=60000".to_string(),
        ));
    }

    if retrieval.embedding_dim < 8 {
        return Err(ConfigError::Validation(
            "retrieval.embedding_dim must be at least 8".to_string(),
        ));
    }

    if retrieval.embedder == EmbedderKind::Ollama {
        let endpoint = retrieval.embedding_endpoint.trim();
        if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
            return Err(ConfigError::Validation(
                "retrieval.embedding_endpoint must be an http(s) URL for the ollama embedder"
                    .to_string(),
            ));
        }
    }

    Ok(())
}

fn validate_scheduling(scheduling: &SchedulingConfig) -> Result<(), ConfigError> {
    scheduling
        .business_hours()
        .map(|_| ())
        .map_err(|error| ConfigError::Validation(format!("scheduling: {error}")))
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.port == 0 {
        return Err(ConfigError::Validation("server.port must be greater than zero".to_string()));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    if server.session_idle_secs == 0 {
        return Err(ConfigError::Validation(
            "server.session_idle_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse::<T>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_clock(key: &str, value: &str) -> Result<NaiveTime, ConfigError> {
    NaiveTime::parse_from_str(value.trim(), "%H:%M")
        .map_err(|_| ConfigError::Validation(format!("{key} must be a HH:MM time, got `{value}`")))
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    llm: Option<LlmPatch>,
    safety: Option<SafetyPatch>,
    retrieval: Option<RetrievalPatch>,
    scheduling: Option<SchedulingPatch>,
    server: Option<ServerPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LlmPatch {
    provider: Option<LlmProvider>,
    api_key: Option<String>,
    base_url: Option<String>,
    model: Option<String>,
    temperature: Option<f32>,
    timeout_secs: Option<u64>,
    max_retries: Option<u32>,
    context_window_turns: Option<usize>,
    system_prompt: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct SafetyPatch {
    provider: Option<SafetyProvider>,
    endpoint: Option<String>,
    api_key: Option<String>,
    toxicity_threshold: Option<f32>,
    timeout_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct RetrievalPatch {
    similarity_threshold: Option<f32>,
    faq_path: Option<PathBuf>,
    embedder: Option<EmbedderKind>,
    embedding_endpoint: Option<String>,
    embedding_model: Option<String>,
    embedding_dim: Option<usize>,
    timeout_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct SchedulingPatch {
    open_time: Option<String>,
    close_time: Option<String>,
    break_start: Option<String>,
    break_end: Option<String>,
    slot_minutes: Option<u32>,
    past_dates: Option<PastDatePolicy>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
    session_idle_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

#[cfg(test)]
mod tests {
    use std::env;
    use std::fs;
    use std::io;
    use std::sync::{Mutex, OnceLock};

    use chrono::NaiveTime;
    use secrecy::ExposeSecret;
    use tempfile::TempDir;

    use super::{AppConfig, ConfigError, ConfigOverrides, LlmProvider, LoadOptions, LogFormat};
    use crate::scheduling::PastDatePolicy;

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

    fn env_lock() -> &'static Mutex<()> {
        ENV_LOCK.get_or_init(|| Mutex::new(()))
    }

    fn clear_vars(vars: &[&str]) {
        for var in vars {
            env::remove_var(var);
        }
    }

    fn ensure(condition: bool, message: &'static str) -> Result<(), String> {
        if condition {
            Ok(())
        } else {
            Err(message.to_string())
        }
    }

    #[test]
    fn defaults_validate_and_match_practice_hours() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        let config = AppConfig::load(LoadOptions {
            config_path: Some("does-not-exist.toml".into()),
            ..LoadOptions::default()
        })
        .map_err(|err| format!("config load failed: {err}"))?;

        ensure(config.retrieval.similarity_threshold == 0.75, "default threshold is 0.75")?;
        ensure(config.safety.toxicity_threshold == 0.5, "default toxicity cutoff is 0.5")?;
        ensure(config.llm.context_window_turns == 10, "default context window is 10 turns")?;
        ensure(
            config.scheduling.open_time == NaiveTime::from_hms_opt(9, 0, 0).unwrap_or_default(),
            "practice opens at 09:00",
        )?;
        ensure(config.scheduling.past_dates == PastDatePolicy::Reject, "past dates rejected")?;
        ensure(config.scheduling.allocator().is_ok(), "default hours build an allocator")
    }

    #[test]
    fn file_load_supports_env_interpolation() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("TEST_GROQ_KEY", "gsk-from-env");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("medidesk.toml");
            fs::write(
                &path,
                r#"
[llm]
provider = "groq"
api_key = "${TEST_GROQ_KEY}"
model = "llama-3.1-8b-instant"

[scheduling]
open_time = "08:00"
close_time = "16:00"
break_start = "12:00"
break_end = "12:30"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config =
                AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() })
                    .map_err(|err| format!("config load failed: {err}"))?;

            ensure(config.llm.provider == LlmProvider::Groq, "provider loaded from file")?;
            ensure(
                config.llm.api_key.as_ref().map(|key| key.expose_secret() == "gsk-from-env")
                    == Some(true),
                "api key should be loaded from environment",
            )?;
            ensure(
                config.llm.endpoint() == "https://api.groq.com/openai/v1",
                "groq endpoint is derived from provider",
            )?;
            ensure(
                config.scheduling.break_end == NaiveTime::from_hms_opt(12, 30, 0).unwrap_or_default(),
                "break end parsed from HH:MM",
            )?;
            Ok(())
        })();

        clear_vars(&["TEST_GROQ_KEY"]);
        result
    }

    #[test]
    fn logging_env_aliases_are_supported() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("MEDIDESK_LOG_LEVEL", "warn");
        env::set_var("MEDIDESK_LOG_FORMAT", "pretty");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;

            ensure(config.logging.level == "warn", "warning log level should be set from env var")?;
            ensure(
                matches!(config.logging.format, LogFormat::Pretty),
                "pretty logging format should be set from env var",
            )?;
            Ok(())
        })();

        clear_vars(&["MEDIDESK_LOG_LEVEL", "MEDIDESK_LOG_FORMAT"]);
        result
    }

    #[test]
    fn precedence_defaults_file_env_overrides() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("MEDIDESK_DATABASE_URL", "sqlite://from-env.db");
        env::set_var("MEDIDESK_RETRIEVAL_SIMILARITY_THRESHOLD", "0.8");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("medidesk.toml");
            fs::write(
                &path,
                r#"
[database]
url = "sqlite://from-file.db"

[retrieval]
similarity_threshold = 0.7

[logging]
level = "warn"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config = AppConfig::load(LoadOptions {
                config_path: Some(path),
                overrides: ConfigOverrides {
                    database_url: Some("sqlite://from-override.db".to_string()),
                    log_level: Some("debug".to_string()),
                    ..ConfigOverrides::default()
                },
                ..LoadOptions::default()
            })
            .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.database.url == "sqlite://from-override.db",
                "override database url should win",
            )?;
            ensure(config.logging.level == "debug", "overridden log level should be debug")?;
            ensure(
                config.retrieval.similarity_threshold == 0.8,
                "env threshold should win over file and defaults",
            )?;
            Ok(())
        })();

        clear_vars(&["MEDIDESK_DATABASE_URL", "MEDIDESK_RETRIEVAL_SIMILARITY_THRESHOLD"]);
        result
    }

    #[test]
    fn validation_fails_fast_with_actionable_error() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("MEDIDESK_RETRIEVAL_SIMILARITY_THRESHOLD", "1.5");

        let result = (|| -> Result<(), String> {
            let error = match AppConfig::load(LoadOptions::default()) {
                Ok(_) => {
                    return Err("expected validation failure but config load succeeded".to_string())
                }
                Err(error) => error,
            };
            let has_message = matches!(
                error,
                ConfigError::Validation(ref message) if message.contains("similarity_threshold")
            );
            ensure(has_message, "validation failure should mention similarity_threshold")
        })();

        clear_vars(&["MEDIDESK_RETRIEVAL_SIMILARITY_THRESHOLD"]);
        result
    }

    #[test]
    fn session_idle_window_is_configurable_and_must_be_positive() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("MEDIDESK_SERVER_SESSION_IDLE_SECS", "90");
        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;
            ensure(config.server.session_idle_secs == 90, "idle window should come from env var")?;

            env::set_var("MEDIDESK_SERVER_SESSION_IDLE_SECS", "0");
            let error = AppConfig::load(LoadOptions::default());
            ensure(
                matches!(error, Err(ConfigError::Validation(ref message)) if message.contains("session_idle_secs")),
                "a zero idle window must fail validation",
            )
        })();

        clear_vars(&["MEDIDESK_SERVER_SESSION_IDLE_SECS"]);
        result
    }

    #[test]
    fn hosted_llm_requires_api_key() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        let error = AppConfig::load(LoadOptions {
            overrides: ConfigOverrides {
                llm_provider: Some(LlmProvider::OpenAi),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        });

        ensure(
            matches!(error, Err(ConfigError::Validation(ref message)) if message.contains("llm.api_key")),
            "openai without a key must fail validation",
        )
    }

    #[test]
    fn inverted_business_hours_are_rejected() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("medidesk.toml");
            fs::write(&path, "[scheduling]\nopen_time = \"18:00\"\n").map_err(|err| err.to_string())?;

            let error =
                AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() });
            ensure(
                matches!(error, Err(ConfigError::Validation(ref message)) if message.starts_with("scheduling")),
                "opening after closing must fail validation",
            )
        })();

        result
    }

    #[test]
    fn secret_values_are_not_leaked_by_debug() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("MEDIDESK_LLM_API_KEY", "gsk-secret-value");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;
            let debug = format!("{config:?}");

            ensure(!debug.contains("gsk-secret-value"), "debug output should not contain api key")?;
            ensure(
                matches!(config.logging.format, LogFormat::Compact),
                "default logging format should be compact",
            )?;
            Ok(())
        })();

        clear_vars(&["MEDIDESK_LLM_API_KEY"]);
        result
    }
}
