use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use medidesk_core::config::AppConfig;
use secrecy::{ExposeSecret, SecretString};
use toml::Value;

use crate::commands::load_config;

struct Field {
    key: &'static str,
    env_key: &'static str,
    value: String,
}

pub fn run() -> String {
    let config = match load_config() {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for field in effective_fields(&config) {
        let source = field_source(
            field.key,
            field.env_key,
            config_file_doc.as_ref(),
            config_file_path.as_deref(),
        );
        lines.push(format!("- {} = {} (source: {source})", field.key, field.value));
    }

    lines.join("\n")
}

fn effective_fields(config: &AppConfig) -> Vec<Field> {
    let field = |key, env_key, value: String| Field { key, env_key, value };
    let database = &config.database;
    let llm = &config.llm;
    let safety = &config.safety;
    let retrieval = &config.retrieval;
    let scheduling = &config.scheduling;
    let clock = |time: chrono::NaiveTime| time.format("%H:%M").to_string();

    vec![
        field("database.url", "MEDIDESK_DATABASE_URL", database.url.clone()),
        field(
            "database.max_connections",
            "MEDIDESK_DATABASE_MAX_CONNECTIONS",
            database.max_connections.to_string(),
        ),
        field(
            "database.timeout_secs",
            "MEDIDESK_DATABASE_TIMEOUT_SECS",
            database.timeout_secs.to_string(),
        ),
        field("llm.provider", "MEDIDESK_LLM_PROVIDER", format!("{:?}", llm.provider)),
        field("llm.model", "MEDIDESK_LLM_MODEL", llm.model.clone()),
        field("llm.base_url", "MEDIDESK_LLM_BASE_URL", optional(llm.base_url.as_deref())),
        field("llm.api_key", "MEDIDESK_LLM_API_KEY", redact_secret(llm.api_key.as_ref())),
        field("llm.timeout_secs", "MEDIDESK_LLM_TIMEOUT_SECS", llm.timeout_secs.to_string()),
        field(
            "llm.context_window_turns",
            "MEDIDESK_LLM_CONTEXT_WINDOW_TURNS",
            llm.context_window_turns.to_string(),
        ),
        field("safety.provider", "MEDIDESK_SAFETY_PROVIDER", format!("{:?}", safety.provider)),
        field("safety.endpoint", "MEDIDESK_SAFETY_ENDPOINT", optional(safety.endpoint.as_deref())),
        field(
            "safety.api_key",
            "MEDIDESK_SAFETY_API_KEY",
            redact_secret(safety.api_key.as_ref()),
        ),
        field(
            "safety.toxicity_threshold",
            "MEDIDESK_SAFETY_TOXICITY_THRESHOLD",
            safety.toxicity_threshold.to_string(),
        ),
        field(
            "retrieval.similarity_threshold",
            "MEDIDESK_RETRIEVAL_SIMILARITY_THRESHOLD",
            retrieval.similarity_threshold.to_string(),
        ),
        field(
            "retrieval.faq_path",
            "MEDIDESK_RETRIEVAL_FAQ_PATH",
            retrieval.faq_path.display().to_string(),
        ),
        field(
            "retrieval.embedder",
            "MEDIDESK_RETRIEVAL_EMBEDDER",
            format!("{:?}", retrieval.embedder),
        ),
        field("scheduling.open_time", "", clock(scheduling.open_time)),
        field("scheduling.close_time", "", clock(scheduling.close_time)),
        field("scheduling.break_start", "", clock(scheduling.break_start)),
        field("scheduling.break_end", "", clock(scheduling.break_end)),
        field("scheduling.slot_minutes", "", scheduling.slot_minutes.to_string()),
        field(
            "scheduling.past_dates",
            "MEDIDESK_SCHEDULING_PAST_DATES",
            format!("{:?}", scheduling.past_dates),
        ),
        field(
            "server.bind_address",
            "MEDIDESK_SERVER_BIND_ADDRESS",
            config.server.bind_address.clone(),
        ),
        field("server.port", "MEDIDESK_SERVER_PORT", config.server.port.to_string()),
        field(
            "server.session_idle_secs",
            "MEDIDESK_SERVER_SESSION_IDLE_SECS",
            config.server.session_idle_secs.to_string(),
        ),
        field("logging.level", "MEDIDESK_LOGGING_LEVEL", config.logging.level.clone()),
        field(
            "logging.format",
            "MEDIDESK_LOGGING_FORMAT",
            format!("{:?}", config.logging.format),
        ),
    ]
}

fn detect_config_path() -> Option<PathBuf> {
    [PathBuf::from("medidesk.toml"), PathBuf::from("config/medidesk.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let raw = fs::read_to_string(path?).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_key: &str,
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if !env_key.is_empty() && env::var_os(env_key).is_some() {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn optional(value: Option<&str>) -> String {
    value.unwrap_or("<unset>").to_string()
}

fn redact_secret(secret: Option<&SecretString>) -> String {
    let Some(secret) = secret else {
        return "<unset>".to_string();
    };
    let exposed = secret.expose_secret().trim();
    if exposed.is_empty() {
        return "<empty>".to_string();
    }

    match exposed.split_once('-') {
        Some((prefix, _)) if prefix.len() <= 4 => format!("{prefix}-***"),
        _ => "<redacted>".to_string(),
    }
}
