//! Preflight for `medidesk-server`: everything the server needs before it
//! binds a port, checked without serving traffic.

use std::path::Path;

use crate::commands::{current_thread_runtime, load_config, CommandResult};
use medidesk_core::config::AppConfig;
use medidesk_core::domain::faq::parse_faq_document;
use medidesk_db::{connect_from_config, migrations};

pub fn run() -> CommandResult {
    let config = match load_config() {
        Ok(config) => config,
        Err(error) => return CommandResult::config_failure("start", error),
    };

    let faq_entries = match count_faq_entries(&config.retrieval.faq_path) {
        Ok(count) => count,
        Err(message) => return CommandResult::failure("start", "faq_corpus", message, 6),
    };

    let runtime = match current_thread_runtime() {
        Ok(runtime) => runtime,
        Err(error) => return CommandResult::runtime_failure("start", error),
    };

    match runtime.block_on(check_database(&config)) {
        Ok(()) => CommandResult::success(
            "start",
            format!(
                "preflight passed: database ready, {faq_entries} FAQ entries, \
                 server will listen on {}:{}",
                config.server.bind_address, config.server.port
            ),
        ),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("start", error_class, message, exit_code)
        }
    }
}

pub(crate) fn count_faq_entries(path: &Path) -> Result<usize, String> {
    let raw = std::fs::read_to_string(path)
        .map_err(|error| format!("FAQ corpus `{}` unavailable: {error}", path.display()))?;
    Ok(parse_faq_document(&raw).len())
}

async fn check_database(config: &AppConfig) -> Result<(), (&'static str, String, u8)> {
    let pool = connect_from_config(&config.database)
        .await
        .map_err(|error| ("db_connectivity", error.to_string(), 4u8))?;
    migrations::run_pending(&pool).await.map_err(|error| ("migration", error.to_string(), 5u8))?;
    pool.close().await;
    Ok(())
}
