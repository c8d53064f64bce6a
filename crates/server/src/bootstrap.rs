use std::sync::Arc;
use std::time::Duration;

use medidesk_agent::ConversationRouter;
use medidesk_core::config::{AppConfig, ConfigError, LoadOptions};
use medidesk_core::errors::ApplicationError;
use medidesk_db::{
    connect_from_config, migrations, DbPool, SqlAppointmentStore, SqlChatHistoryRepository,
    SqlFeedbackRepository, SqlPatientProfileRepository,
};
use thiserror::Error;
use tracing::info;

use crate::api::ApiState;
use crate::effects::SideEffectExecutor;
use crate::sessions::SessionRegistry;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub api: ApiState,
}

impl Application {
    pub fn faq_entries(&self) -> usize {
        self.api.router.retriever().corpus().len()
    }
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("conversation runtime failed to start: {0}")]
    Runtime(#[source] ApplicationError),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );

    let db_pool =
        connect_from_config(&config.database).await.map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    let appointments = Arc::new(SqlAppointmentStore::new(db_pool.clone()));
    let router = ConversationRouter::from_config(&config, appointments)
        .await
        .map_err(BootstrapError::Runtime)?;

    let history = Arc::new(SqlChatHistoryRepository::new(db_pool.clone()));
    let api = ApiState {
        router: Arc::new(router),
        sessions: Arc::new(SessionRegistry::new(Duration::from_secs(
            config.server.session_idle_secs,
        ))),
        executor: Arc::new(SideEffectExecutor::new(history.clone())),
        history,
        feedback: Arc::new(SqlFeedbackRepository::new(db_pool.clone())),
        profiles: Arc::new(SqlPatientProfileRepository::new(db_pool.clone())),
    };

    Ok(Application { config, db_pool, api })
}
