use async_trait::async_trait;
use sqlx::{sqlite::SqliteRow, Row};

use medidesk_core::domain::conversation::{
    ChatTurn, ResponseRoute, SessionId, SessionSummary, UserId,
};

use super::{format_timestamp, parse_timestamp, ChatHistoryRepository, RepositoryError};
use crate::DbPool;

pub struct SqlChatHistoryRepository {
    pool: DbPool,
}

impl SqlChatHistoryRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ChatHistoryRepository for SqlChatHistoryRepository {
    async fn save_turn(
        &self,
        user_id: &UserId,
        session_id: &SessionId,
        turn: &ChatTurn,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO chat_turn (
                user_id, session_id, user_message, assistant_message, route, created_at
            ) VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&user_id.0)
        .bind(&session_id.0)
        .bind(&turn.user_message)
        .bind(&turn.assistant_message)
        .bind(turn.route.as_str())
        .bind(format_timestamp(&turn.occurred_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_sessions(&self, user_id: &UserId) -> Result<Vec<SessionSummary>, RepositoryError> {
        let rows = sqlx::query(
            r#"
            SELECT
                session_id,
                COUNT(*) AS turn_count,
                MIN(created_at) AS started_at,
                MAX(created_at) AS last_activity_at
            FROM chat_turn
            WHERE user_id = ?
            GROUP BY session_id
            ORDER BY MAX(id) DESC
            "#,
        )
        .bind(&user_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(session_summary_from_row).collect()
    }

    async fn history(
        &self,
        user_id: &UserId,
        session_id: &SessionId,
    ) -> Result<Vec<ChatTurn>, RepositoryError> {
        let rows = sqlx::query(
            r#"
            SELECT user_message, assistant_message, route, created_at
            FROM chat_turn
            WHERE user_id = ? AND session_id = ?
            ORDER BY id ASC
            "#,
        )
        .bind(&user_id.0)
        .bind(&session_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(chat_turn_from_row).collect()
    }
}

fn chat_turn_from_row(row: &SqliteRow) -> Result<ChatTurn, RepositoryError> {
    let route: String = row.try_get("route")?;
    let created_at: String = row.try_get("created_at")?;

    Ok(ChatTurn {
        user_message: row.try_get("user_message")?,
        assistant_message: row.try_get("assistant_message")?,
        route: ResponseRoute::parse(&route)
            .ok_or_else(|| RepositoryError::Decode(format!("invalid route: {route}")))?,
        occurred_at: parse_timestamp("created_at", &created_at)?,
    })
}

fn session_summary_from_row(row: &SqliteRow) -> Result<SessionSummary, RepositoryError> {
    let session_id: String = row.try_get("session_id")?;
    let turn_count: i64 = row.try_get("turn_count")?;
    let started_at: String = row.try_get("started_at")?;
    let last_activity_at: String = row.try_get("last_activity_at")?;

    Ok(SessionSummary {
        session_id: SessionId(session_id),
        turn_count: u32::try_from(turn_count)
            .map_err(|_| RepositoryError::Decode(format!("invalid turn_count: {turn_count}")))?,
        started_at: parse_timestamp("started_at", &started_at)?,
        last_activity_at: parse_timestamp("last_activity_at", &last_activity_at)?,
    })
}
