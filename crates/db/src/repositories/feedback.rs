use async_trait::async_trait;
use sqlx::{sqlite::SqliteRow, Row};

use medidesk_core::domain::conversation::UserId;
use medidesk_core::domain::feedback::Feedback;

use super::{format_timestamp, parse_timestamp, FeedbackRepository, RepositoryError};
use crate::DbPool;

pub struct SqlFeedbackRepository {
    pool: DbPool,
}

impl SqlFeedbackRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl FeedbackRepository for SqlFeedbackRepository {
    async fn submit_feedback(&self, feedback: &Feedback) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO feedback (id, user_id, feedback_text, created_at)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(uuid::Uuid::new_v4().to_string())
        .bind(&feedback.user_id.0)
        .bind(&feedback.text)
        .bind(format_timestamp(&feedback.submitted_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_feedback(&self, user_id: &UserId) -> Result<Vec<Feedback>, RepositoryError> {
        let rows = sqlx::query(
            r#"
            SELECT user_id, feedback_text, created_at
            FROM feedback
            WHERE user_id = ?
            ORDER BY created_at ASC
            "#,
        )
        .bind(&user_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(feedback_from_row).collect()
    }
}

fn feedback_from_row(row: &SqliteRow) -> Result<Feedback, RepositoryError> {
    let created_at: String = row.try_get("created_at")?;

    Ok(Feedback {
        user_id: UserId(row.try_get("user_id")?),
        text: row.try_get("feedback_text")?,
        submitted_at: parse_timestamp("created_at", &created_at)?,
    })
}
