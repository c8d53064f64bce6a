use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::{sqlite::SqliteRow, Row};

use medidesk_core::domain::conversation::UserId;
use medidesk_core::domain::profile::PatientProfile;

use super::{format_timestamp, parse_timestamp, PatientProfileRepository, RepositoryError};
use crate::DbPool;

pub struct SqlPatientProfileRepository {
    pool: DbPool,
}

impl SqlPatientProfileRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PatientProfileRepository for SqlPatientProfileRepository {
    async fn upsert_profile(&self, profile: &PatientProfile) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO patient_profile
                (user_id, full_name, birth_date, reason_for_appointment, updated_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT (user_id) DO UPDATE SET
                full_name = excluded.full_name,
                birth_date = excluded.birth_date,
                reason_for_appointment = excluded.reason_for_appointment,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&profile.user_id.0)
        .bind(&profile.full_name)
        .bind(profile.birth_date.format("%Y-%m-%d").to_string())
        .bind(profile.reason_for_appointment.as_deref())
        .bind(format_timestamp(&profile.updated_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_profile(
        &self,
        user_id: &UserId,
    ) -> Result<Option<PatientProfile>, RepositoryError> {
        let row = sqlx::query(
            r#"
            SELECT user_id, full_name, birth_date, reason_for_appointment, updated_at
            FROM patient_profile
            WHERE user_id = ?
            "#,
        )
        .bind(&user_id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(profile_from_row).transpose()
    }
}

fn profile_from_row(row: &SqliteRow) -> Result<PatientProfile, RepositoryError> {
    let birth_date: String = row.try_get("birth_date")?;
    let updated_at: String = row.try_get("updated_at")?;

    Ok(PatientProfile {
        user_id: UserId(row.try_get("user_id")?),
        full_name: row.try_get("full_name")?,
        birth_date: NaiveDate::parse_from_str(&birth_date, "%Y-%m-%d").map_err(|e| {
            RepositoryError::Decode(format!("invalid date in `birth_date`: {e}"))
        })?,
        reason_for_appointment: row.try_get("reason_for_appointment")?,
        updated_at: parse_timestamp("updated_at", &updated_at)?,
    })
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use medidesk_core::domain::conversation::UserId;
    use medidesk_core::domain::profile::PatientProfile;

    use super::SqlPatientProfileRepository;
    use crate::repositories::PatientProfileRepository;
    use crate::{connect_with_settings, migrations};

    fn profile(user: &str, name: &str, reason: Option<&str>) -> PatientProfile {
        let today = NaiveDate::from_ymd_opt(2026, 10, 18).expect("date");
        let birth = NaiveDate::from_ymd_opt(1988, 3, 14).expect("date");
        PatientProfile::new(UserId(user.to_string()), name, birth, reason, today).expect("profile")
    }

    #[tokio::test]
    async fn saving_twice_replaces_the_profile() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        let repo = SqlPatientProfileRepository::new(pool.clone());
        let alice = UserId("alice".to_string());

        repo.upsert_profile(&profile("alice", "Alice M.", Some("back pain"))).await.expect("save");
        repo.upsert_profile(&profile("alice", "Alice Martin", None)).await.expect("save");

        let stored = repo.find_profile(&alice).await.expect("find").expect("profile exists");
        assert_eq!(stored.full_name, "Alice Martin");
        assert_eq!(stored.birth_date, NaiveDate::from_ymd_opt(1988, 3, 14).expect("date"));
        assert_eq!(stored.reason_for_appointment, None);

        let (rows,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM patient_profile")
            .fetch_one(&pool)
            .await
            .expect("count");
        assert_eq!(rows, 1);
    }

    #[tokio::test]
    async fn unknown_user_has_no_profile() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        let repo = SqlPatientProfileRepository::new(pool);

        let found = repo.find_profile(&UserId("nobody".to_string())).await.expect("find");

        assert!(found.is_none());
    }
}
