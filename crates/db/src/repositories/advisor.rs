use async_trait::async_trait;
use sqlx::{sqlite::SqliteRow, Row};

use consult_core::domain::advisor::{Advisor, AdvisorId, AdvisorStatus};

use super::{format_timestamp, parse_decimal, parse_timestamp, AdvisorRepository, RepositoryError};
use crate::DbPool;

pub struct SqlAdvisorRepository {
    pool: DbPool,
}

impl SqlAdvisorRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AdvisorRepository for SqlAdvisorRepository {
    async fn find_by_id(&self, id: &AdvisorId) -> Result<Option<Advisor>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, display_name, email, status, rating, created_at
             FROM consultants
             WHERE id = ?",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(advisor_from_row).transpose()
    }

    async fn list_active(&self) -> Result<Vec<Advisor>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, display_name, email, status, rating, created_at
             FROM consultants
             WHERE status = ?
             ORDER BY id ASC",
        )
        .bind(AdvisorStatus::Active.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(advisor_from_row).collect()
    }

    async fn save(&self, advisor: Advisor) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO consultants (id, display_name, email, status, rating, created_at)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                display_name = excluded.display_name,
                email = excluded.email,
                status = excluded.status,
                rating = excluded.rating",
        )
        .bind(&advisor.id.0)
        .bind(&advisor.display_name)
        .bind(&advisor.email)
        .bind(advisor.status.as_str())
        .bind(advisor.rating.map(|rating| rating.to_string()))
        .bind(format_timestamp(advisor.created_at))
        .execute(&self.pool)
        .await
        .map_err(|error| {
            let duplicate = error
                .as_database_error()
                .is_some_and(|database_error| database_error.is_unique_violation());
            if duplicate {
                RepositoryError::Conflict(format!(
                    "advisor email {} is already registered",
                    advisor.email
                ))
            } else {
                RepositoryError::Database(error)
            }
        })?;

        Ok(())
    }
}

fn advisor_from_row(row: SqliteRow) -> Result<Advisor, RepositoryError> {
    let status: String = row.try_get("status")?;

    Ok(Advisor {
        id: AdvisorId(row.try_get("id")?),
        display_name: row.try_get("display_name")?,
        email: row.try_get("email")?,
        status: AdvisorStatus::parse(&status)
            .ok_or_else(|| RepositoryError::Decode(format!("unknown advisor status `{status}`")))?,
        rating: row
            .try_get::<Option<String>, _>("rating")?
            .map(|rating| parse_decimal("rating", rating))
            .transpose()?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
    })
}
