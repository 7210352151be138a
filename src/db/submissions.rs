//! Submission records: idempotent insert keyed by submission id.

use crate::error::Result;
use crate::model::{ResultEvent, Status};
use crate::store::{InsertOutcome, ResultStore};
use async_trait::async_trait;

impl super::Db {
    /// Insert a result unless a row for its submission already exists.
    ///
    /// Safe under concurrent duplicates: the primary key plus
    /// `ON CONFLICT DO NOTHING` leaves the first row untouched and reports
    /// zero affected rows to every later insert.
    pub async fn insert_submission(&self, event: &ResultEvent) -> Result<InsertOutcome> {
        let rows_affected = sqlx::query(
            "INSERT INTO submissions (submission_id, user_id, tier, language, execution_ms, status, completed_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             ON CONFLICT (submission_id) DO NOTHING",
        )
        .bind(&event.submission_id)
        .bind(&event.user_id)
        .bind(event.tier.as_str())
        .bind(&event.language)
        .bind(i64::try_from(event.execution_ms).unwrap_or(i64::MAX))
        .bind(event.status.as_str())
        .bind(event.completed_at)
        .execute(self.pool())
        .await?
        .rows_affected();

        Ok(if rows_affected == 0 {
            InsertOutcome::Duplicate
        } else {
            InsertOutcome::Inserted
        })
    }

    /// Get the stored record for a submission.
    pub async fn get_submission(&self, submission_id: &str) -> Result<Option<ResultEvent>> {
        let row: Option<SubmissionRow> = sqlx::query_as(
            "SELECT submission_id, user_id, tier, language, execution_ms, status, completed_at
             FROM submissions WHERE submission_id = $1",
        )
        .bind(submission_id)
        .fetch_optional(self.pool())
        .await?;

        row.map(SubmissionRow::try_into_event).transpose()
    }
}

#[async_trait]
impl ResultStore for super::Db {
    async fn insert_if_absent(&self, event: &ResultEvent) -> Result<InsertOutcome> {
        self.insert_submission(event).await
    }

    async fn get(&self, submission_id: &str) -> Result<Option<ResultEvent>> {
        self.get_submission(submission_id).await
    }
}

/// Internal row type for sqlx::FromRow.
#[derive(sqlx::FromRow)]
struct SubmissionRow {
    submission_id: String,
    user_id: String,
    tier: String,
    language: String,
    execution_ms: i64,
    status: String,
    completed_at: chrono::DateTime<chrono::Utc>,
}

impl SubmissionRow {
    fn try_into_event(self) -> Result<ResultEvent> {
        Ok(ResultEvent {
            submission_id: self.submission_id,
            user_id: self.user_id,
            language: self.language,
            tier: self.tier.parse()?,
            execution_ms: self.execution_ms.max(0) as u64,
            status: Status::new(self.status),
            completed_at: self.completed_at,
        })
    }
}
