use crate::domain::tracking::{TrackingRecord, TrackingStatus};
use anyhow::Context;
use chrono::{DateTime, NaiveDate, Utc};

/// Audit trail of scrape attempts, independent of the result store. Each
/// update is keyed by (security, date) and attempt_count only ever grows, so
/// duplicate deliveries may redo work but cannot corrupt the record.
#[async_trait::async_trait]
pub trait TrackingStore: Send + Sync {
    async fn get(
        &self,
        security_id: &str,
        as_of_date: NaiveDate,
    ) -> anyhow::Result<Option<TrackingRecord>>;

    /// Transition to PENDING and increment attempt_count. Called before any
    /// outbound work so a crash mid-flight stays observable.
    async fn mark_pending(&self, security_id: &str, as_of_date: NaiveDate) -> anyhow::Result<()>;

    async fn mark_succeeded(&self, security_id: &str, as_of_date: NaiveDate)
        -> anyhow::Result<()>;

    async fn mark_failed(
        &self,
        security_id: &str,
        as_of_date: NaiveDate,
        error: &str,
    ) -> anyhow::Result<()>;

    /// Ensure the record reads SUCCEEDED without incrementing attempt_count.
    /// Used when the gate short-circuits on an existing result.
    async fn confirm_succeeded(
        &self,
        security_id: &str,
        as_of_date: NaiveDate,
    ) -> anyhow::Result<()>;

    async fn list_for_date(&self, as_of_date: NaiveDate) -> anyhow::Result<Vec<TrackingRecord>>;
}

#[derive(Debug, Clone)]
pub struct PgTrackingStore {
    pool: sqlx::PgPool,
}

impl PgTrackingStore {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }

    async fn set_terminal(
        &self,
        security_id: &str,
        as_of_date: NaiveDate,
        status: TrackingStatus,
        error: Option<&str>,
    ) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO scrape_tracking (security_id, as_of_date, status, attempt_count, last_error, updated_at) \
             VALUES ($1, $2, $3, 1, $4, $5) \
             ON CONFLICT (security_id, as_of_date) DO UPDATE \
                 SET status = EXCLUDED.status, \
                     last_error = EXCLUDED.last_error, \
                     updated_at = EXCLUDED.updated_at",
        )
        .bind(security_id)
        .bind(as_of_date)
        .bind(status.as_str())
        .bind(error)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .with_context(|| format!("set scrape_tracking {} failed", status.as_str()))?;
        Ok(())
    }
}

type TrackingRow = (String, NaiveDate, String, i32, Option<String>, DateTime<Utc>);

fn row_into_record(row: TrackingRow) -> anyhow::Result<TrackingRecord> {
    let (security_id, as_of_date, status, attempt_count, last_error, updated_at) = row;
    Ok(TrackingRecord {
        security_id,
        as_of_date,
        status: TrackingStatus::parse(&status)?,
        attempt_count,
        last_error,
        updated_at,
    })
}

#[async_trait::async_trait]
impl TrackingStore for PgTrackingStore {
    async fn get(
        &self,
        security_id: &str,
        as_of_date: NaiveDate,
    ) -> anyhow::Result<Option<TrackingRecord>> {
        let row: Option<TrackingRow> = sqlx::query_as(
            "SELECT security_id, as_of_date, status, attempt_count, last_error, updated_at \
             FROM scrape_tracking \
             WHERE security_id = $1 AND as_of_date = $2",
        )
        .bind(security_id)
        .bind(as_of_date)
        .fetch_optional(&self.pool)
        .await
        .context("select scrape_tracking failed")?;

        row.map(row_into_record).transpose()
    }

    async fn mark_pending(&self, security_id: &str, as_of_date: NaiveDate) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO scrape_tracking (security_id, as_of_date, status, attempt_count, last_error, updated_at) \
             VALUES ($1, $2, 'PENDING', 1, NULL, $3) \
             ON CONFLICT (security_id, as_of_date) DO UPDATE \
                 SET status = 'PENDING', \
                     attempt_count = scrape_tracking.attempt_count + 1, \
                     last_error = NULL, \
                     updated_at = EXCLUDED.updated_at",
        )
        .bind(security_id)
        .bind(as_of_date)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .context("mark scrape_tracking PENDING failed")?;
        Ok(())
    }

    async fn mark_succeeded(
        &self,
        security_id: &str,
        as_of_date: NaiveDate,
    ) -> anyhow::Result<()> {
        self.set_terminal(security_id, as_of_date, TrackingStatus::Succeeded, None)
            .await
    }

    async fn mark_failed(
        &self,
        security_id: &str,
        as_of_date: NaiveDate,
        error: &str,
    ) -> anyhow::Result<()> {
        self.set_terminal(security_id, as_of_date, TrackingStatus::Failed, Some(error))
            .await
    }

    async fn confirm_succeeded(
        &self,
        security_id: &str,
        as_of_date: NaiveDate,
    ) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO scrape_tracking (security_id, as_of_date, status, attempt_count, last_error, updated_at) \
             VALUES ($1, $2, 'SUCCEEDED', 0, NULL, $3) \
             ON CONFLICT (security_id, as_of_date) DO UPDATE \
                 SET status = 'SUCCEEDED', \
                     last_error = NULL, \
                     updated_at = EXCLUDED.updated_at \
             WHERE scrape_tracking.status <> 'SUCCEEDED'",
        )
        .bind(security_id)
        .bind(as_of_date)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .context("confirm scrape_tracking SUCCEEDED failed")?;
        Ok(())
    }

    async fn list_for_date(&self, as_of_date: NaiveDate) -> anyhow::Result<Vec<TrackingRecord>> {
        let rows: Vec<TrackingRow> = sqlx::query_as(
            "SELECT security_id, as_of_date, status, attempt_count, last_error, updated_at \
             FROM scrape_tracking \
             WHERE as_of_date = $1 \
             ORDER BY security_id ASC",
        )
        .bind(as_of_date)
        .fetch_all(&self.pool)
        .await
        .context("list scrape_tracking failed")?;

        rows.into_iter().map(row_into_record).collect()
    }
}
