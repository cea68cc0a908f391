use crate::domain::request::AnalysisRequest;
use anyhow::Context;
use chrono::{Duration, NaiveDate, Utc};
use uuid::Uuid;

/// At-least-once work queue for analysis requests. Redelivery and
/// dead-lettering live here, not in the analyzer: a message that keeps
/// failing is retried up to the configured delivery count and then parked
/// for manual inspection.
#[async_trait::async_trait]
pub trait WorkQueue: Send + Sync {
    async fn enqueue(&self, request: &AnalysisRequest) -> anyhow::Result<()>;

    /// Claim the next available message, incrementing its delivery count.
    async fn dequeue(&self) -> anyhow::Result<Option<QueueDelivery>>;

    /// Remove a successfully processed message.
    async fn ack(&self, delivery_id: Uuid) -> anyhow::Result<()>;

    /// Report a failed delivery: requeues with backoff, or dead-letters once
    /// the maximum delivery count is reached.
    async fn nack(&self, delivery_id: Uuid, error: &str) -> anyhow::Result<NackOutcome>;
}

#[derive(Debug, Clone)]
pub struct QueueDelivery {
    pub id: Uuid,
    pub request: AnalysisRequest,
    pub delivery_count: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NackOutcome {
    Requeued,
    DeadLettered,
}

/// Postgres-backed queue. Dequeue uses FOR UPDATE SKIP LOCKED so competing
/// consumers never double-claim a row; duplicate work across redeliveries is
/// still possible and tolerated by the idempotent pipeline.
#[derive(Debug, Clone)]
pub struct PgWorkQueue {
    pool: sqlx::PgPool,
    max_delivery_count: i32,
}

impl PgWorkQueue {
    pub fn new(pool: sqlx::PgPool, max_delivery_count: i32) -> Self {
        Self {
            pool,
            max_delivery_count,
        }
    }

    fn backoff_for(delivery_count: i32) -> Duration {
        let exp = delivery_count.clamp(1, 6) as u32 - 1;
        Duration::seconds(30 * i64::from(2u32.pow(exp)))
    }
}

type QueueRow = (Uuid, String, NaiveDate, bool, i32);

#[async_trait::async_trait]
impl WorkQueue for PgWorkQueue {
    async fn enqueue(&self, request: &AnalysisRequest) -> anyhow::Result<()> {
        let now = Utc::now();
        sqlx::query(
            "INSERT INTO analysis_queue (id, security_id, as_of_date, force, delivery_count, available_at, enqueued_at) \
             VALUES ($1, $2, $3, $4, 0, $5, $5)",
        )
        .bind(Uuid::new_v4())
        .bind(&request.security_id)
        .bind(request.as_of_date)
        .bind(request.force)
        .bind(now)
        .execute(&self.pool)
        .await
        .with_context(|| format!("enqueue analysis request for {} failed", request.security_id))?;
        Ok(())
    }

    async fn dequeue(&self) -> anyhow::Result<Option<QueueDelivery>> {
        let row: Option<QueueRow> = sqlx::query_as(
            "UPDATE analysis_queue \
             SET delivery_count = delivery_count + 1 \
             WHERE id = ( \
                 SELECT id FROM analysis_queue \
                 WHERE available_at <= $1 \
                 ORDER BY enqueued_at ASC \
                 LIMIT 1 \
                 FOR UPDATE SKIP LOCKED \
             ) \
             RETURNING id, security_id, as_of_date, force, delivery_count",
        )
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await
        .context("dequeue from analysis_queue failed")?;

        let Some((id, security_id, as_of_date, force, delivery_count)) = row else {
            return Ok(None);
        };

        Ok(Some(QueueDelivery {
            id,
            request: AnalysisRequest {
                security_id,
                as_of_date,
                force,
            },
            delivery_count,
        }))
    }

    async fn ack(&self, delivery_id: Uuid) -> anyhow::Result<()> {
        sqlx::query("DELETE FROM analysis_queue WHERE id = $1")
            .bind(delivery_id)
            .execute(&self.pool)
            .await
            .context("ack analysis_queue message failed")?;
        Ok(())
    }

    async fn nack(&self, delivery_id: Uuid, error: &str) -> anyhow::Result<NackOutcome> {
        let mut tx = self.pool.begin().await.context("begin transaction failed")?;

        let row: Option<QueueRow> = sqlx::query_as(
            "SELECT id, security_id, as_of_date, force, delivery_count \
             FROM analysis_queue WHERE id = $1 FOR UPDATE",
        )
        .bind(delivery_id)
        .fetch_optional(&mut *tx)
        .await
        .context("select nacked message failed")?;

        let Some((id, security_id, as_of_date, force, delivery_count)) = row else {
            // Already acked or dead-lettered by a competing consumer.
            tx.commit().await.context("commit transaction failed")?;
            return Ok(NackOutcome::DeadLettered);
        };

        let outcome = if delivery_count >= self.max_delivery_count {
            sqlx::query(
                "INSERT INTO analysis_dead_letters (id, security_id, as_of_date, force, delivery_count, last_error, dead_at) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7)",
            )
            .bind(id)
            .bind(&security_id)
            .bind(as_of_date)
            .bind(force)
            .bind(delivery_count)
            .bind(error)
            .bind(Utc::now())
            .execute(&mut *tx)
            .await
            .context("insert analysis_dead_letters failed")?;

            sqlx::query("DELETE FROM analysis_queue WHERE id = $1")
                .bind(id)
                .execute(&mut *tx)
                .await
                .context("delete dead-lettered message failed")?;

            NackOutcome::DeadLettered
        } else {
            let available_at = Utc::now() + Self::backoff_for(delivery_count);
            sqlx::query("UPDATE analysis_queue SET available_at = $2 WHERE id = $1")
                .bind(id)
                .bind(available_at)
                .execute(&mut *tx)
                .await
                .context("requeue nacked message failed")?;

            NackOutcome::Requeued
        };

        tx.commit().await.context("commit transaction failed")?;
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_per_delivery() {
        assert_eq!(PgWorkQueue::backoff_for(1), Duration::seconds(30));
        assert_eq!(PgWorkQueue::backoff_for(2), Duration::seconds(60));
        assert_eq!(PgWorkQueue::backoff_for(3), Duration::seconds(120));
        // Capped so a poisoned message never sleeps unbounded.
        assert_eq!(PgWorkQueue::backoff_for(50), Duration::seconds(960));
    }
}
