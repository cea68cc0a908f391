use crate::domain::sentiment::{object_key, Confidence, SentimentResult};
use anyhow::Context;
use chrono::{DateTime, NaiveDate, Utc};

/// Durable store for per-(security, date) sentiment results. Writes are
/// last-writer-wins upserts scoped by the idempotency key; no external lock.
#[async_trait::async_trait]
pub trait ResultStore: Send + Sync {
    /// Existence check, preferred by the idempotency gate over a full read.
    async fn exists(&self, security_id: &str, as_of_date: NaiveDate) -> anyhow::Result<bool>;

    async fn get(
        &self,
        security_id: &str,
        as_of_date: NaiveDate,
    ) -> anyhow::Result<Option<SentimentResult>>;

    async fn put(&self, result: &SentimentResult) -> anyhow::Result<()>;

    async fn list_for_date(&self, as_of_date: NaiveDate) -> anyhow::Result<Vec<SentimentResult>>;
}

#[derive(Debug, Clone)]
pub struct PgResultStore {
    pool: sqlx::PgPool,
    prefix: String,
}

impl PgResultStore {
    pub fn new(pool: sqlx::PgPool, prefix: &str) -> Self {
        Self {
            pool,
            prefix: prefix.to_string(),
        }
    }
}

type ResultRow = (
    String,
    NaiveDate,
    i32,
    String,
    Vec<String>,
    Vec<String>,
    i32,
    DateTime<Utc>,
);

fn row_into_result(row: ResultRow) -> anyhow::Result<SentimentResult> {
    let (security_id, as_of_date, score, confidence, positive_factors, risk_factors, article_count, generated_at) =
        row;
    Ok(SentimentResult {
        security_id,
        as_of_date,
        score,
        confidence: Confidence::parse(&confidence)?,
        positive_factors,
        risk_factors,
        article_count,
        generated_at,
    })
}

#[async_trait::async_trait]
impl ResultStore for PgResultStore {
    async fn exists(&self, security_id: &str, as_of_date: NaiveDate) -> anyhow::Result<bool> {
        let row: Option<(i32,)> = sqlx::query_as(
            "SELECT 1 FROM sentiment_results WHERE security_id = $1 AND as_of_date = $2",
        )
        .bind(security_id)
        .bind(as_of_date)
        .fetch_optional(&self.pool)
        .await
        .context("sentiment_results existence check failed")?;
        Ok(row.is_some())
    }

    async fn get(
        &self,
        security_id: &str,
        as_of_date: NaiveDate,
    ) -> anyhow::Result<Option<SentimentResult>> {
        let row: Option<ResultRow> = sqlx::query_as(
            "SELECT security_id, as_of_date, score, confidence, positive_factors, risk_factors, \
                    article_count, generated_at \
             FROM sentiment_results \
             WHERE security_id = $1 AND as_of_date = $2",
        )
        .bind(security_id)
        .bind(as_of_date)
        .fetch_optional(&self.pool)
        .await
        .context("select sentiment_results failed")?;

        row.map(row_into_result).transpose()
    }

    async fn put(&self, result: &SentimentResult) -> anyhow::Result<()> {
        let key = object_key(&self.prefix, result.as_of_date, &result.security_id);
        sqlx::query(
            "INSERT INTO sentiment_results \
                 (security_id, as_of_date, object_key, score, confidence, positive_factors, \
                  risk_factors, article_count, generated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
             ON CONFLICT (security_id, as_of_date) DO UPDATE \
                 SET object_key = EXCLUDED.object_key, \
                     score = EXCLUDED.score, \
                     confidence = EXCLUDED.confidence, \
                     positive_factors = EXCLUDED.positive_factors, \
                     risk_factors = EXCLUDED.risk_factors, \
                     article_count = EXCLUDED.article_count, \
                     generated_at = EXCLUDED.generated_at",
        )
        .bind(&result.security_id)
        .bind(result.as_of_date)
        .bind(key)
        .bind(result.score)
        .bind(result.confidence.as_str())
        .bind(&result.positive_factors)
        .bind(&result.risk_factors)
        .bind(result.article_count)
        .bind(result.generated_at)
        .execute(&self.pool)
        .await
        .context("upsert sentiment_results failed")?;
        Ok(())
    }

    async fn list_for_date(&self, as_of_date: NaiveDate) -> anyhow::Result<Vec<SentimentResult>> {
        let rows: Vec<ResultRow> = sqlx::query_as(
            "SELECT security_id, as_of_date, score, confidence, positive_factors, risk_factors, \
                    article_count, generated_at \
             FROM sentiment_results \
             WHERE as_of_date = $1 \
             ORDER BY security_id ASC",
        )
        .bind(as_of_date)
        .fetch_all(&self.pool)
        .await
        .context("list sentiment_results failed")?;

        rows.into_iter().map(row_into_result).collect()
    }
}
