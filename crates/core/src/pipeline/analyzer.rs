use crate::config::Policy;
use crate::domain::sentiment::SentimentResult;
use crate::llm::{ScoreInput, SentimentModel};
use crate::news::NewsSource;
use crate::pipeline::{gate, PipelineError};
use crate::storage::{ResultStore, TrackingStore};
use chrono::NaiveDate;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct AnalyzeOutcome {
    pub result: SentimentResult,
    /// False when the gate short-circuited and an already-persisted result
    /// was returned without fetching or scoring anything.
    pub fresh: bool,
}

/// Single-item pipeline: gate, fetch, score, persist, track. One call handles
/// exactly one (security, date) pair and either returns a durable result or a
/// classified error; it never retries internally, so re-running after a
/// failure (or queue redelivery) is the only retry mechanism.
pub struct Analyzer {
    news: Arc<dyn NewsSource>,
    model: Arc<dyn SentimentModel>,
    results: Arc<dyn ResultStore>,
    tracking: Arc<dyn TrackingStore>,
    policy: Policy,
}

impl Analyzer {
    pub fn new(
        news: Arc<dyn NewsSource>,
        model: Arc<dyn SentimentModel>,
        results: Arc<dyn ResultStore>,
        tracking: Arc<dyn TrackingStore>,
        policy: Policy,
    ) -> Self {
        Self {
            news,
            model,
            results,
            tracking,
            policy,
        }
    }

    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    pub async fn analyze(
        &self,
        security_id: &str,
        as_of_date: NaiveDate,
        force: bool,
    ) -> Result<AnalyzeOutcome, PipelineError> {
        if !gate::needs_work(self.results.as_ref(), security_id, as_of_date, force).await? {
            return self.existing_result(security_id, as_of_date).await;
        }

        self.tracking
            .mark_pending(security_id, as_of_date)
            .await
            .map_err(|err| store_failure(security_id, &err))?;

        let articles = match self
            .news
            .fetch_articles(security_id, self.policy.max_articles)
            .await
        {
            Ok(articles) => articles,
            Err(err) => {
                return self
                    .fail(
                        as_of_date,
                        PipelineError::SourceUnavailable {
                            security_id: security_id.to_string(),
                            detail: format!("{err:#}"),
                        },
                    )
                    .await;
            }
        };

        let result = if articles.is_empty() {
            tracing::info!(security_id, %as_of_date, "no recent news; recording neutral result");
            SentimentResult::no_news(security_id, as_of_date)
        } else {
            let article_count = articles.len() as i32;
            let input = ScoreInput {
                security_id: security_id.to_string(),
                as_of_date,
                articles,
            };

            let payload = match self.model.score_articles(&input).await {
                Ok(payload) => payload,
                Err(err) => {
                    return self
                        .fail(
                            as_of_date,
                            PipelineError::ModelFailure {
                                security_id: security_id.to_string(),
                                detail: format!("{err:#}"),
                            },
                        )
                        .await;
                }
            };

            match payload.validate_and_into_result(
                security_id,
                as_of_date,
                article_count,
                &self.policy.confidence,
            ) {
                Ok(result) => result,
                Err(err) => {
                    return self
                        .fail(
                            as_of_date,
                            PipelineError::ModelFailure {
                                security_id: security_id.to_string(),
                                detail: format!("{err:#}"),
                            },
                        )
                        .await;
                }
            }
        };

        if let Err(err) = self.results.put(&result).await {
            return self.fail(as_of_date, store_failure(security_id, &err)).await;
        }

        self.tracking
            .mark_succeeded(security_id, as_of_date)
            .await
            .map_err(|err| store_failure(security_id, &err))?;

        tracing::info!(
            security_id,
            %as_of_date,
            score = result.score,
            confidence = result.confidence.as_str(),
            article_count = result.article_count,
            "sentiment result persisted"
        );

        Ok(AnalyzeOutcome {
            result,
            fresh: true,
        })
    }

    /// The gate said no work is needed: return the persisted result and make
    /// sure tracking agrees it succeeded (it may predate the tracking table,
    /// or a crash may have left it PENDING).
    async fn existing_result(
        &self,
        security_id: &str,
        as_of_date: NaiveDate,
    ) -> Result<AnalyzeOutcome, PipelineError> {
        let existing = self
            .results
            .get(security_id, as_of_date)
            .await
            .map_err(|err| store_failure(security_id, &err))?;

        let Some(result) = existing else {
            // Raced with a concurrent delete between exists() and get().
            return Err(PipelineError::StoreFailure {
                security_id: security_id.to_string(),
                detail: "result vanished after existence check".to_string(),
            });
        };

        self.tracking
            .confirm_succeeded(security_id, as_of_date)
            .await
            .map_err(|err| store_failure(security_id, &err))?;

        tracing::debug!(security_id, %as_of_date, "existing result returned without re-analysis");

        Ok(AnalyzeOutcome {
            result,
            fresh: false,
        })
    }

    /// Record the terminal FAILED state, then surface the original error.
    /// The tracking write is best-effort: losing it must not mask the cause.
    async fn fail(
        &self,
        as_of_date: NaiveDate,
        err: PipelineError,
    ) -> Result<AnalyzeOutcome, PipelineError> {
        let security_id = err.security_id().to_string();
        if let Err(track_err) = self
            .tracking
            .mark_failed(&security_id, as_of_date, &err.to_string())
            .await
        {
            tracing::warn!(
                security_id,
                %as_of_date,
                error = %track_err,
                "could not record FAILED tracking state"
            );
        }
        Err(err)
    }
}

fn store_failure(security_id: &str, err: &anyhow::Error) -> PipelineError {
    PipelineError::StoreFailure {
        security_id: security_id.to_string(),
        detail: format!("{err:#}"),
    }
}
