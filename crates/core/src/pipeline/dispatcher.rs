use crate::domain::request::AnalysisRequest;
use crate::pipeline::{Analyzer, PipelineError};
use crate::storage::WorkQueue;
use chrono::NaiveDate;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchMode {
    /// Run analyses in-process under a bounded worker pool.
    Direct,
    /// Enqueue one message per security and let consumers do the work.
    Queued,
}

impl DispatchMode {
    pub fn parse(s: &str) -> anyhow::Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "DIRECT" => Ok(DispatchMode::Direct),
            "QUEUED" => Ok(DispatchMode::Queued),
            other => anyhow::bail!("unknown dispatch mode: {other}"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BatchOptions {
    pub concurrency: usize,
    /// Cap on how many securities from the universe are dispatched.
    pub max_items: Option<usize>,
    pub force: bool,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            concurrency: 4,
            max_items: None,
            force: false,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ItemFailure {
    pub security_id: String,
    pub kind: String,
    pub error: String,
}

/// Outcome of one batch run. `succeeded + skipped + failed.len()` equals
/// `total` in DIRECT mode; QUEUED mode reports `enqueued` instead since the
/// per-item outcomes happen later on the consumer side.
#[derive(Debug, Clone, Serialize)]
pub struct BatchSummary {
    pub as_of_date: NaiveDate,
    pub total: usize,
    pub succeeded: usize,
    pub skipped: usize,
    pub enqueued: usize,
    pub failed: Vec<ItemFailure>,
}

impl BatchSummary {
    fn new(as_of_date: NaiveDate, total: usize) -> Self {
        Self {
            as_of_date,
            total,
            succeeded: 0,
            skipped: 0,
            enqueued: 0,
            failed: Vec::new(),
        }
    }
}

/// Fans one universe out into per-security analyses. Item failures are
/// collected, never propagated: one broken feed must not sink the batch.
pub struct Dispatcher {
    analyzer: Arc<Analyzer>,
    queue: Arc<dyn WorkQueue>,
}

impl Dispatcher {
    pub fn new(analyzer: Arc<Analyzer>, queue: Arc<dyn WorkQueue>) -> Self {
        Self { analyzer, queue }
    }

    pub async fn dispatch_all(
        &self,
        universe: &[String],
        as_of_date: NaiveDate,
        mode: DispatchMode,
        options: &BatchOptions,
    ) -> BatchSummary {
        let selected: Vec<&String> = match options.max_items {
            Some(cap) => universe.iter().take(cap).collect(),
            None => universe.iter().collect(),
        };

        tracing::info!(
            %as_of_date,
            total = selected.len(),
            mode = ?mode,
            force = options.force,
            "dispatching batch"
        );

        match mode {
            DispatchMode::Direct => self.dispatch_direct(&selected, as_of_date, options).await,
            DispatchMode::Queued => self.dispatch_queued(&selected, as_of_date, options).await,
        }
    }

    async fn dispatch_direct(
        &self,
        selected: &[&String],
        as_of_date: NaiveDate,
        options: &BatchOptions,
    ) -> BatchSummary {
        let mut summary = BatchSummary::new(as_of_date, selected.len());
        let permits = Arc::new(Semaphore::new(options.concurrency.max(1)));
        let mut tasks = JoinSet::new();

        for security_id in selected {
            let analyzer = self.analyzer.clone();
            let permits = permits.clone();
            let security_id = (*security_id).clone();
            let force = options.force;

            tasks.spawn(async move {
                // Closed only if the semaphore is dropped, which it is not.
                let _permit = permits.acquire_owned().await.expect("semaphore closed");
                let outcome = analyzer.analyze(&security_id, as_of_date, force).await;
                (security_id, outcome)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(outcome))) => {
                    if outcome.fresh {
                        summary.succeeded += 1;
                    } else {
                        summary.skipped += 1;
                    }
                }
                Ok((security_id, Err(err))) => {
                    tracing::warn!(security_id, %as_of_date, error = %err, "batch item failed");
                    summary.failed.push(item_failure(&security_id, &err));
                }
                Err(join_err) => {
                    tracing::error!(error = %join_err, "batch task panicked");
                    summary.failed.push(ItemFailure {
                        security_id: "<unknown>".to_string(),
                        kind: "Panic".to_string(),
                        error: join_err.to_string(),
                    });
                }
            }
        }

        summary.failed.sort_by(|a, b| a.security_id.cmp(&b.security_id));
        summary
    }

    async fn dispatch_queued(
        &self,
        selected: &[&String],
        as_of_date: NaiveDate,
        options: &BatchOptions,
    ) -> BatchSummary {
        let mut summary = BatchSummary::new(as_of_date, selected.len());

        for security_id in selected {
            let request = match AnalysisRequest::try_new(security_id, as_of_date, options.force) {
                Ok(request) => request,
                Err(err) => {
                    summary.failed.push(ItemFailure {
                        security_id: (*security_id).clone(),
                        kind: "InvalidRequest".to_string(),
                        error: format!("{err:#}"),
                    });
                    continue;
                }
            };

            match self.queue.enqueue(&request).await {
                Ok(()) => summary.enqueued += 1,
                Err(err) => {
                    tracing::warn!(security_id, %as_of_date, error = %err, "enqueue failed");
                    summary.failed.push(ItemFailure {
                        security_id: (*security_id).clone(),
                        kind: "StoreFailure".to_string(),
                        error: format!("{err:#}"),
                    });
                }
            }
        }

        summary
    }
}

fn item_failure(security_id: &str, err: &PipelineError) -> ItemFailure {
    ItemFailure {
        security_id: security_id.to_string(),
        kind: err.kind().to_string(),
        error: err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Policy;
    use crate::domain::sentiment::{Confidence, SentimentResult};
    use crate::domain::tracking::TrackingStatus;
    use crate::pipeline::aggregate;
    use crate::storage::memory::{MemoryResultStore, MemoryTrackingStore, MemoryWorkQueue};
    use crate::storage::{ResultStore, TrackingStore};
    use crate::testutil::{sample_articles, StubModel, StubNews};
    use chrono::Utc;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()
    }

    fn universe(ids: &[&str]) -> Vec<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    fn existing_result(security_id: &str, score: i32) -> SentimentResult {
        SentimentResult {
            security_id: security_id.to_string(),
            as_of_date: date(),
            score,
            confidence: Confidence::High,
            positive_factors: vec!["carryover".to_string()],
            risk_factors: Vec::new(),
            article_count: 9,
            generated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn direct_batch_skips_done_work_and_analyzes_the_rest() {
        let results = Arc::new(MemoryResultStore::default());
        let tracking = Arc::new(MemoryTrackingStore::default());
        let queue = Arc::new(MemoryWorkQueue::new(3));

        // ACME already has a persisted score of 4 for the date.
        results.put(&existing_result("ACME", 4)).await.unwrap();

        let news = Arc::new(StubNews::returning(sample_articles(5)));
        let model = Arc::new(StubModel::scoring(-3));
        let analyzer = Arc::new(Analyzer::new(
            news.clone(),
            model.clone(),
            results.clone(),
            tracking.clone(),
            Policy::default(),
        ));
        let dispatcher = Dispatcher::new(analyzer, queue);

        let summary = dispatcher
            .dispatch_all(
                &universe(&["ACME", "WIDGETCO"]),
                date(),
                DispatchMode::Direct,
                &BatchOptions::default(),
            )
            .await;

        assert_eq!(summary.total, 2);
        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.skipped, 1);
        assert!(summary.failed.is_empty());

        // ACME was never re-fetched or re-scored.
        assert_eq!(news.call_count(), 1);
        assert_eq!(model.call_count(), 1);
        let acme = results.get("ACME", date()).await.unwrap().unwrap();
        assert_eq!(acme.score, 4);

        let widgetco = results.get("WIDGETCO", date()).await.unwrap().unwrap();
        assert_eq!(widgetco.score, -3);
        assert_eq!(widgetco.confidence, Confidence::Medium);
        let record = tracking.get("WIDGETCO", date()).await.unwrap().unwrap();
        assert_eq!(record.status, TrackingStatus::Succeeded);

        // Rerunning the same batch is a no-op: everything is now done.
        let rerun = dispatcher
            .dispatch_all(
                &universe(&["ACME", "WIDGETCO"]),
                date(),
                DispatchMode::Direct,
                &BatchOptions::default(),
            )
            .await;
        assert_eq!(rerun.succeeded, 0);
        assert_eq!(rerun.skipped, 2);
        assert_eq!(news.call_count(), 1);

        // Classification over the persisted results.
        let classification = aggregate::classify(
            results.as_ref(),
            date(),
            &universe(&["ACME", "WIDGETCO"]),
            &Policy::default().classify,
        )
        .await
        .unwrap();
        assert_eq!(classification.buys, vec!["ACME".to_string()]);
        assert_eq!(classification.sells, vec!["WIDGETCO".to_string()]);
        assert!(classification.holds.is_empty());
        assert!(classification.unscored.is_empty());
    }

    #[tokio::test]
    async fn one_bad_item_does_not_sink_the_batch() {
        let results = Arc::new(MemoryResultStore::default());
        let tracking = Arc::new(MemoryTrackingStore::default());
        // Pre-existing result keeps GOODCO off the broken feed.
        results.put(&existing_result("GOODCO", 3)).await.unwrap();

        let analyzer = Arc::new(Analyzer::new(
            Arc::new(StubNews::failing("feed down")),
            Arc::new(StubModel::scoring(0)),
            results.clone(),
            tracking.clone(),
            Policy::default(),
        ));
        let dispatcher = Dispatcher::new(analyzer, Arc::new(MemoryWorkQueue::new(3)));

        let summary = dispatcher
            .dispatch_all(
                &universe(&["BADCO", "GOODCO"]),
                date(),
                DispatchMode::Direct,
                &BatchOptions::default(),
            )
            .await;

        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.failed.len(), 1);
        assert_eq!(summary.failed[0].security_id, "BADCO");
        assert_eq!(summary.failed[0].kind, "SourceUnavailable");
    }

    #[tokio::test]
    async fn queued_mode_enqueues_one_request_per_security() {
        let queue = Arc::new(MemoryWorkQueue::new(3));
        let analyzer = Arc::new(Analyzer::new(
            Arc::new(StubNews::returning(Vec::new())),
            Arc::new(StubModel::scoring(0)),
            Arc::new(MemoryResultStore::default()),
            Arc::new(MemoryTrackingStore::default()),
            Policy::default(),
        ));
        let dispatcher = Dispatcher::new(analyzer, queue.clone());

        let summary = dispatcher
            .dispatch_all(
                &universe(&["ACME", "WIDGETCO", "QUIETCO"]),
                date(),
                DispatchMode::Queued,
                &BatchOptions {
                    max_items: Some(2),
                    ..BatchOptions::default()
                },
            )
            .await;

        assert_eq!(summary.total, 2);
        assert_eq!(summary.enqueued, 2);
        assert_eq!(summary.succeeded, 0);
        assert_eq!(queue.ready_len(), 2);
    }
}
