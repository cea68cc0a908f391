use crate::pipeline::Analyzer;
use crate::storage::{NackOutcome, WorkQueue};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ConsumeOptions {
    /// Sleep between polls when the queue is empty.
    pub poll_interval: Duration,
    /// Stop at the first empty poll instead of waiting for more work.
    pub drain: bool,
}

impl Default for ConsumeOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            drain: false,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ConsumeStats {
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub dead_lettered: usize,
}

/// Queue consumer loop. Each delivery runs the full single-item pipeline;
/// success acks, failure nacks and lets the queue decide between redelivery
/// and the dead-letter table. The gate makes redeliveries of already-done
/// work cheap no-ops.
pub async fn run_consumer(
    analyzer: Arc<Analyzer>,
    queue: Arc<dyn WorkQueue>,
    options: ConsumeOptions,
) -> anyhow::Result<ConsumeStats> {
    let mut stats = ConsumeStats::default();

    loop {
        let Some(delivery) = queue.dequeue().await? else {
            if options.drain {
                tracing::info!(
                    processed = stats.processed,
                    succeeded = stats.succeeded,
                    failed = stats.failed,
                    dead_lettered = stats.dead_lettered,
                    "queue drained"
                );
                return Ok(stats);
            }
            tokio::time::sleep(options.poll_interval).await;
            continue;
        };

        stats.processed += 1;
        let request = &delivery.request;
        tracing::debug!(
            security_id = request.security_id,
            %request.as_of_date,
            delivery_count = delivery.delivery_count,
            "processing delivery"
        );

        match analyzer
            .analyze(&request.security_id, request.as_of_date, request.force)
            .await
        {
            Ok(outcome) => {
                queue.ack(delivery.id).await?;
                stats.succeeded += 1;
                if !outcome.fresh {
                    tracing::debug!(
                        security_id = request.security_id,
                        "redelivery of completed work acked without re-analysis"
                    );
                }
            }
            Err(err) => {
                stats.failed += 1;
                match queue.nack(delivery.id, &err.to_string()).await? {
                    NackOutcome::Requeued => {
                        tracing::warn!(
                            security_id = request.security_id,
                            delivery_count = delivery.delivery_count,
                            error = %err,
                            "delivery failed; requeued"
                        );
                    }
                    NackOutcome::DeadLettered => {
                        stats.dead_lettered += 1;
                        tracing::error!(
                            security_id = request.security_id,
                            delivery_count = delivery.delivery_count,
                            error = %err,
                            "delivery exhausted; dead-lettered"
                        );
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Policy;
    use crate::domain::request::AnalysisRequest;
    use crate::domain::tracking::TrackingStatus;
    use crate::storage::memory::{MemoryResultStore, MemoryTrackingStore, MemoryWorkQueue};
    use crate::storage::TrackingStore;
    use crate::testutil::{sample_articles, StubModel, StubNews};
    use chrono::NaiveDate;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()
    }

    fn analyzer_with(
        news: StubNews,
        results: Arc<MemoryResultStore>,
        tracking: Arc<MemoryTrackingStore>,
    ) -> Arc<Analyzer> {
        Arc::new(Analyzer::new(
            Arc::new(news),
            Arc::new(StubModel::scoring(3)),
            results,
            tracking,
            Policy::default(),
        ))
    }

    #[tokio::test]
    async fn drains_queue_and_acks_successes() {
        let queue = Arc::new(MemoryWorkQueue::new(3));
        for id in ["ACME", "WIDGETCO"] {
            queue
                .enqueue(&AnalysisRequest::try_new(id, date(), false).unwrap())
                .await
                .unwrap();
        }

        let results = Arc::new(MemoryResultStore::default());
        let tracking = Arc::new(MemoryTrackingStore::default());
        let analyzer = analyzer_with(
            StubNews::returning(sample_articles(4)),
            results.clone(),
            tracking.clone(),
        );

        let stats = run_consumer(
            analyzer,
            queue.clone(),
            ConsumeOptions {
                drain: true,
                ..ConsumeOptions::default()
            },
        )
        .await
        .unwrap();

        assert_eq!(stats.processed, 2);
        assert_eq!(stats.succeeded, 2);
        assert_eq!(stats.failed, 0);
        assert_eq!(queue.ready_len(), 0);
        assert!(queue.dead_letters().is_empty());
    }

    #[tokio::test]
    async fn failing_item_dead_letters_after_three_deliveries() {
        let queue = Arc::new(MemoryWorkQueue::new(3));
        queue
            .enqueue(&AnalysisRequest::try_new("FOO", date(), false).unwrap())
            .await
            .unwrap();

        let results = Arc::new(MemoryResultStore::default());
        let tracking = Arc::new(MemoryTrackingStore::default());
        let analyzer = analyzer_with(
            StubNews::failing("feed unreachable"),
            results.clone(),
            tracking.clone(),
        );

        let stats = run_consumer(
            analyzer,
            queue.clone(),
            ConsumeOptions {
                drain: true,
                ..ConsumeOptions::default()
            },
        )
        .await
        .unwrap();

        assert_eq!(stats.processed, 3);
        assert_eq!(stats.failed, 3);
        assert_eq!(stats.dead_lettered, 1);

        let dead = queue.dead_letters();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].request.security_id, "FOO");
        assert_eq!(dead[0].delivery_count, 3);
        assert!(dead[0].last_error.contains("SourceUnavailable"));

        let record = tracking.get("FOO", date()).await.unwrap().unwrap();
        assert_eq!(record.status, TrackingStatus::Failed);
        assert_eq!(record.attempt_count, 3);
        assert_eq!(results.write_count(), 0);
    }

    #[tokio::test]
    async fn redelivery_of_done_work_is_acked_without_rework() {
        let queue = Arc::new(MemoryWorkQueue::new(3));
        let request = AnalysisRequest::try_new("ACME", date(), false).unwrap();
        // At-least-once: the same request lands twice.
        queue.enqueue(&request).await.unwrap();
        queue.enqueue(&request).await.unwrap();

        let results = Arc::new(MemoryResultStore::default());
        let tracking = Arc::new(MemoryTrackingStore::default());
        let analyzer = analyzer_with(
            StubNews::returning(sample_articles(4)),
            results.clone(),
            tracking.clone(),
        );

        let stats = run_consumer(
            analyzer,
            queue.clone(),
            ConsumeOptions {
                drain: true,
                ..ConsumeOptions::default()
            },
        )
        .await
        .unwrap();

        assert_eq!(stats.processed, 2);
        assert_eq!(stats.succeeded, 2);
        // Only the first delivery did real work.
        assert_eq!(results.write_count(), 1);
    }
}
