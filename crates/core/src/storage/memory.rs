//! In-memory store and queue implementations for pipeline tests. They mirror
//! the Postgres semantics: last-writer-wins result upserts, monotonic
//! attempt counts, and dead-lettering after the configured delivery count.

use crate::domain::request::AnalysisRequest;
use crate::domain::sentiment::SentimentResult;
use crate::domain::tracking::{TrackingRecord, TrackingStatus};
use crate::storage::queue::{NackOutcome, QueueDelivery, WorkQueue};
use crate::storage::results::ResultStore;
use crate::storage::tracking::TrackingStore;
use chrono::{NaiveDate, Utc};
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use uuid::Uuid;

type Key = (String, NaiveDate);

#[derive(Debug, Default)]
pub struct MemoryResultStore {
    inner: Mutex<BTreeMap<Key, SentimentResult>>,
    reads: AtomicUsize,
    writes: AtomicUsize,
}

impl MemoryResultStore {
    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl ResultStore for MemoryResultStore {
    async fn exists(&self, security_id: &str, as_of_date: NaiveDate) -> anyhow::Result<bool> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let inner = self.inner.lock().unwrap();
        Ok(inner.contains_key(&(security_id.to_string(), as_of_date)))
    }

    async fn get(
        &self,
        security_id: &str,
        as_of_date: NaiveDate,
    ) -> anyhow::Result<Option<SentimentResult>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let inner = self.inner.lock().unwrap();
        Ok(inner.get(&(security_id.to_string(), as_of_date)).cloned())
    }

    async fn put(&self, result: &SentimentResult) -> anyhow::Result<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        let mut inner = self.inner.lock().unwrap();
        inner.insert(
            (result.security_id.clone(), result.as_of_date),
            result.clone(),
        );
        Ok(())
    }

    async fn list_for_date(&self, as_of_date: NaiveDate) -> anyhow::Result<Vec<SentimentResult>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .values()
            .filter(|r| r.as_of_date == as_of_date)
            .cloned()
            .collect())
    }
}

#[derive(Debug, Default)]
pub struct MemoryTrackingStore {
    inner: Mutex<BTreeMap<Key, TrackingRecord>>,
}

impl MemoryTrackingStore {
    fn update<F>(&self, security_id: &str, as_of_date: NaiveDate, f: F)
    where
        F: FnOnce(&mut TrackingRecord),
    {
        let mut inner = self.inner.lock().unwrap();
        let record = inner
            .entry((security_id.to_string(), as_of_date))
            .or_insert_with(|| TrackingRecord {
                security_id: security_id.to_string(),
                as_of_date,
                status: TrackingStatus::Pending,
                attempt_count: 0,
                last_error: None,
                updated_at: Utc::now(),
            });
        f(record);
        record.updated_at = Utc::now();
    }
}

#[async_trait::async_trait]
impl TrackingStore for MemoryTrackingStore {
    async fn get(
        &self,
        security_id: &str,
        as_of_date: NaiveDate,
    ) -> anyhow::Result<Option<TrackingRecord>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.get(&(security_id.to_string(), as_of_date)).cloned())
    }

    async fn mark_pending(&self, security_id: &str, as_of_date: NaiveDate) -> anyhow::Result<()> {
        self.update(security_id, as_of_date, |r| {
            r.status = TrackingStatus::Pending;
            r.attempt_count += 1;
            r.last_error = None;
        });
        Ok(())
    }

    async fn mark_succeeded(
        &self,
        security_id: &str,
        as_of_date: NaiveDate,
    ) -> anyhow::Result<()> {
        self.update(security_id, as_of_date, |r| {
            r.status = TrackingStatus::Succeeded;
            r.last_error = None;
        });
        Ok(())
    }

    async fn mark_failed(
        &self,
        security_id: &str,
        as_of_date: NaiveDate,
        error: &str,
    ) -> anyhow::Result<()> {
        let error = error.to_string();
        self.update(security_id, as_of_date, move |r| {
            r.status = TrackingStatus::Failed;
            r.last_error = Some(error);
        });
        Ok(())
    }

    async fn confirm_succeeded(
        &self,
        security_id: &str,
        as_of_date: NaiveDate,
    ) -> anyhow::Result<()> {
        self.update(security_id, as_of_date, |r| {
            if r.status != TrackingStatus::Succeeded {
                r.status = TrackingStatus::Succeeded;
                r.last_error = None;
            }
        });
        Ok(())
    }

    async fn list_for_date(&self, as_of_date: NaiveDate) -> anyhow::Result<Vec<TrackingRecord>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .values()
            .filter(|r| r.as_of_date == as_of_date)
            .cloned()
            .collect())
    }
}

#[derive(Debug)]
struct QueuedMessage {
    id: Uuid,
    request: AnalysisRequest,
    delivery_count: i32,
}

#[derive(Debug, Clone)]
pub struct DeadLetter {
    pub request: AnalysisRequest,
    pub delivery_count: i32,
    pub last_error: String,
}

/// Memory queue with immediate redelivery (no backoff) so consumer tests can
/// drain redeliveries synchronously.
#[derive(Debug)]
pub struct MemoryWorkQueue {
    ready: Mutex<VecDeque<QueuedMessage>>,
    in_flight: Mutex<BTreeMap<Uuid, QueuedMessage>>,
    dead: Mutex<Vec<DeadLetter>>,
    max_delivery_count: i32,
}

impl MemoryWorkQueue {
    pub fn new(max_delivery_count: i32) -> Self {
        Self {
            ready: Mutex::new(VecDeque::new()),
            in_flight: Mutex::new(BTreeMap::new()),
            dead: Mutex::new(Vec::new()),
            max_delivery_count,
        }
    }

    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.dead.lock().unwrap().clone()
    }

    pub fn ready_len(&self) -> usize {
        self.ready.lock().unwrap().len()
    }
}

#[async_trait::async_trait]
impl WorkQueue for MemoryWorkQueue {
    async fn enqueue(&self, request: &AnalysisRequest) -> anyhow::Result<()> {
        self.ready.lock().unwrap().push_back(QueuedMessage {
            id: Uuid::new_v4(),
            request: request.clone(),
            delivery_count: 0,
        });
        Ok(())
    }

    async fn dequeue(&self) -> anyhow::Result<Option<QueueDelivery>> {
        let Some(mut msg) = self.ready.lock().unwrap().pop_front() else {
            return Ok(None);
        };
        msg.delivery_count += 1;
        let delivery = QueueDelivery {
            id: msg.id,
            request: msg.request.clone(),
            delivery_count: msg.delivery_count,
        };
        self.in_flight.lock().unwrap().insert(msg.id, msg);
        Ok(Some(delivery))
    }

    async fn ack(&self, delivery_id: Uuid) -> anyhow::Result<()> {
        self.in_flight.lock().unwrap().remove(&delivery_id);
        Ok(())
    }

    async fn nack(&self, delivery_id: Uuid, error: &str) -> anyhow::Result<NackOutcome> {
        let Some(msg) = self.in_flight.lock().unwrap().remove(&delivery_id) else {
            return Ok(NackOutcome::DeadLettered);
        };

        if msg.delivery_count >= self.max_delivery_count {
            self.dead.lock().unwrap().push(DeadLetter {
                request: msg.request,
                delivery_count: msg.delivery_count,
                last_error: error.to_string(),
            });
            Ok(NackOutcome::DeadLettered)
        } else {
            self.ready.lock().unwrap().push_back(msg);
            Ok(NackOutcome::Requeued)
        }
    }
}
