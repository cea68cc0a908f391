use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TrackingStatus {
    Pending,
    Succeeded,
    Failed,
}

impl TrackingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackingStatus::Pending => "PENDING",
            TrackingStatus::Succeeded => "SUCCEEDED",
            TrackingStatus::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> anyhow::Result<Self> {
        match s {
            "PENDING" => Ok(TrackingStatus::Pending),
            "SUCCEEDED" => Ok(TrackingStatus::Succeeded),
            "FAILED" => Ok(TrackingStatus::Failed),
            other => anyhow::bail!("unknown tracking status: {other}"),
        }
    }
}

/// Audit-trail row for one (security, date) idempotency key. Created on the
/// first attempt, mutated on every attempt, never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackingRecord {
    pub security_id: String,
    pub as_of_date: NaiveDate,
    pub status: TrackingStatus,
    pub attempt_count: i32,
    pub last_error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl TrackingRecord {
    /// A PENDING record older than the grace period is an abandoned run
    /// (crashed mid-flight), not evidence of work in progress.
    pub fn is_stale_pending(&self, now: DateTime<Utc>, grace_secs: i64) -> bool {
        self.status == TrackingStatus::Pending
            && now - self.updated_at > Duration::seconds(grace_secs)
    }
}
