use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// One unit of analysis work. Built by the batch dispatcher or a direct
/// invocation; also the queue message payload (at-least-once, so the same
/// request may be seen more than once).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisRequest {
    pub security_id: String,
    pub as_of_date: NaiveDate,
    #[serde(default)]
    pub force: bool,
}

impl AnalysisRequest {
    pub fn try_new(security_id: &str, as_of_date: NaiveDate, force: bool) -> anyhow::Result<Self> {
        let security_id = security_id.trim().to_string();
        anyhow::ensure!(!security_id.is_empty(), "security_id must be non-empty");
        Ok(Self {
            security_id,
            as_of_date,
            force,
        })
    }
}
