use crate::domain::sentiment::{
    Confidence, ConfidenceTiers, SentimentResult, SCORE_MAX, SCORE_MIN,
};
use anyhow::ensure;
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Raw sentiment payload as emitted by the model, before validation.
/// Out-of-range or malformed values are rejected here, never clamped:
/// a silently repaired score is worse than a visible gap.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSentimentPayload {
    pub score: i32,
    #[serde(default)]
    pub positive_factors: Vec<String>,
    #[serde(default)]
    pub risk_factors: Vec<String>,
    #[serde(default)]
    pub reasoning: Option<String>,
}

impl ModelSentimentPayload {
    pub fn validate_and_into_result(
        self,
        security_id: &str,
        as_of_date: NaiveDate,
        article_count: i32,
        tiers: &ConfidenceTiers,
    ) -> anyhow::Result<SentimentResult> {
        ensure!(
            (SCORE_MIN..=SCORE_MAX).contains(&self.score),
            "model score out of range [{SCORE_MIN}, {SCORE_MAX}]: {}",
            self.score
        );
        ensure!(article_count >= 0, "article_count must be non-negative");

        let positive_factors = trimmed_non_empty(self.positive_factors);
        let risk_factors = trimmed_non_empty(self.risk_factors);

        Ok(SentimentResult {
            security_id: security_id.to_string(),
            as_of_date,
            score: self.score,
            confidence: Confidence::from_article_count(article_count, tiers),
            positive_factors,
            risk_factors,
            article_count,
            generated_at: Utc::now(),
        })
    }
}

fn trimmed_non_empty(items: Vec<String>) -> Vec<String> {
    items
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
