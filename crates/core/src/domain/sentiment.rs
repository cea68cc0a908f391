use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

pub const SCORE_MIN: i32 = -5;
pub const SCORE_MAX: i32 = 5;

/// Article-count thresholds that map to a confidence tier.
/// Counts below `medium_min` are LOW, counts below `high_min` are MEDIUM,
/// everything else is HIGH.
#[derive(Debug, Clone, Copy)]
pub struct ConfidenceTiers {
    pub medium_min: i32,
    pub high_min: i32,
}

impl Default for ConfidenceTiers {
    fn default() -> Self {
        Self {
            medium_min: 3,
            high_min: 8,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

impl Confidence {
    /// Deterministic function of the article count; never derived from the
    /// model's own opinion of itself.
    pub fn from_article_count(article_count: i32, tiers: &ConfidenceTiers) -> Self {
        if article_count < tiers.medium_min {
            Confidence::Low
        } else if article_count < tiers.high_min {
            Confidence::Medium
        } else {
            Confidence::High
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Confidence::Low => "LOW",
            Confidence::Medium => "MEDIUM",
            Confidence::High => "HIGH",
        }
    }

    pub fn parse(s: &str) -> anyhow::Result<Self> {
        match s {
            "LOW" => Ok(Confidence::Low),
            "MEDIUM" => Ok(Confidence::Medium),
            "HIGH" => Ok(Confidence::High),
            other => anyhow::bail!("unknown confidence tier: {other}"),
        }
    }
}

/// The durable per-(security, date) outcome of one analyzer run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SentimentResult {
    pub security_id: String,
    pub as_of_date: NaiveDate,
    pub score: i32,
    pub confidence: Confidence,
    pub positive_factors: Vec<String>,
    pub risk_factors: Vec<String>,
    pub article_count: i32,
    pub generated_at: DateTime<Utc>,
}

impl SentimentResult {
    /// Absence of news is a valid, recorded outcome, not a failure.
    pub fn no_news(security_id: &str, as_of_date: NaiveDate) -> Self {
        Self {
            security_id: security_id.to_string(),
            as_of_date,
            score: 0,
            confidence: Confidence::Low,
            positive_factors: Vec::new(),
            risk_factors: Vec::new(),
            article_count: 0,
            generated_at: Utc::now(),
        }
    }
}

/// Canonical durable-object key: `{prefix}/{YYYY-MM-DD}/{slug}.json`.
pub fn object_key(prefix: &str, as_of_date: NaiveDate, security_id: &str) -> String {
    format!(
        "{}/{}/{}.json",
        prefix.trim_matches('/'),
        as_of_date.format("%Y-%m-%d"),
        security_slug(security_id)
    )
}

fn security_slug(security_id: &str) -> String {
    let mut out = String::with_capacity(security_id.len());
    for c in security_id.trim().chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
        } else {
            out.push('_');
        }
    }
    out
}
