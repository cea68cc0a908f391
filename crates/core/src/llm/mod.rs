pub mod anthropic;
pub mod credentials;
pub mod error;
pub mod json;

use crate::domain::article::Article;
use crate::domain::contract::ModelSentimentPayload;
use chrono::NaiveDate;

#[derive(Debug, Clone)]
pub struct ScoreInput {
    pub security_id: String,
    pub as_of_date: NaiveDate,
    pub articles: Vec<Article>,
}

#[derive(Debug, Clone, Copy)]
pub enum Provider {
    Anthropic,
}

/// The sentiment model collaborator. Implementations return the raw payload;
/// range validation happens in the domain contract so a misbehaving model is
/// a visible failure, not a silently repaired score.
#[async_trait::async_trait]
pub trait SentimentModel: Send + Sync {
    fn provider(&self) -> Provider;

    async fn score_articles(&self, input: &ScoreInput) -> anyhow::Result<ModelSentimentPayload>;
}
