//! Configurable collaborator stubs shared by pipeline tests.

use crate::domain::article::Article;
use crate::domain::contract::ModelSentimentPayload;
use crate::llm::{Provider, ScoreInput, SentimentModel};
use crate::news::NewsSource;
use chrono::Utc;
use std::sync::atomic::{AtomicUsize, Ordering};

pub fn sample_articles(n: usize) -> Vec<Article> {
    (0..n)
        .map(|i| Article {
            headline: format!("headline {i}"),
            summary: format!("summary {i}"),
            published_at: Some(Utc::now()),
            url: format!("https://example.com/article/{i}"),
        })
        .collect()
}

#[derive(Debug, Clone)]
pub enum NewsBehavior {
    Articles(Vec<Article>),
    Fail(String),
}

#[derive(Debug)]
pub struct StubNews {
    behavior: NewsBehavior,
    calls: AtomicUsize,
}

impl StubNews {
    pub fn returning(articles: Vec<Article>) -> Self {
        Self {
            behavior: NewsBehavior::Articles(articles),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(detail: &str) -> Self {
        Self {
            behavior: NewsBehavior::Fail(detail.to_string()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl NewsSource for StubNews {
    fn source_name(&self) -> &'static str {
        "stub"
    }

    async fn fetch_articles(
        &self,
        _security_id: &str,
        limit: usize,
    ) -> anyhow::Result<Vec<Article>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.behavior {
            NewsBehavior::Articles(articles) => {
                Ok(articles.iter().take(limit).cloned().collect())
            }
            NewsBehavior::Fail(detail) => anyhow::bail!("{detail}"),
        }
    }
}

#[derive(Debug, Clone)]
pub enum ModelBehavior {
    Payload(ModelSentimentPayload),
    Fail(String),
}

#[derive(Debug)]
pub struct StubModel {
    behavior: ModelBehavior,
    calls: AtomicUsize,
}

impl StubModel {
    pub fn scoring(score: i32) -> Self {
        Self::with_payload(ModelSentimentPayload {
            score,
            positive_factors: vec!["stub positive".to_string()],
            risk_factors: vec!["stub risk".to_string()],
            reasoning: None,
        })
    }

    pub fn with_payload(payload: ModelSentimentPayload) -> Self {
        Self {
            behavior: ModelBehavior::Payload(payload),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(detail: &str) -> Self {
        Self {
            behavior: ModelBehavior::Fail(detail.to_string()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl SentimentModel for StubModel {
    fn provider(&self) -> Provider {
        Provider::Anthropic
    }

    async fn score_articles(&self, _input: &ScoreInput) -> anyhow::Result<ModelSentimentPayload> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.behavior {
            ModelBehavior::Payload(payload) => Ok(payload.clone()),
            ModelBehavior::Fail(detail) => anyhow::bail!("{detail}"),
        }
    }
}
