use crate::config::Settings;
use crate::domain::article::Article;
use crate::news::NewsSource;
use anyhow::{Context, Result};
use reqwest::header::{HeaderMap, HeaderValue};
use serde::Deserialize;
use std::time::Duration;

const DEFAULT_TIMEOUT_SECS: u64 = 10;
const DEFAULT_PATH: &str = "/v1/news";

/// HTTP JSON news provider. No internal retry loop: transient fetch failures
/// surface as SourceUnavailable and are retried by queue redelivery, not here.
#[derive(Debug, Clone)]
pub struct HttpNewsClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    path: String,
}

#[derive(Debug, Deserialize)]
struct NewsResponse {
    items: Vec<Article>,
}

impl HttpNewsClient {
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let base_url = settings.require_news_base_url()?.to_string();
        let api_key = settings.news_api_key.clone();

        let timeout_secs = std::env::var("NEWS_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(DEFAULT_TIMEOUT_SECS);

        let path = std::env::var("NEWS_PATH")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_PATH.to_string());

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .context("failed to build news http client")?;

        Ok(Self {
            http,
            base_url,
            api_key,
            path,
        })
    }

    fn url(&self) -> String {
        let path = if self.path.starts_with('/') {
            self.path.clone()
        } else {
            format!("/{}", self.path)
        };

        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    fn headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        if let Some(api_key) = &self.api_key {
            headers.insert("x-api-key", HeaderValue::from_str(api_key)?);
        }
        Ok(headers)
    }
}

#[async_trait::async_trait]
impl NewsSource for HttpNewsClient {
    fn source_name(&self) -> &'static str {
        "external_http_json"
    }

    async fn fetch_articles(
        &self,
        security_id: &str,
        limit: usize,
    ) -> Result<Vec<Article>> {
        let url = self.url();
        let headers = self.headers()?;

        let res = self
            .http
            .get(url)
            .headers(headers)
            .query(&[
                ("security_id", security_id),
                ("limit", &limit.to_string()),
            ])
            .send()
            .await
            .context("news source request failed")?;

        let status = res.status();
        let text = res.text().await.context("failed to read news response")?;

        if !status.is_success() {
            anyhow::bail!("news source HTTP {status}: {text}");
        }

        let parsed = serde_json::from_str::<NewsResponse>(&text)
            .with_context(|| format!("news response is not valid JSON: {text}"))?;

        let mut articles = Vec::with_capacity(parsed.items.len().min(limit));
        for article in parsed.items.into_iter().take(limit) {
            validate_article(&article)?;
            articles.push(article);
        }
        Ok(articles)
    }
}

fn validate_article(article: &Article) -> Result<()> {
    anyhow::ensure!(
        !article.headline.trim().is_empty(),
        "article headline must be non-empty"
    );
    anyhow::ensure!(!article.url.trim().is_empty(), "article url must be non-empty");
    Ok(())
}
