pub mod domain;
pub mod llm;
pub mod news;
pub mod pipeline;
pub mod storage;
pub mod time;
pub mod universe;

#[cfg(test)]
pub(crate) mod testutil;

pub mod config {
    use crate::domain::portfolio::ClassifyThresholds;
    use crate::domain::sentiment::ConfidenceTiers;
    use anyhow::Context;

    #[derive(Debug, Clone)]
    pub struct Settings {
        pub database_url: Option<String>,
        pub anthropic_api_key: Option<String>,
        pub model_credentials_file: Option<String>,
        pub news_base_url: Option<String>,
        pub news_api_key: Option<String>,
        pub universe_file: Option<String>,
        pub sentry_dsn: Option<String>,
    }

    impl Settings {
        pub fn from_env() -> anyhow::Result<Self> {
            Ok(Self {
                database_url: std::env::var("DATABASE_URL").ok(),
                anthropic_api_key: std::env::var("ANTHROPIC_API_KEY").ok(),
                model_credentials_file: std::env::var("MODEL_CREDENTIALS_FILE").ok(),
                news_base_url: std::env::var("NEWS_BASE_URL").ok(),
                news_api_key: std::env::var("NEWS_API_KEY").ok(),
                universe_file: std::env::var("UNIVERSE_FILE").ok(),
                sentry_dsn: std::env::var("SENTRY_DSN").ok(),
            })
        }

        pub fn require_database_url(&self) -> anyhow::Result<&str> {
            self.database_url
                .as_deref()
                .context("DATABASE_URL is required")
        }

        pub fn require_news_base_url(&self) -> anyhow::Result<&str> {
            self.news_base_url
                .as_deref()
                .context("NEWS_BASE_URL is required")
        }

        pub fn require_universe_file(&self) -> anyhow::Result<&str> {
            self.universe_file
                .as_deref()
                .context("UNIVERSE_FILE is required")
        }
    }

    /// Tunable pipeline constants. Everything here is policy, not mechanism:
    /// the defaults mirror the documented behavior but each value can be
    /// overridden from the environment.
    #[derive(Debug, Clone)]
    pub struct Policy {
        /// Upper bound on articles fetched per security.
        pub max_articles: usize,
        pub confidence: ConfidenceTiers,
        pub classify: ClassifyThresholds,
        /// Queue deliveries before a message is dead-lettered.
        pub max_delivery_count: i32,
        /// Worker-pool bound for DIRECT batch dispatch.
        pub direct_concurrency: usize,
        /// Age after which a PENDING tracking record counts as abandoned.
        pub pending_grace_secs: i64,
        /// Prefix for durable result object keys.
        pub results_prefix: String,
    }

    impl Default for Policy {
        fn default() -> Self {
            Self {
                max_articles: 10,
                confidence: ConfidenceTiers::default(),
                classify: ClassifyThresholds::default(),
                max_delivery_count: 3,
                direct_concurrency: 4,
                pending_grace_secs: 1800,
                results_prefix: "outputs".to_string(),
            }
        }
    }

    impl Policy {
        pub fn from_env() -> anyhow::Result<Self> {
            let mut out = Self::default();

            if let Some(n) = env_parse::<usize>("MAX_ARTICLES") {
                out.max_articles = n;
            }
            if let Some(n) = env_parse::<i32>("CONFIDENCE_MEDIUM_MIN") {
                out.confidence.medium_min = n;
            }
            if let Some(n) = env_parse::<i32>("CONFIDENCE_HIGH_MIN") {
                out.confidence.high_min = n;
            }
            if let Some(n) = env_parse::<i32>("CLASSIFY_BUY_ABOVE") {
                out.classify.buy_above = n;
            }
            if let Some(n) = env_parse::<i32>("CLASSIFY_SELL_BELOW") {
                out.classify.sell_below = n;
            }
            if let Some(n) = env_parse::<i32>("MAX_DELIVERY_COUNT") {
                out.max_delivery_count = n;
            }
            if let Some(n) = env_parse::<usize>("DIRECT_CONCURRENCY") {
                out.direct_concurrency = n;
            }
            if let Some(n) = env_parse::<i64>("PENDING_GRACE_SECS") {
                out.pending_grace_secs = n;
            }
            if let Ok(s) = std::env::var("RESULTS_PREFIX") {
                if !s.trim().is_empty() {
                    out.results_prefix = s.trim().to_string();
                }
            }

            out.validate()?;
            Ok(out)
        }

        pub fn validate(&self) -> anyhow::Result<()> {
            anyhow::ensure!(self.max_articles >= 1, "MAX_ARTICLES must be >= 1");
            anyhow::ensure!(
                self.confidence.medium_min >= 1
                    && self.confidence.high_min > self.confidence.medium_min,
                "confidence tiers must satisfy 1 <= medium_min < high_min (got {}, {})",
                self.confidence.medium_min,
                self.confidence.high_min
            );
            anyhow::ensure!(
                self.classify.sell_below < self.classify.buy_above,
                "classification thresholds must satisfy sell_below < buy_above"
            );
            anyhow::ensure!(
                self.max_delivery_count >= 1,
                "MAX_DELIVERY_COUNT must be >= 1"
            );
            anyhow::ensure!(
                self.direct_concurrency >= 1,
                "DIRECT_CONCURRENCY must be >= 1"
            );
            anyhow::ensure!(
                self.pending_grace_secs >= 0,
                "PENDING_GRACE_SECS must be >= 0"
            );
            Ok(())
        }
    }

    fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
        std::env::var(key).ok().and_then(|s| s.parse::<T>().ok())
    }
}
