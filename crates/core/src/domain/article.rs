use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One news item as returned by the news source. Transient: fed to the
/// sentiment model and dropped, never persisted on its own.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Article {
    pub headline: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub published_at: Option<DateTime<Utc>>,
    pub url: String,
}
