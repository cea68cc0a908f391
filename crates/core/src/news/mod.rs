pub mod http;

use crate::domain::article::Article;

pub use http::HttpNewsClient;

/// The news source collaborator: recent articles for one security, newest
/// first, possibly fewer than requested, possibly none.
#[async_trait::async_trait]
pub trait NewsSource: Send + Sync {
    fn source_name(&self) -> &'static str;

    async fn fetch_articles(&self, security_id: &str, limit: usize)
        -> anyhow::Result<Vec<Article>>;
}
