//! Model API credentials as process-wide state with an explicit lifecycle:
//! either a static key from the environment, or a refreshable token file
//! (OAuth-style `access_token` + expiry) reloaded when expired and once on
//! an authentication failure. Injected into the model client, never read
//! ambiently at call sites.

use crate::config::Settings;
use anyhow::Context;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;
use std::path::PathBuf;
use tokio::sync::RwLock;

#[derive(Debug)]
enum CredentialSource {
    Static(String),
    File(PathBuf),
}

#[derive(Debug, Clone)]
struct CachedToken {
    access_token: String,
    expires_at: Option<DateTime<Utc>>,
}

impl CachedToken {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expires_at, Some(t) if t <= now)
    }
}

#[derive(Debug)]
pub struct CredentialStore {
    source: CredentialSource,
    cached: RwLock<Option<CachedToken>>,
}

impl CredentialStore {
    pub fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        let source = if let Some(key) = settings.anthropic_api_key.as_deref() {
            CredentialSource::Static(key.to_string())
        } else if let Some(path) = settings.model_credentials_file.as_deref() {
            CredentialSource::File(PathBuf::from(path))
        } else {
            anyhow::bail!("ANTHROPIC_API_KEY or MODEL_CREDENTIALS_FILE is required");
        };

        Ok(Self {
            source,
            cached: RwLock::new(None),
        })
    }

    pub fn is_refreshable(&self) -> bool {
        matches!(self.source, CredentialSource::File(_))
    }

    /// Current token, reloading the credential file if the cached one has
    /// expired.
    pub async fn token(&self) -> anyhow::Result<String> {
        let path = match &self.source {
            CredentialSource::Static(key) => return Ok(key.clone()),
            CredentialSource::File(path) => path,
        };

        let now = Utc::now();
        {
            let cached = self.cached.read().await;
            if let Some(token) = cached.as_ref() {
                if !token.is_expired(now) {
                    return Ok(token.access_token.clone());
                }
            }
        }

        let token = load_token_file(path).await?;
        if token.is_expired(now) {
            tracing::warn!(path = %path.display(), "credential file token is already expired");
        }
        let access_token = token.access_token.clone();
        *self.cached.write().await = Some(token);
        Ok(access_token)
    }

    /// Force a reload, used after an authentication failure. A static key
    /// has nothing to refresh, so the same key comes back.
    pub async fn refresh(&self) -> anyhow::Result<String> {
        let path = match &self.source {
            CredentialSource::Static(key) => return Ok(key.clone()),
            CredentialSource::File(path) => path,
        };

        let token = load_token_file(path).await?;
        let access_token = token.access_token.clone();
        *self.cached.write().await = Some(token);
        Ok(access_token)
    }
}

async fn load_token_file(path: &PathBuf) -> anyhow::Result<CachedToken> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read credential file {}", path.display()))?;
    parse_token_json(&raw)
        .with_context(|| format!("invalid credential file {}", path.display()))
}

fn parse_token_json(raw: &str) -> anyhow::Result<CachedToken> {
    let v: Value = serde_json::from_str(raw).context("credential file is not valid JSON")?;

    let access_token = ["access_token", "api_key", "token"]
        .iter()
        .find_map(|k| v.get(k).and_then(Value::as_str))
        .map(str::to_string)
        .context("no access_token/api_key/token field in credential file")?;

    let expires_at = ["expires_at", "expiration", "expire_time"]
        .iter()
        .find_map(|k| v.get(k))
        .and_then(parse_expiry);

    Ok(CachedToken {
        access_token,
        expires_at,
    })
}

fn parse_expiry(v: &Value) -> Option<DateTime<Utc>> {
    let epoch = match v {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) if s.chars().all(|c| c.is_ascii_digit()) => s.parse::<f64>().ok()?,
        Value::String(s) => {
            return DateTime::parse_from_rfc3339(s)
                .ok()
                .map(|t| t.with_timezone(&Utc))
        }
        _ => return None,
    };

    // Millisecond timestamps are > 1e10 until the year 2286.
    let secs = if epoch > 1e10 { epoch / 1000.0 } else { epoch };
    Utc.timestamp_opt(secs as i64, 0).single()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_token_with_millisecond_expiry() {
        let t = parse_token_json(r#"{"access_token": "abc", "expires_at": 1710000000000}"#)
            .unwrap();
        assert_eq!(t.access_token, "abc");
        assert_eq!(t.expires_at.unwrap().timestamp(), 1_710_000_000);
    }

    #[test]
    fn parses_token_with_second_and_rfc3339_expiry() {
        let t = parse_token_json(r#"{"api_key": "k", "expiration": 1710000000}"#).unwrap();
        assert_eq!(t.expires_at.unwrap().timestamp(), 1_710_000_000);

        let t = parse_token_json(r#"{"token": "k", "expires_at": "2030-01-01T00:00:00Z"}"#)
            .unwrap();
        assert!(t.expires_at.is_some());
    }

    #[test]
    fn token_without_expiry_never_expires() {
        let t = parse_token_json(r#"{"access_token": "abc"}"#).unwrap();
        assert!(t.expires_at.is_none());
        assert!(!t.is_expired(Utc::now()));
    }

    #[test]
    fn rejects_file_without_any_token_field() {
        assert!(parse_token_json(r#"{"expires_at": 1710000000}"#).is_err());
        assert!(parse_token_json("not json").is_err());
    }

    #[tokio::test]
    async fn static_key_is_returned_as_is() {
        let settings = Settings {
            database_url: None,
            anthropic_api_key: Some("sk-test".to_string()),
            model_credentials_file: None,
            news_base_url: None,
            news_api_key: None,
            universe_file: None,
            sentry_dsn: None,
        };
        let store = CredentialStore::from_settings(&settings).unwrap();
        assert!(!store.is_refreshable());
        assert_eq!(store.token().await.unwrap(), "sk-test");
        assert_eq!(store.refresh().await.unwrap(), "sk-test");
    }
}
