//! Repository authentication session
//!
//! Lazily-initialized, auto-refreshing OAuth2 client-credentials token holder.
//! Missing credentials surface as an error on first use, not as a crash at
//! process start.

use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::RepoError;
use crate::config::ServerConfig;

/// Refresh this long before the token actually expires
const EXPIRY_MARGIN_SECS: i64 = 30;

#[derive(Debug, Clone)]
struct CachedToken {
    access_token: String,
    expires_at: DateTime<Utc>,
}

impl CachedToken {
    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        self.expires_at - Duration::seconds(EXPIRY_MARGIN_SECS) > now
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: i64,
}

fn default_expires_in() -> i64 {
    300
}

/// Shared auth session toward the FHIR repository
///
/// Safe to call from concurrent dispatches; the token cache is the only state
/// shared across calls.
pub struct AuthSession {
    http: reqwest::Client,
    token_url: String,
    client_id: Option<String>,
    client_secret: Option<String>,
    cached: Mutex<Option<CachedToken>>,
}

impl AuthSession {
    pub fn new(config: &ServerConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            token_url: config.token_url.clone(),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            cached: Mutex::new(None),
        }
    }

    /// Return a bearer token, fetching or refreshing when necessary
    ///
    /// Idempotent; may perform a network round trip on first call or after
    /// expiry.
    pub async fn ensure_authenticated(&self) -> Result<String, RepoError> {
        let mut cached = self.cached.lock().await;
        let now = Utc::now();
        if let Some(token) = cached.as_ref() {
            if token.is_fresh(now) {
                return Ok(token.access_token.clone());
            }
            debug!("access token expired, refreshing");
        }

        let token = self.fetch_token().await?;
        let access_token = token.access_token.clone();
        *cached = Some(token);
        Ok(access_token)
    }

    async fn fetch_token(&self) -> Result<CachedToken, RepoError> {
        let client_id = self
            .client_id
            .as_deref()
            .ok_or_else(|| RepoError::Auth("FHIR_CLIENT_ID is not configured".to_string()))?;
        let client_secret = self
            .client_secret
            .as_deref()
            .ok_or_else(|| RepoError::Auth("FHIR_CLIENT_SECRET is not configured".to_string()))?;

        let params = [
            ("grant_type", "client_credentials"),
            ("client_id", client_id),
            ("client_secret", client_secret),
        ];
        let response = self
            .http
            .post(&self.token_url)
            .form(&params)
            .send()
            .await
            .map_err(|e| RepoError::Auth(format!("token request failed: {e}")))?;
        if !response.status().is_success() {
            return Err(RepoError::Auth(format!(
                "token endpoint returned {}",
                response.status()
            )));
        }
        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| RepoError::Auth(format!("invalid token response: {e}")))?;

        info!("acquired repository access token");
        Ok(CachedToken {
            access_token: token.access_token,
            expires_at: Utc::now() + Duration::seconds(token.expires_in),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_without_credentials() -> ServerConfig {
        ServerConfig {
            client_id: None,
            client_secret: None,
            ..ServerConfig::default()
        }
    }

    #[tokio::test]
    async fn test_missing_credentials_error_on_first_use() {
        let session = AuthSession::new(&config_without_credentials());
        let err = session.ensure_authenticated().await.unwrap_err();
        match err {
            RepoError::Auth(msg) => assert!(msg.contains("FHIR_CLIENT_ID")),
            other => panic!("expected auth error, got {other:?}"),
        }
    }

    #[test]
    fn test_token_freshness_margin() {
        let now = Utc::now();
        let fresh = CachedToken {
            access_token: "t".to_string(),
            expires_at: now + Duration::seconds(120),
        };
        let stale = CachedToken {
            access_token: "t".to_string(),
            expires_at: now + Duration::seconds(10),
        };
        assert!(fresh.is_fresh(now));
        assert!(!stale.is_fresh(now));
    }
}
