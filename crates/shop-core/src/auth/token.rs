use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

/// Type of token returned by the token endpoint.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TokenType {
    Bearer,
}

/// Bearer credential obtained from the OAuth token endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OAuthToken {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub token_type: TokenType,
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub scope: Vec<String>,
    #[serde(default = "default_created_at")]
    pub created_at: DateTime<Utc>,
}

fn default_created_at() -> DateTime<Utc> {
    Utc::now()
}

impl OAuthToken {
    /// Bare bearer token without refresh token or expiry.
    pub fn bearer(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: None,
            token_type: TokenType::Bearer,
            expires_at: None,
            scope: vec![],
            created_at: Utc::now(),
        }
    }

    pub fn with_refresh_token(mut self, refresh_token: impl Into<String>) -> Self {
        self.refresh_token = Some(refresh_token.into());
        self
    }

    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    pub fn is_expired(&self) -> bool {
        match self.expires_at {
            Some(ts) => Utc::now() >= ts,
            None => false,
        }
    }

    pub fn will_expire_within(&self, window: Duration) -> bool {
        match self.expires_at {
            Some(ts) => Utc::now() + window >= ts,
            None => false,
        }
    }

    pub fn is_refreshable(&self) -> bool {
        self.refresh_token.is_some()
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}

/// Where a transport session reads its token from and writes refreshed tokens to.
#[async_trait]
pub trait TokenStore: Send + Sync {
    async fn store(&self, token: OAuthToken);
    async fn token(&self) -> Option<OAuthToken>;
    async fn delete(&self);
}

/// In-memory token store used between authorization and passcode creation.
#[derive(Debug, Default)]
pub struct TransientTokenStore {
    token: RwLock<Option<OAuthToken>>,
}

impl TransientTokenStore {
    pub fn new(token: Option<OAuthToken>) -> Self {
        Self {
            token: RwLock::new(token),
        }
    }
}

#[async_trait]
impl TokenStore for TransientTokenStore {
    async fn store(&self, token: OAuthToken) {
        *self.token.write().await = Some(token);
    }

    async fn token(&self) -> Option<OAuthToken> {
        self.token.read().await.clone()
    }

    async fn delete(&self) {
        *self.token.write().await = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expiry_detection() {
        let token = OAuthToken::bearer("token")
            .with_refresh_token("refresh")
            .with_expiry(Utc::now() + Duration::minutes(1));
        assert!(!token.is_expired());
        assert!(token.will_expire_within(Duration::minutes(2)));
        assert!(token.is_refreshable());
    }

    #[test]
    fn token_without_expiry_never_expires() {
        let token = OAuthToken::bearer("T");
        assert!(!token.is_expired());
        assert!(!token.will_expire_within(Duration::hours(1)));
        assert!(!token.is_refreshable());
    }

    #[test]
    fn json_form_is_stable() {
        let token = OAuthToken::bearer("T").with_refresh_token("R");
        let parsed = OAuthToken::from_json(&token.to_json().unwrap()).unwrap();
        assert_eq!(parsed, token);
    }

    #[tokio::test]
    async fn transient_store_replaces_and_clears() {
        let store = TransientTokenStore::new(Some(OAuthToken::bearer("first")));
        store.store(OAuthToken::bearer("second")).await;
        assert_eq!(store.token().await.unwrap().access_token, "second");
        store.delete().await;
        assert!(store.token().await.is_none());
    }
}
