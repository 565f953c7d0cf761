use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Duration;
use reqwest::{Client, Method, Response, StatusCode};
use serde_json::Value;
use tracing::{debug, warn};
use url::Url;

use crate::connection::ConnectionParameters;

use super::{AuthError, OAuthClient, OAuthToken, TokenStore};

/// Header carrying the application id on every backend request.
pub const APP_ID_HEADER: &str = "X-SMP-APPID";
const USER_AGENT: &str = "shop-rs/0.1.0";
const REFRESH_WINDOW_SECS: i64 = 60;

/// HTTP client for the commerce backend, pre-wired with the bearer token,
/// the app-id header and refresh handling.
#[derive(Clone)]
pub struct TransportSession {
    http: Client,
    app_id: String,
    server_url: Url,
    oauth: OAuthClient,
    tokens: Arc<dyn TokenStore>,
    refresh_window: Duration,
    timeout: StdDuration,
}

impl TransportSession {
    pub fn new(
        parameters: &ConnectionParameters,
        tokens: Arc<dyn TokenStore>,
        timeout: StdDuration,
    ) -> Result<Self, AuthError> {
        let http = Client::builder().user_agent(USER_AGENT).build()?;
        let oauth = OAuthClient::for_connection(parameters)?.with_timeout(timeout);
        Ok(Self {
            http,
            app_id: parameters.app_id().to_owned(),
            server_url: parameters.server_url().clone(),
            oauth,
            tokens,
            refresh_window: Duration::seconds(REFRESH_WINDOW_SECS),
            timeout,
        })
    }

    /// Same session reading and persisting its token through `tokens`.
    pub fn with_token_store(&self, tokens: Arc<dyn TokenStore>) -> Self {
        Self {
            tokens,
            ..self.clone()
        }
    }

    pub fn app_id(&self) -> &str {
        &self.app_id
    }

    pub fn server_url(&self) -> &Url {
        &self.server_url
    }

    pub fn timeout(&self) -> StdDuration {
        self.timeout
    }

    /// Token the next request will carry, refreshed first when it is about to expire.
    pub async fn current_token(&self) -> Result<OAuthToken, AuthError> {
        let token = self.tokens.token().await.ok_or(AuthError::NotAuthenticated)?;
        if !(token.will_expire_within(self.refresh_window) && token.is_refreshable()) {
            return Ok(token);
        }

        match self.refresh(&token).await {
            Ok(fresh) => Ok(fresh),
            Err(err) if !token.is_expired() => {
                warn!(error = %err, "proactive token refresh failed; using current token");
                Ok(token)
            }
            Err(err) => Err(err),
        }
    }

    pub async fn get(&self, url: Url) -> Result<Response, AuthError> {
        self.send(Method::GET, url, None).await
    }

    /// Send a request, refreshing the token and retrying once on `401 Unauthorized`.
    pub async fn send(
        &self,
        method: Method,
        url: Url,
        body: Option<&Value>,
    ) -> Result<Response, AuthError> {
        let token = self.current_token().await?;
        let response = self
            .request(method.clone(), url.clone(), body, &token)
            .await?;
        if response.status() != StatusCode::UNAUTHORIZED || !token.is_refreshable() {
            return Ok(response);
        }

        debug!(%url, "request unauthorized; refreshing token and retrying");
        let fresh = self.refresh(&token).await?;
        self.request(method, url, body, &fresh).await
    }

    async fn request(
        &self,
        method: Method,
        url: Url,
        body: Option<&Value>,
        token: &OAuthToken,
    ) -> Result<Response, AuthError> {
        let mut request = self
            .http
            .request(method, url)
            .bearer_auth(&token.access_token)
            .header(APP_ID_HEADER, &self.app_id)
            .timeout(self.timeout);
        if let Some(body) = body {
            request = request.json(body);
        }
        Ok(request.send().await?)
    }

    async fn refresh(&self, token: &OAuthToken) -> Result<OAuthToken, AuthError> {
        let fresh = self.oauth.refresh(token).await?;
        self.tokens.store(fresh.clone()).await;
        Ok(fresh)
    }
}

impl std::fmt::Debug for TransportSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportSession")
            .field("app_id", &self.app_id)
            .field("server_url", &self.server_url.as_str())
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::TransientTokenStore;
    use chrono::Utc;
    use httpmock::prelude::*;

    fn parameters(server: &MockServer) -> ConnectionParameters {
        ConnectionParameters::from_json_str(&format!(
            r#"{{"appId":"shop.app","clientId":"c1","serverUrl":"{base}/","authUrl":"{base}/oauth/authorize","tokenUrl":"{base}/oauth/token","redirectUrl":"{base}/callback"}}"#,
            base = server.base_url()
        ))
        .unwrap()
    }

    #[tokio::test]
    async fn attaches_bearer_and_app_id() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET)
                .path("/catalog")
                .header("authorization", "Bearer T")
                .header(APP_ID_HEADER, "shop.app");
            then.status(200).body("ok");
        });

        let store = Arc::new(TransientTokenStore::new(Some(OAuthToken::bearer("T"))));
        let session =
            TransportSession::new(&parameters(&server), store, StdDuration::from_secs(5)).unwrap();
        let response = session
            .get(Url::parse(&server.url("/catalog")).unwrap())
            .await
            .unwrap();
        mock.assert();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn unauthorized_triggers_single_refresh_and_retry() {
        let server = MockServer::start();
        let stale = server.mock(|when, then| {
            when.method(GET)
                .path("/catalog")
                .header("authorization", "Bearer old");
            then.status(401);
        });
        let fresh = server.mock(|when, then| {
            when.method(GET)
                .path("/catalog")
                .header("authorization", "Bearer new");
            then.status(200);
        });
        let token_endpoint = server.mock(|when, then| {
            when.method(POST)
                .path("/oauth/token")
                .body_contains("refresh_token=R");
            then.status(200).json_body_obj(&serde_json::json!({
                "access_token": "new",
                "token_type": "bearer",
                "expires_in": 3600
            }));
        });

        let store = Arc::new(TransientTokenStore::new(Some(
            OAuthToken::bearer("old").with_refresh_token("R"),
        )));
        let session = TransportSession::new(
            &parameters(&server),
            store.clone(),
            StdDuration::from_secs(5),
        )
        .unwrap();
        let response = session
            .get(Url::parse(&server.url("/catalog")).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        stale.assert_hits(1);
        fresh.assert_hits(1);
        token_endpoint.assert_hits(1);
        let stored = store.token().await.unwrap();
        assert_eq!(stored.access_token, "new");
        assert_eq!(stored.refresh_token.as_deref(), Some("R"));
    }

    #[tokio::test]
    async fn expiring_token_is_refreshed_before_sending() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/oauth/token");
            then.status(200).json_body_obj(&serde_json::json!({
                "access_token": "rotated",
                "refresh_token": "R2",
                "token_type": "bearer",
                "expires_in": 3600
            }));
        });

        let expiring = OAuthToken::bearer("old")
            .with_refresh_token("R")
            .with_expiry(Utc::now() + Duration::seconds(10));
        let store = Arc::new(TransientTokenStore::new(Some(expiring)));
        let session =
            TransportSession::new(&parameters(&server), store, StdDuration::from_secs(5)).unwrap();
        let token = session.current_token().await.unwrap();
        assert_eq!(token.access_token, "rotated");
        assert_eq!(token.refresh_token.as_deref(), Some("R2"));
    }

    #[tokio::test]
    async fn missing_token_is_reported() {
        let server = MockServer::start();
        let store = Arc::new(TransientTokenStore::default());
        let session =
            TransportSession::new(&parameters(&server), store, StdDuration::from_secs(5)).unwrap();
        assert!(matches!(
            session.current_token().await.unwrap_err(),
            AuthError::NotAuthenticated
        ));
    }
}
