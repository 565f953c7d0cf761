use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;
use url::Url;

use crate::connection::ConnectionParameters;

use super::{AuthError, OAuthToken, PkcePair, TokenType};

const USER_AGENT: &str = "shop-rs/0.1.0";
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Client identity registered with the authorization server.
#[derive(Debug, Clone)]
pub struct OAuthConfig {
    pub client_id: String,
    pub redirect_uri: Url,
}

impl OAuthConfig {
    pub fn new<S: Into<String>>(client_id: S, redirect_uri: Url) -> Self {
        Self {
            client_id: client_id.into(),
            redirect_uri,
        }
    }
}

#[derive(Debug, Clone)]
pub struct OAuthEndpoints {
    pub authorization_url: Url,
    pub token_url: Url,
}

/// Authorization-code and refresh grants against the backend's token endpoint.
#[derive(Debug, Clone)]
pub struct OAuthClient {
    http: Client,
    config: OAuthConfig,
    endpoints: OAuthEndpoints,
    timeout: StdDuration,
}

impl OAuthClient {
    pub fn new(config: OAuthConfig, endpoints: OAuthEndpoints) -> Result<Self, AuthError> {
        let http = Client::builder().user_agent(USER_AGENT).build()?;
        Ok(Self {
            http,
            config,
            endpoints,
            timeout: StdDuration::from_secs(DEFAULT_TIMEOUT_SECS),
        })
    }

    /// Client for the endpoints and identity carried by `parameters`. No scopes are requested.
    pub fn for_connection(parameters: &ConnectionParameters) -> Result<Self, AuthError> {
        let config = OAuthConfig::new(parameters.client_id(), parameters.redirect_url().clone());
        let endpoints = OAuthEndpoints {
            authorization_url: parameters.authorization_url().clone(),
            token_url: parameters.token_url().clone(),
        };
        Self::new(config, endpoints)
    }

    pub fn with_timeout(mut self, timeout: StdDuration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn config(&self) -> &OAuthConfig {
        &self.config
    }

    pub fn endpoints(&self) -> &OAuthEndpoints {
        &self.endpoints
    }

    pub fn authorization_url(&self, pkce: &PkcePair, state: &str) -> Url {
        let mut url = self.endpoints.authorization_url.clone();
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("response_type", "code");
            pairs.append_pair("client_id", &self.config.client_id);
            pairs.append_pair("redirect_uri", self.config.redirect_uri.as_str());
            pairs.append_pair("code_challenge", pkce.challenge());
            pairs.append_pair("code_challenge_method", "S256");
            pairs.append_pair("state", state);
        }
        url
    }

    /// Exchange an authorization code for a token.
    pub async fn exchange_code(&self, code: &str, pkce: &PkcePair) -> Result<OAuthToken, AuthError> {
        let form = [
            ("grant_type", "authorization_code".to_string()),
            ("code", code.to_owned()),
            ("redirect_uri", self.config.redirect_uri.to_string()),
            ("code_verifier", pkce.verifier().to_owned()),
            ("client_id", self.config.client_id.clone()),
        ];

        debug!(token_url = %self.endpoints.token_url, "exchanging authorization code");
        let response = self
            .http
            .post(self.endpoints.token_url.clone())
            .form(&form)
            .timeout(self.timeout)
            .send()
            .await?;

        handle_token_response(response).await
    }

    /// Refresh `existing`, carrying its refresh token over when the server omits a new one.
    pub async fn refresh(&self, existing: &OAuthToken) -> Result<OAuthToken, AuthError> {
        let refresh_token = existing
            .refresh_token
            .as_ref()
            .ok_or(AuthError::RefreshUnavailable)?;

        let form = [
            ("grant_type", "refresh_token".to_string()),
            ("refresh_token", refresh_token.clone()),
            ("client_id", self.config.client_id.clone()),
        ];

        debug!(token_url = %self.endpoints.token_url, "refreshing access token");
        let response = self
            .http
            .post(self.endpoints.token_url.clone())
            .form(&form)
            .timeout(self.timeout)
            .send()
            .await?;

        let mut token = handle_token_response(response).await?;
        if token.refresh_token.is_none() {
            token.refresh_token = existing.refresh_token.clone();
        }
        Ok(token)
    }
}

async fn handle_token_response(response: reqwest::Response) -> Result<OAuthToken, AuthError> {
    let status = response.status();
    let received_at = Utc::now();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(AuthError::TokenEndpoint { status, body });
    }

    let payload: TokenResponse = response.json().await?;
    payload.into_token(received_at)
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    token_type: String,
    expires_in: Option<i64>,
    scope: Option<String>,
}

impl TokenResponse {
    fn into_token(self, received_at: DateTime<Utc>) -> Result<OAuthToken, AuthError> {
        let token_type = match self.token_type.to_ascii_lowercase().as_str() {
            "bearer" => TokenType::Bearer,
            other => return Err(AuthError::InvalidTokenType(other.to_owned())),
        };

        let expires_at = match self.expires_in {
            Some(seconds) => Some(
                Duration::try_seconds(seconds)
                    .and_then(|lifetime| received_at.checked_add_signed(lifetime))
                    .ok_or_else(|| {
                        AuthError::InvalidAuthorizationResponse(format!(
                            "expires_in out of range: {seconds}"
                        ))
                    })?,
            ),
            None => None,
        };

        let scope = self
            .scope
            .unwrap_or_default()
            .split_whitespace()
            .map(ToOwned::to_owned)
            .collect();

        Ok(OAuthToken {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            token_type,
            expires_at,
            scope,
            created_at: received_at,
        })
    }
}
