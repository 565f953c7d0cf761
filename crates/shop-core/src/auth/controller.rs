use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::connection::ConnectionParameters;

use super::{
    parse_callback, AuthError, AuthorizationAttempt, AuthorizationPresenter, OAuthClient,
    OAuthToken, TransientTokenStore, TransportSession,
};

/// Token plus the transport session wired to it.
#[derive(Debug, Clone)]
pub struct AuthenticatedSession {
    pub token: OAuthToken,
    pub transport: TransportSession,
}

/// Authorizes the user against the backend described by `parameters`.
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn authenticate(
        &self,
        parameters: &ConnectionParameters,
    ) -> Result<AuthenticatedSession, AuthError>;
}

/// How long the user gets to finish the authorization page.
pub const DEFAULT_AUTHORIZATION_TIMEOUT: Duration = Duration::from_secs(300);

/// Authorization-code grant with PKCE; the interactive step is delegated to a presenter.
pub struct OAuthSessionController {
    presenter: Arc<dyn AuthorizationPresenter>,
    timeout: Duration,
    authorization_timeout: Duration,
}

impl OAuthSessionController {
    /// `timeout` bounds every HTTP round trip.
    pub fn new(presenter: Arc<dyn AuthorizationPresenter>, timeout: Duration) -> Self {
        Self {
            presenter,
            timeout,
            authorization_timeout: DEFAULT_AUTHORIZATION_TIMEOUT,
        }
    }

    pub fn with_authorization_timeout(mut self, authorization_timeout: Duration) -> Self {
        self.authorization_timeout = authorization_timeout;
        self
    }
}

#[async_trait]
impl Authenticator for OAuthSessionController {
    async fn authenticate(
        &self,
        parameters: &ConnectionParameters,
    ) -> Result<AuthenticatedSession, AuthError> {
        let client = OAuthClient::for_connection(parameters)?.with_timeout(self.timeout);
        let attempt = AuthorizationAttempt::generate();
        let authorization_url = client.authorization_url(&attempt.pkce, &attempt.state);
        let redirect_url = parameters.redirect_url();

        debug!(client_id = parameters.client_id(), "presenting authorization page");
        let captured = tokio::time::timeout(
            self.authorization_timeout,
            self.presenter.present(&authorization_url, redirect_url),
        )
        .await
        .map_err(|_| {
            warn!("authorization page was not completed in time");
            AuthError::AuthorizationTimedOut
        })??;
        let code = parse_callback(&captured, redirect_url, &attempt.state)?;

        let token = client.exchange_code(&code, &attempt.pkce).await?;
        info!(app_id = parameters.app_id(), "authorization succeeded");

        let tokens = Arc::new(TransientTokenStore::new(Some(token.clone())));
        let transport = TransportSession::new(parameters, tokens, self.timeout)?;
        Ok(AuthenticatedSession { token, transport })
    }
}
