mod controller;
mod error;
mod oauth;
mod pkce;
mod preference;
mod presenter;
mod token;
mod transport;

pub use controller::{
    AuthenticatedSession, Authenticator, OAuthSessionController, DEFAULT_AUTHORIZATION_TIMEOUT,
};
pub use error::AuthError;
pub use oauth::{OAuthClient, OAuthConfig, OAuthEndpoints};
pub use pkce::{AuthorizationAttempt, PkcePair};
pub use preference::{
    InvalidPresenter, PreferredPresenter, PresenterKind, PresenterPreference, NO_BROWSER_ENV,
    PRESENTER_ENV,
};
pub use presenter::{
    parse_callback, AuthorizationPresenter, LoopbackPresenter, ManualPresenter, NotifyFn,
};
pub use token::{OAuthToken, TokenStore, TokenType, TransientTokenStore};
pub use transport::{TransportSession, APP_ID_HEADER};
