use std::env;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;
use url::Url;

use super::{AuthError, AuthorizationPresenter, LoopbackPresenter};

pub const PRESENTER_ENV: &str = "SHOP_AUTH_PRESENTER";
pub const NO_BROWSER_ENV: &str = "SHOP_NO_BROWSER";

/// How the authorization page is shown to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenterKind {
    Loopback,
    Manual,
}

/// Picks the presenter to start with from the environment and display availability.
#[derive(Debug)]
pub struct PresenterPreference {
    forced: Option<PresenterKind>,
    browser_available: bool,
}

impl PresenterPreference {
    pub fn detect() -> Self {
        let forced = env::var(PRESENTER_ENV)
            .ok()
            .and_then(|value| value.parse::<PresenterKind>().ok());
        Self {
            forced,
            browser_available: browser_available(),
        }
    }

    /// Presenter for `redirect_url`; non-loopback redirects can only be entered by hand.
    pub fn preferred_for(&self, redirect_url: &Url) -> PresenterKind {
        if !LoopbackPresenter::supports(redirect_url) {
            return PresenterKind::Manual;
        }
        match self.forced {
            Some(kind) => kind,
            None if self.browser_available => PresenterKind::Loopback,
            None => PresenterKind::Manual,
        }
    }

    /// Whether we should attempt to spawn the system browser automatically.
    pub fn browser_available(&self) -> bool {
        self.browser_available
    }
}

fn browser_available() -> bool {
    if env::var_os(NO_BROWSER_ENV).is_some() {
        return false;
    }

    if env::var_os("SSH_CONNECTION").is_some() && env::var_os("DISPLAY").is_none() {
        return false;
    }

    if env::var_os("DISPLAY").is_some() || env::var_os("WAYLAND_DISPLAY").is_some() {
        return true;
    }

    cfg!(target_os = "windows") || cfg!(target_os = "macos")
}

impl std::str::FromStr for PresenterKind {
    type Err = InvalidPresenter;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "loopback" | "browser" => Ok(PresenterKind::Loopback),
            "manual" | "code" => Ok(PresenterKind::Manual),
            other => Err(InvalidPresenter(other.to_owned())),
        }
    }
}

impl std::fmt::Display for PresenterKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let value = match self {
            PresenterKind::Loopback => "loopback",
            PresenterKind::Manual => "manual",
        };
        write!(f, "{value}")
    }
}

#[derive(Debug, thiserror::Error)]
#[error("invalid presenter '{0}'")]
pub struct InvalidPresenter(pub String);

/// Defers the choice between loopback capture and manual entry until the
/// redirect URL of the connection is known.
pub struct PreferredPresenter {
    preference: PresenterPreference,
    loopback: Arc<dyn AuthorizationPresenter>,
    manual: Arc<dyn AuthorizationPresenter>,
}

impl PreferredPresenter {
    pub fn new(
        preference: PresenterPreference,
        loopback: Arc<dyn AuthorizationPresenter>,
        manual: Arc<dyn AuthorizationPresenter>,
    ) -> Self {
        Self {
            preference,
            loopback,
            manual,
        }
    }
}

#[async_trait]
impl AuthorizationPresenter for PreferredPresenter {
    async fn present(
        &self,
        authorization_url: &Url,
        redirect_url: &Url,
    ) -> Result<Url, AuthError> {
        let kind = self.preference.preferred_for(redirect_url);
        debug!(presenter = %kind, "presenting authorization page");
        match kind {
            PresenterKind::Loopback => {
                match self.loopback.present(authorization_url, redirect_url).await {
                    Err(AuthError::BrowserLaunch(reason)) => {
                        debug!(%reason, "browser unavailable; falling back to manual entry");
                        self.manual.present(authorization_url, redirect_url).await
                    }
                    other => other,
                }
            }
            PresenterKind::Manual => self.manual.present(authorization_url, redirect_url).await,
        }
    }
}
