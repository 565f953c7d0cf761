use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

use crate::auth::TransportSession;

const SETTINGS_PATH: &str = "/mobileservices/settingsExchange/v1/device";

/// Local passcode rules, normally dictated by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PasscodePolicy {
    pub min_length: usize,
    pub digits_only: bool,
    pub require_upper: bool,
    pub require_lower: bool,
    pub require_special: bool,
}

impl Default for PasscodePolicy {
    fn default() -> Self {
        Self {
            min_length: 4,
            digits_only: true,
            require_upper: false,
            require_lower: false,
            require_special: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PolicyViolation {
    #[error("passcode must be at least {0} characters long")]
    TooShort(usize),
    #[error("passcode may contain digits only")]
    DigitsOnly,
    #[error("passcode needs an upper-case letter")]
    MissingUpper,
    #[error("passcode needs a lower-case letter")]
    MissingLower,
    #[error("passcode needs a special character")]
    MissingSpecial,
}

impl PasscodePolicy {
    /// First rule `passcode` violates, if any.
    pub fn check(&self, passcode: &str) -> Result<(), PolicyViolation> {
        if passcode.chars().count() < self.min_length {
            return Err(PolicyViolation::TooShort(self.min_length));
        }
        if self.digits_only && !passcode.chars().all(|c| c.is_ascii_digit()) {
            return Err(PolicyViolation::DigitsOnly);
        }
        if self.require_upper && !passcode.chars().any(char::is_uppercase) {
            return Err(PolicyViolation::MissingUpper);
        }
        if self.require_lower && !passcode.chars().any(char::is_lowercase) {
            return Err(PolicyViolation::MissingLower);
        }
        if self.require_special && passcode.chars().all(char::is_alphanumeric) {
            return Err(PolicyViolation::MissingSpecial);
        }
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("passcode policy could not be loaded: {0}")]
    LoadingFailed(String),
}

/// Where the onboarding flow gets the passcode policy from.
#[async_trait]
pub trait PolicySource: Send + Sync {
    async fn fetch_policy(
        &self,
        app_id: &str,
        server_url: &Url,
        transport: &TransportSession,
    ) -> Result<PasscodePolicy, PolicyError>;
}

/// Reads the policy from the backend's device settings exchange.
#[derive(Debug, Default, Clone, Copy)]
pub struct PasscodePolicyResolver;

impl PasscodePolicyResolver {
    /// Settings URL on the server's origin; the server URL path is dropped.
    pub fn settings_url(server_url: &Url) -> Result<Url, PolicyError> {
        let mut url = server_url.clone();
        url.set_path(SETTINGS_PATH);
        url.set_query(None);
        url.set_fragment(None);
        if url.cannot_be_a_base() || url.host_str().is_none() {
            return Err(PolicyError::LoadingFailed(format!(
                "server URL '{server_url}' has no host"
            )));
        }
        Ok(url)
    }
}

#[async_trait]
impl PolicySource for PasscodePolicyResolver {
    async fn fetch_policy(
        &self,
        app_id: &str,
        server_url: &Url,
        transport: &TransportSession,
    ) -> Result<PasscodePolicy, PolicyError> {
        let url = Self::settings_url(server_url)?;
        debug!(%url, app_id, "fetching passcode policy");

        let response = transport.get(url).await.map_err(|err| {
            warn!(error = %err, "passcode policy request failed");
            PolicyError::LoadingFailed(err.to_string())
        })?;
        let status = response.status();
        if !status.is_success() {
            return Err(PolicyError::LoadingFailed(format!("status {status}")));
        }

        let settings: DeviceSettings = response
            .json()
            .await
            .map_err(|err| PolicyError::LoadingFailed(err.to_string()))?;
        Ok(settings.password_policy.into())
    }
}

#[derive(Debug, Deserialize)]
struct DeviceSettings {
    #[serde(rename = "passwordPolicy")]
    password_policy: PasswordPolicySettings,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PasswordPolicySettings {
    #[serde(default = "enabled_by_default")]
    password_policy_enabled: bool,
    #[serde(default)]
    password_policy_min_length: Option<usize>,
    #[serde(default)]
    password_policy_upper_required: bool,
    #[serde(default)]
    password_policy_lower_required: bool,
    #[serde(default)]
    password_policy_special_required: bool,
}

fn enabled_by_default() -> bool {
    true
}

impl From<PasswordPolicySettings> for PasscodePolicy {
    fn from(settings: PasswordPolicySettings) -> Self {
        let defaults = PasscodePolicy::default();
        if !settings.password_policy_enabled {
            return defaults;
        }
        let letters_or_symbols = settings.password_policy_upper_required
            || settings.password_policy_lower_required
            || settings.password_policy_special_required;
        PasscodePolicy {
            min_length: settings
                .password_policy_min_length
                .unwrap_or(defaults.min_length),
            digits_only: !letters_or_symbols,
            require_upper: settings.password_policy_upper_required,
            require_lower: settings.password_policy_lower_required,
            require_special: settings.password_policy_special_required,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{OAuthToken, TransientTokenStore, APP_ID_HEADER};
    use crate::connection::ConnectionParameters;
    use httpmock::prelude::*;
    use std::sync::Arc;
    use std::time::Duration;

    fn transport(server: &MockServer) -> (TransportSession, Url) {
        let parameters = ConnectionParameters::from_json_str(&format!(
            r#"{{"appId":"shop.app","clientId":"c1","serverUrl":"{base}/odata/shop","authUrl":"{base}/oauth/authorize","tokenUrl":"{base}/oauth/token","redirectUrl":"{base}/callback"}}"#,
            base = server.base_url()
        ))
        .unwrap();
        let tokens = Arc::new(TransientTokenStore::new(Some(OAuthToken::bearer("T"))));
        let session =
            TransportSession::new(&parameters, tokens, Duration::from_secs(5)).unwrap();
        (session, parameters.server_url().clone())
    }

    #[test]
    fn default_policy_is_four_digits() {
        let policy = PasscodePolicy::default();
        assert!(policy.check("1234").is_ok());
        assert_eq!(policy.check("123"), Err(PolicyViolation::TooShort(4)));
        assert_eq!(policy.check("12a4"), Err(PolicyViolation::DigitsOnly));
    }

    #[test]
    fn reports_first_violation() {
        let policy = PasscodePolicy {
            min_length: 6,
            digits_only: false,
            require_upper: true,
            require_lower: true,
            require_special: true,
        };
        assert_eq!(policy.check("abc"), Err(PolicyViolation::TooShort(6)));
        assert_eq!(policy.check("abcdef"), Err(PolicyViolation::MissingUpper));
        assert_eq!(policy.check("ABCDEF"), Err(PolicyViolation::MissingLower));
        assert_eq!(policy.check("ABCdef"), Err(PolicyViolation::MissingSpecial));
        assert!(policy.check("ABCde#").is_ok());
    }

    #[test]
    fn settings_url_keeps_origin_only() {
        let server = Url::parse("https://shop.example.com:8443/odata/shop?x=1").unwrap();
        assert_eq!(
            PasscodePolicyResolver::settings_url(&server).unwrap().as_str(),
            "https://shop.example.com:8443/mobileservices/settingsExchange/v1/device"
        );
    }

    #[tokio::test]
    async fn fetches_policy_with_app_id_header() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET)
                .path(SETTINGS_PATH)
                .header(APP_ID_HEADER, "shop.app")
                .header("authorization", "Bearer T");
            then.status(200).json_body_obj(&serde_json::json!({
                "passwordPolicy": {
                    "passwordPolicyEnabled": true,
                    "passwordPolicyMinLength": 8,
                    "passwordPolicyUpperRequired": true,
                    "passwordPolicyLowerRequired": false,
                    "passwordPolicySpecialRequired": false,
                    "passwordPolicyLockTimeout": 300
                }
            }));
        });

        let (transport, server_url) = transport(&server);
        let policy = PasscodePolicyResolver
            .fetch_policy("shop.app", &server_url, &transport)
            .await
            .unwrap();
        mock.assert();
        assert_eq!(policy.min_length, 8);
        assert!(policy.require_upper);
        assert!(!policy.digits_only);
    }

    #[tokio::test]
    async fn disabled_policy_falls_back_to_default() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path(SETTINGS_PATH);
            then.status(200).json_body_obj(&serde_json::json!({
                "passwordPolicy": { "passwordPolicyEnabled": false, "passwordPolicyMinLength": 12 }
            }));
        });

        let (transport, server_url) = transport(&server);
        let policy = PasscodePolicyResolver
            .fetch_policy("shop.app", &server_url, &transport)
            .await
            .unwrap();
        assert_eq!(policy, PasscodePolicy::default());
    }

    #[tokio::test]
    async fn server_error_is_loading_failure() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path(SETTINGS_PATH);
            then.status(500);
        });

        let (transport, server_url) = transport(&server);
        let err = PasscodePolicyResolver
            .fetch_policy("shop.app", &server_url, &transport)
            .await
            .unwrap_err();
        assert!(matches!(err, PolicyError::LoadingFailed(_)));
    }
}
