use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::auth::TransportSession;
use crate::connection::{ConfigurationError, ConnectionParameters};
use crate::store::AuthorizationManager;

/// Key of the connection JSON inside a serialized onboarding result.
pub const CONNECTION_KEY: &str = "shop.onboarding.connection";
/// Key of the passcode inside a serialized login result.
pub const PASSWORD_KEY: &str = "shop.login.password";

#[derive(Debug, Error)]
pub enum ResultError {
    #[error("malformed result data: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("stored connection is invalid: {0}")]
    Connection(#[from] ConfigurationError),
}

#[derive(Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct PersistedOnboarding {
    #[serde(rename = "shop.onboarding.connection")]
    connection: String,
}

#[derive(Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct PersistedLogin {
    #[serde(rename = "shop.login.password")]
    password: String,
}

/// Everything a successful onboarding hands to the app.
#[derive(Debug, Clone)]
pub struct OnboardingResult {
    connection_parameters: ConnectionParameters,
    transport: TransportSession,
    auth_manager: AuthorizationManager,
}

impl OnboardingResult {
    pub fn new(
        connection_parameters: ConnectionParameters,
        transport: TransportSession,
        auth_manager: AuthorizationManager,
    ) -> Self {
        Self {
            connection_parameters,
            transport,
            auth_manager,
        }
    }

    pub fn connection_parameters(&self) -> &ConnectionParameters {
        &self.connection_parameters
    }

    pub fn transport(&self) -> &TransportSession {
        &self.transport
    }

    pub fn auth_manager(&self) -> &AuthorizationManager {
        &self.auth_manager
    }

    /// Only the connection JSON is persisted; sessions and secrets are rebuilt on relaunch.
    pub fn serialize(&self) -> Result<Vec<u8>, ResultError> {
        let persisted = PersistedOnboarding {
            connection: self.connection_parameters.raw_json().to_owned(),
        };
        Ok(serde_json::to_vec(&persisted)?)
    }

    /// Connection parameters from data written by [`OnboardingResult::serialize`].
    pub fn deserialize_connection(data: &[u8]) -> Result<ConnectionParameters, ResultError> {
        let persisted: PersistedOnboarding = serde_json::from_slice(data)?;
        Ok(ConnectionParameters::from_json_str(&persisted.connection)?)
    }
}

/// Passcode entered during login. Kept in memory only.
#[derive(Clone, PartialEq, Eq)]
pub struct LoginResult {
    password: String,
}

impl LoginResult {
    pub fn new(password: impl Into<String>) -> Self {
        Self {
            password: password.into(),
        }
    }

    pub fn password(&self) -> &str {
        &self.password
    }

    pub fn serialize(&self) -> Result<Vec<u8>, ResultError> {
        let persisted = PersistedLogin {
            password: self.password.clone(),
        };
        Ok(serde_json::to_vec(&persisted)?)
    }

    pub fn deserialize(data: &[u8]) -> Result<Self, ResultError> {
        let persisted: PersistedLogin = serde_json::from_slice(data)?;
        Ok(Self::new(persisted.password))
    }
}

impl std::fmt::Debug for LoginResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoginResult")
            .field("password", &"<redacted>")
            .finish()
    }
}
