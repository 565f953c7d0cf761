use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use url::Url;

use super::ConfigurationError;

/// Validated backend configuration for one onboarding or login session.
///
/// Only constructible by parsing connection JSON, so holding a value means the
/// ids are non-empty and all four URLs are absolute.
#[derive(Debug, Clone)]
pub struct ConnectionParameters {
    app_id: String,
    client_id: String,
    server_url: Url,
    authorization_url: Url,
    redirect_url: Url,
    token_url: Url,
    raw_json: String,
}

/// Wire shape of the connection configuration document.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConnectionDocument {
    app_id: Option<String>,
    client_id: Option<String>,
    server_url: Option<String>,
    auth_url: Option<String>,
    token_url: Option<String>,
    redirect_url: Option<String>,
}

impl ConnectionParameters {
    /// Parse connection JSON, requiring all six keys.
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigurationError> {
        let value: serde_json::Value = serde_json::from_str(raw)?;
        if !value.is_object() {
            return Err(ConfigurationError::NotAnObject);
        }
        let document: ConnectionDocument = serde_json::from_value(value)?;

        Ok(Self {
            app_id: required("appId", document.app_id)?,
            client_id: required("clientId", document.client_id)?,
            server_url: absolute_url("serverUrl", document.server_url)?,
            authorization_url: absolute_url("authUrl", document.auth_url)?,
            redirect_url: absolute_url("redirectUrl", document.redirect_url)?,
            token_url: absolute_url("tokenUrl", document.token_url)?,
            raw_json: raw.to_owned(),
        })
    }

    /// Build parameters from a flat key/value map such as a managed (MDM) profile.
    pub fn from_flat_map(values: &BTreeMap<String, String>) -> Result<Self, ConfigurationError> {
        let raw = serde_json::to_string(values)?;
        Self::from_json_str(&raw)
    }

    /// Canonical connection JSON containing exactly the six configuration keys.
    pub fn to_json(&self) -> String {
        let document = ConnectionDocument {
            app_id: Some(self.app_id.clone()),
            client_id: Some(self.client_id.clone()),
            server_url: Some(self.server_url.to_string()),
            auth_url: Some(self.authorization_url.to_string()),
            token_url: Some(self.token_url.to_string()),
            redirect_url: Some(self.redirect_url.to_string()),
        };
        serde_json::to_string(&document).unwrap_or_default()
    }

    pub fn app_id(&self) -> &str {
        &self.app_id
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn server_url(&self) -> &Url {
        &self.server_url
    }

    pub fn authorization_url(&self) -> &Url {
        &self.authorization_url
    }

    pub fn redirect_url(&self) -> &Url {
        &self.redirect_url
    }

    pub fn token_url(&self) -> &Url {
        &self.token_url
    }

    /// The JSON text these parameters were parsed from.
    pub fn raw_json(&self) -> &str {
        &self.raw_json
    }
}

impl PartialEq for ConnectionParameters {
    fn eq(&self, other: &Self) -> bool {
        self.app_id == other.app_id
            && self.client_id == other.client_id
            && self.server_url == other.server_url
            && self.authorization_url == other.authorization_url
            && self.redirect_url == other.redirect_url
            && self.token_url == other.token_url
    }
}

impl Eq for ConnectionParameters {}

fn required(field: &'static str, value: Option<String>) -> Result<String, ConfigurationError> {
    let value = value.ok_or(ConfigurationError::MissingField(field))?;
    if value.trim().is_empty() {
        return Err(ConfigurationError::EmptyField(field));
    }
    Ok(value)
}

fn absolute_url(field: &'static str, value: Option<String>) -> Result<Url, ConfigurationError> {
    let value = required(field, value)?;
    match Url::parse(value.trim()) {
        Ok(url) if !url.cannot_be_a_base() => Ok(url),
        _ => Err(ConfigurationError::InvalidUrl { field, value }),
    }
}
