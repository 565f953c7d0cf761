use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, warn};
use url::Url;

use super::{
    ConfigurationError, ConfigurationProvider, ConnectionParameters, ProviderKind,
    ProviderOutcome,
};

/// Input key carrying the user's e-mail address.
pub const EMAIL_ADDRESS_KEY: &str = "emailAddress";

const CONFIGURATION_PATH: &str = "config-api.svc/ApplicationConfigurations/getApplicationConfiguration";
const USER_AGENT: &str = "shop-rs/0.1.0";

/// Resolves a user's e-mail address to connection JSON via the discovery service.
#[derive(Debug, Clone)]
pub struct DiscoveryServiceProvider {
    http: Client,
    base_url: Url,
    app_config_id: String,
    timeout: Duration,
}

impl DiscoveryServiceProvider {
    pub fn new(
        base_url: Url,
        app_config_id: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ConfigurationError> {
        let http = Client::builder().user_agent(USER_AGENT).build()?;
        Ok(Self {
            http,
            base_url,
            app_config_id: app_config_id.into(),
            timeout,
        })
    }

    fn lookup_url(&self, email: &str) -> Result<Url, ConfigurationError> {
        let mut base = self.base_url.clone();
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let mut url = base
            .join(CONFIGURATION_PATH)
            .map_err(|_| ConfigurationError::InvalidUrl {
                field: "discoveryUrl",
                value: self.base_url.to_string(),
            })?;
        url.query_pairs_mut()
            .append_pair("AppConfigID", &self.app_config_id)
            .append_pair("EmailAddress", email);
        Ok(url)
    }

    async fn fetch(&self, email: &str) -> Result<ConnectionParameters, ConfigurationError> {
        let url = self.lookup_url(email)?;
        debug!(%url, "querying discovery service");
        let response = self.http.get(url).timeout(self.timeout).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ConfigurationError::DiscoveryStatus { status });
        }

        let body = response.text().await?;
        ConnectionParameters::from_json_str(&body)
    }
}

#[async_trait]
impl ConfigurationProvider for DiscoveryServiceProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::DiscoveryService
    }

    async fn provide(&self, input: Option<&BTreeMap<String, String>>) -> ProviderOutcome {
        let Some(email) = input
            .and_then(|values| values.get(EMAIL_ADDRESS_KEY))
            .map(|email| email.trim())
            .filter(|email| !email.is_empty())
        else {
            return ProviderOutcome::NeedsInput(vec![EMAIL_ADDRESS_KEY]);
        };

        match self.fetch(email).await {
            Ok(parameters) => ProviderOutcome::Configured(parameters),
            Err(err) => {
                warn!(error = %err, "discovery service lookup failed");
                ProviderOutcome::Failed(err)
            }
        }
    }
}
