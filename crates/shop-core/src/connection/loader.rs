use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use tracing::{debug, info, warn};

use crate::config::FlowSettings;

use super::{
    ConfigurationError, ConfigurationProvider, ConnectionParameters, DiscoveryServiceProvider,
    FileConfigurationProvider, ManagedConfigurationProvider, ProviderKind, ProviderOutcome,
    ProviderSelection, QrCodeConfigurationProvider,
};

/// User supplied values keyed by provider identifier, e.g.
/// `{ "<qrProviderId>": { "rawJson": "<scanned-json>" } }`.
#[derive(Debug, Clone, Default)]
pub struct ProviderInputs {
    values: BTreeMap<String, BTreeMap<String, String>>,
    declined: BTreeSet<ProviderKind>,
}

impl ProviderInputs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(values: BTreeMap<String, BTreeMap<String, String>>) -> Self {
        Self {
            values,
            declined: BTreeSet::new(),
        }
    }

    pub fn insert(&mut self, kind: ProviderKind, values: BTreeMap<String, String>) {
        self.values.insert(kind.identifier().to_owned(), values);
    }

    /// Record that the user dismissed the input prompt for `kind`; the loader skips it.
    pub fn decline(&mut self, kind: ProviderKind) {
        self.declined.insert(kind);
    }

    pub fn is_declined(&self, kind: ProviderKind) -> bool {
        self.declined.contains(&kind)
    }

    pub fn for_provider(&self, identifier: &str) -> Option<&BTreeMap<String, String>> {
        self.values.get(identifier)
    }
}

/// A provider is waiting for the UI to collect `keys`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputRequest {
    pub provider: ProviderKind,
    pub keys: Vec<&'static str>,
}

#[derive(Debug)]
pub enum LoadOutcome {
    Loaded {
        provider: ProviderKind,
        parameters: ConnectionParameters,
    },
    InputRequired(InputRequest),
}

/// Tries configuration providers in priority order until one succeeds.
pub struct ConfigurationLoader {
    providers: Vec<Box<dyn ConfigurationProvider>>,
}

impl ConfigurationLoader {
    pub fn new(mut providers: Vec<Box<dyn ConfigurationProvider>>) -> Self {
        providers.sort_by_key(|provider| provider.kind());
        Self { providers }
    }

    /// Loader with the built-in providers named by `selection`.
    pub fn with_selection(
        selection: ProviderSelection,
        configuration_file: PathBuf,
        settings: &FlowSettings,
    ) -> Result<Self, ConfigurationError> {
        let mut providers: Vec<Box<dyn ConfigurationProvider>> = Vec::new();
        for kind in selection.kinds() {
            let provider: Box<dyn ConfigurationProvider> = match kind {
                ProviderKind::Managed => Box::new(ManagedConfigurationProvider::from_env()),
                ProviderKind::File => {
                    Box::new(FileConfigurationProvider::new(configuration_file.clone()))
                }
                ProviderKind::DiscoveryService => Box::new(DiscoveryServiceProvider::new(
                    settings.discovery_url.clone(),
                    settings.app_config_id.clone(),
                    settings.network_timeout,
                )?),
                ProviderKind::QrCode => Box::new(QrCodeConfigurationProvider),
            };
            providers.push(provider);
        }
        Ok(Self::new(providers))
    }

    pub fn provider_kinds(&self) -> Vec<ProviderKind> {
        self.providers.iter().map(|provider| provider.kind()).collect()
    }

    /// Walk the providers once with the inputs gathered so far.
    pub async fn load(&self, inputs: &ProviderInputs) -> Result<LoadOutcome, ConfigurationError> {
        for provider in &self.providers {
            let kind = provider.kind();
            if inputs.is_declined(kind) {
                debug!(provider = %kind, "provider declined by user, skipping");
                continue;
            }

            let input = inputs.for_provider(provider.identifier());
            match provider.provide(input).await {
                ProviderOutcome::Configured(parameters) => {
                    info!(provider = %kind, app_id = parameters.app_id(), "connection configuration loaded");
                    return Ok(LoadOutcome::Loaded {
                        provider: kind,
                        parameters,
                    });
                }
                ProviderOutcome::NeedsInput(keys) if input.is_none() => {
                    debug!(provider = %kind, ?keys, "provider requested input");
                    return Ok(LoadOutcome::InputRequired(InputRequest {
                        provider: kind,
                        keys,
                    }));
                }
                ProviderOutcome::NeedsInput(_) => {
                    warn!(
                        provider = %kind,
                        error = %ConfigurationError::InputLoop(kind.identifier()),
                        "falling through to next provider"
                    );
                }
                ProviderOutcome::NotApplicable => {
                    debug!(provider = %kind, "provider not applicable");
                }
                ProviderOutcome::Failed(err) => {
                    warn!(provider = %kind, error = %err, "configuration provider failed");
                }
            }
        }

        Err(ConfigurationError::NoProviderSucceeded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::QR_CODE_JSON_KEY;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const SAMPLE: &str = r#"{"appId":"a1","clientId":"c1","serverUrl":"https://x/","authUrl":"https://x/auth","tokenUrl":"https://x/token","redirectUrl":"https://x/cb"}"#;
    const NO_APP_ID: &str = r#"{"clientId":"c1","serverUrl":"https://x/","authUrl":"https://x/auth","tokenUrl":"https://x/token","redirectUrl":"https://x/cb"}"#;

    fn file_with(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[tokio::test]
    async fn providers_run_in_priority_order() {
        let file = file_with(SAMPLE);
        let loader = ConfigurationLoader::new(vec![
            Box::new(QrCodeConfigurationProvider),
            Box::new(FileConfigurationProvider::new(file.path())),
        ]);
        assert_eq!(
            loader.provider_kinds(),
            vec![ProviderKind::File, ProviderKind::QrCode]
        );

        match loader.load(&ProviderInputs::new()).await.unwrap() {
            LoadOutcome::Loaded { provider, .. } => assert_eq!(provider, ProviderKind::File),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn malformed_file_falls_through_to_qr_prompt() {
        let file = file_with(NO_APP_ID);
        let loader = ConfigurationLoader::new(vec![
            Box::new(FileConfigurationProvider::new(file.path())),
            Box::new(QrCodeConfigurationProvider),
        ]);

        let outcome = loader.load(&ProviderInputs::new()).await.unwrap();
        let LoadOutcome::InputRequired(request) = outcome else {
            panic!("expected an input request");
        };
        assert_eq!(request.provider, ProviderKind::QrCode);

        let mut inputs = ProviderInputs::new();
        inputs.insert(
            ProviderKind::QrCode,
            [(QR_CODE_JSON_KEY.to_owned(), SAMPLE.to_owned())].into(),
        );
        match loader.load(&inputs).await.unwrap() {
            LoadOutcome::Loaded {
                provider,
                parameters,
            } => {
                assert_eq!(provider, ProviderKind::QrCode);
                assert_eq!(parameters.app_id(), "a1");
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_app_id_never_yields_parameters() {
        let file = file_with(NO_APP_ID);
        let loader =
            ConfigurationLoader::new(vec![Box::new(FileConfigurationProvider::new(file.path()))]);
        let err = loader.load(&ProviderInputs::new()).await.unwrap_err();
        assert!(matches!(err, ConfigurationError::NoProviderSucceeded));
    }

    #[tokio::test]
    async fn declined_and_bad_input_exhaust_the_loader() {
        let loader = ConfigurationLoader::new(vec![Box::new(QrCodeConfigurationProvider)]);

        let mut declined = ProviderInputs::new();
        declined.decline(ProviderKind::QrCode);
        assert!(loader.load(&declined).await.is_err());

        let mut garbage = ProviderInputs::new();
        garbage.insert(
            ProviderKind::QrCode,
            [(QR_CODE_JSON_KEY.to_owned(), "not json".to_owned())].into(),
        );
        assert!(matches!(
            loader.load(&garbage).await.unwrap_err(),
            ConfigurationError::NoProviderSucceeded
        ));
    }

    #[test]
    fn selection_builds_matching_providers() {
        let loader = ConfigurationLoader::with_selection(
            ProviderSelection::QR_CODE | ProviderSelection::FILE,
            PathBuf::from("/tmp/does-not-matter.json"),
            &FlowSettings::default(),
        )
        .unwrap();
        assert_eq!(
            loader.provider_kinds(),
            vec![ProviderKind::File, ProviderKind::QrCode]
        );
    }
}
