use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::ops::BitOr;
use std::path::PathBuf;

use async_trait::async_trait;
use tracing::debug;

use super::{ConfigurationError, ConnectionParameters};

/// Input key under which the QR code provider expects the scanned payload.
pub const QR_CODE_JSON_KEY: &str = "rawJson";

/// Environment prefix read by [`ManagedConfigurationProvider::from_env`].
pub const MANAGED_ENV_PREFIX: &str = "SHOP_MANAGED_";

/// Tag carried by every provider. Ordering is the loader's priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ProviderKind {
    Managed,
    File,
    DiscoveryService,
    QrCode,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 4] = [
        ProviderKind::Managed,
        ProviderKind::File,
        ProviderKind::DiscoveryService,
        ProviderKind::QrCode,
    ];

    /// Stable identifier used as the outer key of provider inputs.
    pub fn identifier(self) -> &'static str {
        match self {
            ProviderKind::Managed => "shop.onboarding.configuration.provider.managed",
            ProviderKind::File => "shop.onboarding.configuration.provider.file",
            ProviderKind::DiscoveryService => {
                "shop.onboarding.configuration.provider.discoveryservice"
            }
            ProviderKind::QrCode => "shop.onboarding.configuration.provider.qrcode",
        }
    }

    fn bit(self) -> u8 {
        match self {
            ProviderKind::Managed => 1,
            ProviderKind::File => 2,
            ProviderKind::DiscoveryService => 4,
            ProviderKind::QrCode => 8,
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let value = match self {
            ProviderKind::Managed => "managed",
            ProviderKind::File => "file",
            ProviderKind::DiscoveryService => "discovery-service",
            ProviderKind::QrCode => "qr-code",
        };
        write!(f, "{value}")
    }
}

/// Set of providers enabled for a configuration load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProviderSelection(u8);

impl ProviderSelection {
    pub const MANAGED: Self = Self(1);
    pub const FILE: Self = Self(2);
    pub const DISCOVERY_SERVICE: Self = Self(4);
    pub const QR_CODE: Self = Self(8);

    pub fn empty() -> Self {
        Self(0)
    }

    pub fn contains(self, kind: ProviderKind) -> bool {
        self.0 & kind.bit() != 0
    }

    pub fn with(self, kind: ProviderKind) -> Self {
        Self(self.0 | kind.bit())
    }

    pub fn kinds(self) -> impl Iterator<Item = ProviderKind> {
        ProviderKind::ALL
            .into_iter()
            .filter(move |kind| self.contains(*kind))
    }
}

impl Default for ProviderSelection {
    fn default() -> Self {
        Self::MANAGED | Self::FILE
    }
}

impl BitOr for ProviderSelection {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl std::str::FromStr for ProviderSelection {
    type Err = InvalidProvider;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut selection = Self::empty();
        for item in s.split(',').map(str::trim).filter(|item| !item.is_empty()) {
            let kind = match item.to_ascii_lowercase().as_str() {
                "managed" | "mdm" => ProviderKind::Managed,
                "file" => ProviderKind::File,
                "discovery" | "discovery-service" | "email" => ProviderKind::DiscoveryService,
                "qr" | "qrcode" | "qr-code" => ProviderKind::QrCode,
                other => return Err(InvalidProvider(other.to_owned())),
            };
            selection = selection.with(kind);
        }
        Ok(selection)
    }
}

/// Error reported when parsing an unknown provider name.
#[derive(Debug, thiserror::Error)]
#[error("invalid configuration provider '{0}'")]
pub struct InvalidProvider(pub String);

/// What a provider made of its turn.
#[derive(Debug)]
pub enum ProviderOutcome {
    Configured(ConnectionParameters),
    NeedsInput(Vec<&'static str>),
    NotApplicable,
    Failed(ConfigurationError),
}

impl From<Result<ConnectionParameters, ConfigurationError>> for ProviderOutcome {
    fn from(result: Result<ConnectionParameters, ConfigurationError>) -> Self {
        match result {
            Ok(parameters) => ProviderOutcome::Configured(parameters),
            Err(err) => ProviderOutcome::Failed(err),
        }
    }
}

/// A source of connection parameters.
#[async_trait]
pub trait ConfigurationProvider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    fn identifier(&self) -> &'static str {
        self.kind().identifier()
    }

    /// `input` holds the values the user supplied for this provider, if any.
    async fn provide(&self, input: Option<&BTreeMap<String, String>>) -> ProviderOutcome;
}

/// Pre-provisioned configuration, e.g. pushed by device management.
#[derive(Debug, Clone, Default)]
pub struct ManagedConfigurationProvider {
    values: BTreeMap<String, String>,
}

impl ManagedConfigurationProvider {
    pub fn new(values: BTreeMap<String, String>) -> Self {
        Self { values }
    }

    /// Collect `SHOP_MANAGED_APP_ID`-style variables into connection keys (`appId`).
    pub fn from_env() -> Self {
        let values = env::vars()
            .filter_map(|(name, value)| {
                name.strip_prefix(MANAGED_ENV_PREFIX)
                    .map(|suffix| (camel_case(suffix), value))
            })
            .collect();
        Self { values }
    }
}

#[async_trait]
impl ConfigurationProvider for ManagedConfigurationProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Managed
    }

    async fn provide(&self, _input: Option<&BTreeMap<String, String>>) -> ProviderOutcome {
        if self.values.is_empty() {
            return ProviderOutcome::NotApplicable;
        }
        ConnectionParameters::from_flat_map(&self.values).into()
    }
}

fn camel_case(snake: &str) -> String {
    let mut out = String::with_capacity(snake.len());
    for (index, part) in snake.split('_').filter(|p| !p.is_empty()).enumerate() {
        let lower = part.to_ascii_lowercase();
        if index == 0 {
            out.push_str(&lower);
        } else {
            let mut chars = lower.chars();
            if let Some(first) = chars.next() {
                out.push(first.to_ascii_uppercase());
                out.push_str(chars.as_str());
            }
        }
    }
    out
}

/// Connection JSON shipped as a file next to the app.
#[derive(Debug, Clone)]
pub struct FileConfigurationProvider {
    path: PathBuf,
}

impl FileConfigurationProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl ConfigurationProvider for FileConfigurationProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::File
    }

    async fn provide(&self, _input: Option<&BTreeMap<String, String>>) -> ProviderOutcome {
        if !self.path.exists() {
            debug!(path = %self.path.display(), "no configuration file present");
            return ProviderOutcome::NotApplicable;
        }
        match fs::read_to_string(&self.path) {
            Ok(raw) => ConnectionParameters::from_json_str(&raw).into(),
            Err(source) => ProviderOutcome::Failed(ConfigurationError::ReadFile {
                path: self.path.clone(),
                source,
            }),
        }
    }
}

/// Connection JSON scanned from a QR code by the UI.
#[derive(Debug, Clone, Copy, Default)]
pub struct QrCodeConfigurationProvider;

#[async_trait]
impl ConfigurationProvider for QrCodeConfigurationProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::QrCode
    }

    async fn provide(&self, input: Option<&BTreeMap<String, String>>) -> ProviderOutcome {
        match input.and_then(|values| values.get(QR_CODE_JSON_KEY)) {
            Some(raw) => ConnectionParameters::from_json_str(raw).into(),
            None => ProviderOutcome::NeedsInput(vec![QR_CODE_JSON_KEY]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const SAMPLE: &str = r#"{"appId":"a1","clientId":"c1","serverUrl":"https://x/","authUrl":"https://x/auth","tokenUrl":"https://x/token","redirectUrl":"https://x/cb"}"#;

    #[test]
    fn selection_parsing() {
        let selection: ProviderSelection = "file, qr".parse().unwrap();
        assert!(selection.contains(ProviderKind::File));
        assert!(selection.contains(ProviderKind::QrCode));
        assert!(!selection.contains(ProviderKind::Managed));
        assert_eq!(
            selection.kinds().collect::<Vec<_>>(),
            vec![ProviderKind::File, ProviderKind::QrCode]
        );
        assert!("carrier-pigeon".parse::<ProviderSelection>().is_err());
    }

    #[test]
    fn env_suffixes_become_connection_keys() {
        assert_eq!(camel_case("APP_ID"), "appId");
        assert_eq!(camel_case("REDIRECT_URL"), "redirectUrl");
        assert_eq!(camel_case("SERVER_URL"), "serverUrl");
    }

    #[tokio::test]
    async fn file_provider_reads_json() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        let provider = FileConfigurationProvider::new(file.path());
        match provider.provide(None).await {
            ProviderOutcome::Configured(params) => assert_eq!(params.app_id(), "a1"),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_file_is_not_applicable() {
        let provider = FileConfigurationProvider::new("/definitely/not/here.json");
        assert!(matches!(
            provider.provide(None).await,
            ProviderOutcome::NotApplicable
        ));
    }

    #[tokio::test]
    async fn qr_provider_requests_payload() {
        let provider = QrCodeConfigurationProvider;
        match provider.provide(None).await {
            ProviderOutcome::NeedsInput(keys) => assert_eq!(keys, vec![QR_CODE_JSON_KEY]),
            other => panic!("unexpected outcome: {other:?}"),
        }

        let input: BTreeMap<String, String> =
            [(QR_CODE_JSON_KEY.to_owned(), SAMPLE.to_owned())].into();
        assert!(matches!(
            provider.provide(Some(&input)).await,
            ProviderOutcome::Configured(_)
        ));
    }

    #[tokio::test]
    async fn managed_provider_without_values_is_skipped() {
        let provider = ManagedConfigurationProvider::default();
        assert!(matches!(
            provider.provide(None).await,
            ProviderOutcome::NotApplicable
        ));
    }
}
