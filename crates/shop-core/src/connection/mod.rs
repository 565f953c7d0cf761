mod discovery;
mod error;
mod loader;
mod parameters;
mod provider;

pub use discovery::{DiscoveryServiceProvider, EMAIL_ADDRESS_KEY};
pub use error::ConfigurationError;
pub use loader::{ConfigurationLoader, InputRequest, LoadOutcome, ProviderInputs};
pub use parameters::ConnectionParameters;
pub use provider::{
    ConfigurationProvider, FileConfigurationProvider, InvalidProvider, ManagedConfigurationProvider,
    ProviderKind, ProviderOutcome, ProviderSelection, QrCodeConfigurationProvider,
    MANAGED_ENV_PREFIX, QR_CODE_JSON_KEY,
};
