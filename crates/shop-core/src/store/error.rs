use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("passcode does not unlock the secure store")]
    AuthenticationFailed,
    #[error("secure store has not been provisioned")]
    NotProvisioned,
    #[error("secure store is closed")]
    Closed,
    #[error("unsupported secure store version {0}")]
    UnsupportedVersion(u32),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("malformed secure store encoding: {0}")]
    Encoding(#[from] base64::DecodeError),
    #[error("cipher failure: {0}")]
    Crypto(String),
}
