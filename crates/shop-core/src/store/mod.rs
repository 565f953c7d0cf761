mod authorization;
mod crypto;
mod error;
mod secure_store;

pub use authorization::{
    AuthorizationManager, NoWebSessionCache, PasscodeInputMode, WebSessionCache, TOKEN_STORE_KEY,
};
pub use crypto::{Envelope, ENVELOPE_VERSION};
pub use error::StoreError;
pub use secure_store::SecureStore;
