use thiserror::Error;

use crate::auth::AuthError;
use crate::connection::ConfigurationError;
use crate::persistence::PersistenceError;
use crate::policy::PolicyError;
use crate::store::StoreError;

/// Single error reported by a failed onboarding or launch step.
#[derive(Debug, Error)]
pub enum OnboardingError {
    #[error("configuration could not be loaded: {0}")]
    Configuration(#[from] ConfigurationError),
    #[error("authentication failed: {0}")]
    AuthenticationFailed(#[source] AuthError),
    #[error(transparent)]
    PolicyLoadFailed(#[from] PolicyError),
    #[error("secure store error: {0}")]
    Store(#[from] StoreError),
    #[error("launch bookkeeping error: {0}")]
    Persistence(#[from] PersistenceError),
    #[error("onboarding aborted for demo mode")]
    AbortedForDemoMode,
    #[error("onboarding cancelled by the user")]
    Cancelled,
    #[error("internal error: {0}")]
    Internal(String),
}

/// Coarse failure classification carried by the `Failed` flow state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Configuration,
    Authentication,
    Policy,
    Store,
    Persistence,
    Cancelled,
    Internal,
}

impl OnboardingError {
    pub fn kind(&self) -> FailureKind {
        match self {
            OnboardingError::Configuration(_) => FailureKind::Configuration,
            OnboardingError::AuthenticationFailed(_) => FailureKind::Authentication,
            OnboardingError::PolicyLoadFailed(_) => FailureKind::Policy,
            OnboardingError::Store(_) => FailureKind::Store,
            OnboardingError::Persistence(_) => FailureKind::Persistence,
            OnboardingError::AbortedForDemoMode | OnboardingError::Cancelled => {
                FailureKind::Cancelled
            }
            OnboardingError::Internal(_) => FailureKind::Internal,
        }
    }
}

/// Debug builds stop at a broken invariant; release builds report it as `Internal`.
pub(crate) fn ensure(condition: bool, message: &str) -> Result<(), OnboardingError> {
    debug_assert!(condition, "{message}");
    if condition {
        Ok(())
    } else {
        Err(OnboardingError::Internal(message.to_owned()))
    }
}
