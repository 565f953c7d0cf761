mod error;
mod launch;
mod login;
mod onboarding;
mod result;

pub use error::{FailureKind, OnboardingError};
pub use launch::{AppLaunchManager, Launch};
pub use login::{LoginFlow, LoginInteraction, LoginState};
pub use onboarding::{OnboardingFlow, OnboardingInteraction, OnboardingState, WelcomeChoice};
pub use result::{LoginResult, OnboardingResult, ResultError, CONNECTION_KEY, PASSWORD_KEY};
