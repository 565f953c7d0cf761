use async_trait::async_trait;
use tracing::{debug, info};

use crate::connection::ConnectionParameters;
use crate::store::{AuthorizationManager, PasscodeInputMode};

use super::LoginResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginState {
    AwaitingPasscode,
    Complete,
    Aborted,
}

#[async_trait]
pub trait LoginInteraction: Send + Sync {
    /// Passcode for the given attempt (starting at 1), or `None` to abort.
    async fn request_passcode(&self, attempt: u32) -> Option<String>;

    async fn passcode_rejected(&self, _attempt: u32) {}
}

/// Unlocks the secure store of an already onboarded app with the user's passcode.
#[derive(Debug)]
pub struct LoginFlow {
    connection: ConnectionParameters,
    auth_manager: AuthorizationManager,
    state: LoginState,
}

impl LoginFlow {
    pub fn new(connection: ConnectionParameters, auth_manager: AuthorizationManager) -> Self {
        Self {
            connection,
            auth_manager,
            state: LoginState::AwaitingPasscode,
        }
    }

    pub fn state(&self) -> LoginState {
        self.state
    }

    pub fn connection_parameters(&self) -> &ConnectionParameters {
        &self.connection
    }

    pub fn auth_manager(&self) -> &AuthorizationManager {
        &self.auth_manager
    }

    /// Check `passcode` against the store. A wrong passcode keeps the flow waiting.
    pub async fn try_passcode(&mut self, passcode: &str) -> Option<LoginResult> {
        if self.state != LoginState::AwaitingPasscode {
            debug!(state = ?self.state, "login flow no longer accepts passcodes");
            return None;
        }

        let unlocked = self
            .auth_manager
            .validate_passcode(
                passcode,
                PasscodeInputMode::Match,
                self.connection.server_url(),
            )
            .await;
        if !unlocked {
            return None;
        }

        self.state = LoginState::Complete;
        info!(app_id = self.connection.app_id(), "login complete");
        Some(LoginResult::new(passcode))
    }

    pub fn abort(&mut self) {
        if self.state == LoginState::AwaitingPasscode {
            self.state = LoginState::Aborted;
        }
    }

    /// Prompt until the store unlocks or the user gives up.
    pub async fn run(&mut self, interaction: &dyn LoginInteraction) -> Option<LoginResult> {
        let mut attempt = 1;
        while self.state == LoginState::AwaitingPasscode {
            let Some(passcode) = interaction.request_passcode(attempt).await else {
                self.abort();
                break;
            };
            if let Some(result) = self.try_passcode(&passcode).await {
                return Some(result);
            }
            interaction.passcode_rejected(attempt).await;
            attempt += 1;
        }
        None
    }

    /// Run the flow and hand the outcome to `completion` exactly once.
    pub async fn start_login<F>(&mut self, interaction: &dyn LoginInteraction, completion: F)
    where
        F: FnOnce(Option<LoginResult>) + Send,
    {
        let outcome = self.run(interaction).await;
        completion(outcome);
    }
}
