use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::auth::{AuthenticatedSession, Authenticator};
use crate::connection::{
    ConfigurationLoader, ConnectionParameters, InputRequest, LoadOutcome, ProviderInputs,
};
use crate::policy::{PasscodePolicy, PolicySource, PolicyViolation};
use crate::store::AuthorizationManager;

use super::error::{ensure, FailureKind};
use super::{OnboardingError, OnboardingResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnboardingState {
    Welcome,
    ConfigurationDiscovery,
    OAuthAuthorization,
    PasscodePolicyFetch,
    PasscodeCreation,
    Complete,
    DemoModeAborted,
    Failed(FailureKind),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WelcomeChoice {
    Continue,
    DemoMode,
}

/// The user-facing side of onboarding: prompts, input collection and progress.
#[async_trait]
pub trait OnboardingInteraction: Send + Sync {
    async fn welcome(&self) -> WelcomeChoice;

    /// Values for `request.keys`, or `None` when the user skips this provider.
    async fn provide_input(&self, request: &InputRequest) -> Option<BTreeMap<String, String>>;

    /// New passcode, or `None` to cancel onboarding.
    async fn create_passcode(&self, policy: &PasscodePolicy) -> Option<String>;

    async fn passcode_rejected(&self, _violation: PolicyViolation) {}

    async fn state_changed(&self, _state: OnboardingState) {}
}

/// Welcome, configuration discovery, OAuth, policy fetch and passcode creation,
/// run once in order.
pub struct OnboardingFlow {
    loader: ConfigurationLoader,
    authenticator: Arc<dyn Authenticator>,
    policy_source: Arc<dyn PolicySource>,
    auth_manager: AuthorizationManager,
    state: OnboardingState,
}

impl OnboardingFlow {
    pub fn new(
        loader: ConfigurationLoader,
        authenticator: Arc<dyn Authenticator>,
        policy_source: Arc<dyn PolicySource>,
        auth_manager: AuthorizationManager,
    ) -> Self {
        Self {
            loader,
            authenticator,
            policy_source,
            auth_manager,
            state: OnboardingState::Welcome,
        }
    }

    pub fn state(&self) -> OnboardingState {
        self.state
    }

    /// Run the flow and hand the outcome to `completion` exactly once.
    pub async fn start_onboarding<F>(&mut self, interaction: &dyn OnboardingInteraction, completion: F)
    where
        F: FnOnce(Result<OnboardingResult, OnboardingError>) + Send,
    {
        let outcome = self.run(interaction).await;
        completion(outcome);
    }

    pub async fn run(
        &mut self,
        interaction: &dyn OnboardingInteraction,
    ) -> Result<OnboardingResult, OnboardingError> {
        ensure(
            self.state == OnboardingState::Welcome,
            "onboarding flow can only run once",
        )?;

        match self.run_blocks(interaction).await {
            Ok(result) => {
                self.transition(interaction, OnboardingState::Complete).await;
                info!(app_id = result.connection_parameters().app_id(), "onboarding complete");
                Ok(result)
            }
            Err(OnboardingError::AbortedForDemoMode) => {
                self.transition(interaction, OnboardingState::DemoModeAborted)
                    .await;
                Err(OnboardingError::AbortedForDemoMode)
            }
            Err(err) => {
                warn!(error = %err, state = ?self.state, "onboarding failed");
                self.transition(interaction, OnboardingState::Failed(err.kind()))
                    .await;
                Err(err)
            }
        }
    }

    async fn run_blocks(
        &mut self,
        interaction: &dyn OnboardingInteraction,
    ) -> Result<OnboardingResult, OnboardingError> {
        interaction.state_changed(OnboardingState::Welcome).await;
        if interaction.welcome().await == WelcomeChoice::DemoMode {
            return Err(OnboardingError::AbortedForDemoMode);
        }

        self.transition(interaction, OnboardingState::ConfigurationDiscovery)
            .await;
        let parameters = self.discover_configuration(interaction).await?;
        ensure(
            !parameters.app_id().is_empty() && !parameters.client_id().is_empty(),
            "loaded configuration without app or client id",
        )?;

        self.transition(interaction, OnboardingState::OAuthAuthorization)
            .await;
        let AuthenticatedSession { token, transport } = self
            .authenticator
            .authenticate(&parameters)
            .await
            .map_err(OnboardingError::AuthenticationFailed)?;

        self.transition(interaction, OnboardingState::PasscodePolicyFetch)
            .await;
        let policy = self
            .policy_source
            .fetch_policy(parameters.app_id(), parameters.server_url(), &transport)
            .await?;

        self.transition(interaction, OnboardingState::PasscodeCreation)
            .await;
        let passcode = Self::collect_passcode(interaction, &policy).await?;
        self.auth_manager.stage_token(token).await;
        self.auth_manager.provision(&passcode).await?;

        let transport = transport.with_token_store(Arc::new(self.auth_manager.clone()));
        Ok(OnboardingResult::new(
            parameters,
            transport,
            self.auth_manager.clone(),
        ))
    }

    async fn discover_configuration(
        &self,
        interaction: &dyn OnboardingInteraction,
    ) -> Result<ConnectionParameters, OnboardingError> {
        let mut inputs = ProviderInputs::new();
        let mut asked = BTreeSet::new();
        loop {
            match self.loader.load(&inputs).await? {
                LoadOutcome::Loaded {
                    provider,
                    parameters,
                } => {
                    debug!(%provider, "configuration discovered");
                    return Ok(parameters);
                }
                LoadOutcome::InputRequired(request) => {
                    ensure(
                        asked.insert(request.provider),
                        "provider asked for input twice",
                    )?;
                    match interaction.provide_input(&request).await {
                        Some(values) => inputs.insert(request.provider, values),
                        None => inputs.decline(request.provider),
                    }
                }
            }
        }
    }

    async fn collect_passcode(
        interaction: &dyn OnboardingInteraction,
        policy: &PasscodePolicy,
    ) -> Result<String, OnboardingError> {
        loop {
            let passcode = interaction
                .create_passcode(policy)
                .await
                .ok_or(OnboardingError::Cancelled)?;
            match policy.check(&passcode) {
                Ok(()) => return Ok(passcode),
                Err(violation) => {
                    debug!(%violation, "passcode rejected by policy");
                    interaction.passcode_rejected(violation).await;
                }
            }
        }
    }

    async fn transition(&mut self, interaction: &dyn OnboardingInteraction, next: OnboardingState) {
        debug!(from = ?self.state, to = ?next, "onboarding transition");
        self.state = next;
        interaction.state_changed(next).await;
    }
}
