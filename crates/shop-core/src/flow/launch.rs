use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::auth::{Authenticator, TransportSession};
use crate::config::{ConfigLocator, FlowSettings};
use crate::connection::ConfigurationLoader;
use crate::persistence::{FilePersistence, PersistenceManager};
use crate::policy::PolicySource;
use crate::store::{AuthorizationManager, SecureStore};

use super::error::ensure;
use super::{LoginFlow, LoginState, OnboardingError, OnboardingFlow, OnboardingResult};

/// What the app has to show on start.
#[derive(Debug)]
pub enum Launch {
    Onboarding,
    Login(LoginFlow),
}

/// Decides between onboarding and login, and owns logout, disconnect and the
/// background lock.
#[derive(Debug, Clone)]
pub struct AppLaunchManager {
    auth_manager: AuthorizationManager,
    persistence: PersistenceManager,
    settings: FlowSettings,
}

impl AppLaunchManager {
    pub fn new(
        auth_manager: AuthorizationManager,
        persistence: PersistenceManager,
        settings: FlowSettings,
    ) -> Self {
        Self {
            auth_manager,
            persistence,
            settings,
        }
    }

    /// Secure store and preferences under the locator's directories.
    pub fn from_locator(locator: &ConfigLocator, settings: FlowSettings) -> Self {
        let store = SecureStore::new(locator.secure_store_file(), settings.kdf_rounds);
        let persistence = FilePersistence::new(locator.persistence_dir());
        Self::new(
            AuthorizationManager::new(store),
            PersistenceManager::new(Arc::new(persistence)),
            settings,
        )
    }

    pub fn auth_manager(&self) -> &AuthorizationManager {
        &self.auth_manager
    }

    pub fn settings(&self) -> &FlowSettings {
        &self.settings
    }

    pub async fn launch(&self) -> Result<Launch, OnboardingError> {
        if !self.persistence.is_onboarded()? {
            debug!("no completed onboarding recorded");
            return Ok(Launch::Onboarding);
        }
        let Some(data) = self.persistence.onboarding_result()? else {
            warn!("onboarding marked done but no result stored");
            return Ok(Launch::Onboarding);
        };
        if !self.auth_manager.is_provisioned().await {
            warn!("onboarding result found without a secure store");
            return Ok(Launch::Onboarding);
        }

        match OnboardingResult::deserialize_connection(&data) {
            Ok(connection) => Ok(Launch::Login(LoginFlow::new(
                connection,
                self.auth_manager.clone(),
            ))),
            Err(err) => {
                warn!(error = %err, "stored onboarding result is unusable");
                Ok(Launch::Onboarding)
            }
        }
    }

    /// Onboarding flow wired to this manager's secure store.
    pub fn onboarding_flow(
        &self,
        loader: ConfigurationLoader,
        authenticator: Arc<dyn Authenticator>,
        policy_source: Arc<dyn PolicySource>,
    ) -> OnboardingFlow {
        OnboardingFlow::new(
            loader,
            authenticator,
            policy_source,
            self.auth_manager.clone(),
        )
    }

    pub fn complete_onboarding(&self, result: &OnboardingResult) -> Result<(), OnboardingError> {
        let data = result
            .serialize()
            .map_err(|err| OnboardingError::Internal(err.to_string()))?;
        self.persistence.store_onboarding_result(&data)?;
        self.persistence.set_onboarded(true)?;
        info!(app_id = result.connection_parameters().app_id(), "onboarding result stored");
        Ok(())
    }

    /// Transport session reading its token from the store unlocked by `login`.
    pub fn complete_login(&self, login: &LoginFlow) -> Result<TransportSession, OnboardingError> {
        ensure(
            login.state() == LoginState::Complete,
            "login must complete before building a session",
        )?;
        TransportSession::new(
            login.connection_parameters(),
            Arc::new(self.auth_manager.clone()),
            self.settings.network_timeout,
        )
        .map_err(OnboardingError::AuthenticationFailed)
    }

    /// Lock the store; data survives for the next login.
    pub async fn logout(&self) -> Result<(), OnboardingError> {
        self.auth_manager.close_store().await;
        self.persistence.set_background_date(None)?;
        info!("logged out");
        Ok(())
    }

    /// Destroy the store and forget the onboarding.
    pub async fn disconnect(&self) -> Result<(), OnboardingError> {
        self.auth_manager.reset_store().await;
        self.persistence.clear()?;
        info!("disconnected; onboarding required on next launch");
        Ok(())
    }

    pub fn did_enter_background(&self, now: DateTime<Utc>) -> Result<(), OnboardingError> {
        self.persistence.set_background_date(Some(now))?;
        Ok(())
    }

    pub fn requires_unlock(&self, now: DateTime<Utc>) -> Result<bool, OnboardingError> {
        let Some(since) = self.persistence.background_date()? else {
            return Ok(false);
        };
        let away = (now - since).to_std().unwrap_or_default();
        Ok(away >= self.settings.lock_timeout)
    }

    /// Close the store when the app stayed in the background past the lock timeout.
    pub async fn will_enter_foreground(&self, now: DateTime<Utc>) -> Result<bool, OnboardingError> {
        let locked = self.requires_unlock(now)?;
        if locked {
            debug!("lock timeout elapsed; closing secure store");
            self.auth_manager.close_store().await;
        }
        self.persistence.set_background_date(None)?;
        Ok(locked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::QrCodeConfigurationProvider;
    use crate::flow::onboarding::tests::{FixedAuthenticator, FixedPolicy, ScriptedUser};
    use crate::flow::LoginResult;
    use crate::persistence::MemoryPersistence;
    use chrono::Duration;
    use std::time::Duration as StdDuration;
    use tempfile::TempDir;

    fn launcher(dir: &TempDir) -> AppLaunchManager {
        let settings = FlowSettings {
            kdf_rounds: 16,
            lock_timeout: StdDuration::from_secs(300),
            ..FlowSettings::default()
        };
        AppLaunchManager::from_locator(&ConfigLocator::with_root(dir.path()).unwrap(), settings)
    }

    async fn onboard(launcher: &AppLaunchManager) -> OnboardingResult {
        let mut flow = launcher.onboarding_flow(
            ConfigurationLoader::new(vec![Box::new(QrCodeConfigurationProvider)]),
            Arc::new(FixedAuthenticator { fail: false }),
            Arc::new(FixedPolicy { fail: false }),
        );
        let result = flow.run(&ScriptedUser::new(&["1234"])).await.unwrap();
        launcher.complete_onboarding(&result).unwrap();
        result
    }

    #[tokio::test]
    async fn relaunch_goes_to_login_and_unlocks_with_passcode() {
        let dir = TempDir::new().unwrap();
        onboard(&launcher(&dir)).await;

        let relaunched = launcher(&dir);
        let Launch::Login(mut login) = relaunched.launch().await.unwrap() else {
            panic!("expected login after onboarding");
        };
        assert_eq!(login.connection_parameters().app_id(), "a1");

        assert!(login.try_passcode("9999").await.is_none());
        assert!(!relaunched.auth_manager().is_authenticated_successful().await);

        let result = login.try_passcode("1234").await;
        assert_eq!(result, Some(LoginResult::new("1234")));
        let transport = relaunched.complete_login(&login).unwrap();
        assert_eq!(transport.current_token().await.unwrap().access_token, "T");
    }

    #[tokio::test]
    async fn fresh_install_needs_onboarding() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            launcher(&dir).launch().await.unwrap(),
            Launch::Onboarding
        ));
    }

    #[tokio::test]
    async fn disconnect_forces_onboarding_and_destroys_store() {
        let dir = TempDir::new().unwrap();
        let launcher = launcher(&dir);
        let result = onboard(&launcher).await;

        launcher.disconnect().await.unwrap();
        assert!(matches!(launcher.launch().await.unwrap(), Launch::Onboarding));
        assert!(result.auth_manager().read_token().await.is_none());
        assert!(!result.auth_manager().open_secure_store("1234").await);
    }

    #[tokio::test]
    async fn logout_keeps_data_for_next_login() {
        let dir = TempDir::new().unwrap();
        let launcher = launcher(&dir);
        onboard(&launcher).await;

        launcher.logout().await.unwrap();
        assert!(!launcher.auth_manager().is_authenticated_successful().await);
        let Launch::Login(mut login) = launcher.launch().await.unwrap() else {
            panic!("expected login after logout");
        };
        assert!(login.try_passcode("1234").await.is_some());
    }

    #[tokio::test]
    async fn background_lock_honours_timeout() {
        let auth_manager = AuthorizationManager::new(SecureStore::new(
            TempDir::new().unwrap().path().join("store.json"),
            16,
        ));
        let launcher = AppLaunchManager::new(
            auth_manager,
            PersistenceManager::new(Arc::new(MemoryPersistence::default())),
            FlowSettings {
                lock_timeout: StdDuration::from_secs(60),
                ..FlowSettings::default()
            },
        );
        let left = Utc::now();
        assert!(!launcher.requires_unlock(left).unwrap());

        launcher.did_enter_background(left).unwrap();
        assert!(!launcher.requires_unlock(left + Duration::seconds(30)).unwrap());
        assert!(launcher.requires_unlock(left + Duration::seconds(61)).unwrap());

        assert!(launcher
            .will_enter_foreground(left + Duration::seconds(61))
            .await
            .unwrap());
        assert!(!launcher.requires_unlock(left + Duration::hours(1)).unwrap());
    }
}
