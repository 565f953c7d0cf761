use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::auth::{OAuthToken, TokenStore};

use super::{SecureStore, StoreError};

/// Secure store entry holding the serialized OAuth token.
pub const TOKEN_STORE_KEY: &str = "shop.oauth.token";

/// What a passcode entered by the user is supposed to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PasscodeInputMode {
    Create,
    Match,
    Change,
    MatchForChange,
}

/// Cached web-session state (cookies, HTTP caches) cleared when the user disconnects.
#[async_trait]
pub trait WebSessionCache: Send + Sync {
    async fn clear(&self);
}

/// Used when the host keeps no web-session state outside the secure store.
#[derive(Debug, Default)]
pub struct NoWebSessionCache;

#[async_trait]
impl WebSessionCache for NoWebSessionCache {
    async fn clear(&self) {}
}

/// Passcode lifecycle over the secure store. Cloning yields another handle to
/// the same store.
#[derive(Clone)]
pub struct AuthorizationManager {
    store: Arc<Mutex<SecureStore>>,
    pending: Arc<Mutex<Option<OAuthToken>>>,
    web_cache: Arc<dyn WebSessionCache>,
}

impl AuthorizationManager {
    pub fn new(store: SecureStore) -> Self {
        Self {
            store: Arc::new(Mutex::new(store)),
            pending: Arc::new(Mutex::new(None)),
            web_cache: Arc::new(NoWebSessionCache),
        }
    }

    pub fn with_web_cache(self, web_cache: Arc<dyn WebSessionCache>) -> Self {
        Self { web_cache, ..self }
    }

    /// Hold a token obtained before a passcode exists; it is persisted once the store opens.
    pub async fn stage_token(&self, token: OAuthToken) {
        *self.pending.lock().await = Some(token);
    }

    pub async fn is_provisioned(&self) -> bool {
        self.store.lock().await.is_provisioned()
    }

    /// Provision a fresh store keyed by `passcode` and persist the staged token.
    pub async fn provision(&self, passcode: &str) -> Result<(), StoreError> {
        self.store.lock().await.create(passcode)?;
        self.persist_pending_token().await;
        info!("secure store provisioned");
        Ok(())
    }

    /// Unlock the store; `false` on a wrong passcode or any I/O failure.
    pub async fn open_secure_store(&self, passcode: &str) -> bool {
        match self.try_open(passcode).await {
            Ok(()) => true,
            Err(err) => {
                warn!(error = %err, "secure store did not open");
                false
            }
        }
    }

    pub async fn try_open(&self, passcode: &str) -> Result<(), StoreError> {
        self.store.lock().await.open(passcode)
    }

    /// Re-key the open store; a closed store is left untouched.
    pub async fn change_passcode(&self, new_passcode: &str) -> bool {
        let mut store = self.store.lock().await;
        if !store.is_open() {
            debug!("passcode change requested while store is closed");
            return false;
        }
        match store.change_key(new_passcode) {
            Ok(()) => {
                info!("secure store passcode changed");
                true
            }
            Err(err) => {
                error!(error = %err, "secure store re-key failed");
                false
            }
        }
    }

    /// Persist `token`, or remove the stored one for `None`. Ignored while the store is closed.
    pub async fn write_token(&self, token: Option<&OAuthToken>) {
        let mut store = self.store.lock().await;
        if !store.is_open() {
            debug!("token write skipped; secure store is closed");
            return;
        }
        put_token(&mut store, token);
    }

    pub async fn read_token(&self) -> Option<OAuthToken> {
        let store = self.store.lock().await;
        if !store.is_open() {
            return None;
        }
        get_token(&store)
    }

    /// Apply `passcode` according to `mode`. Never logs the passcode itself.
    pub async fn validate_passcode(
        &self,
        passcode: &str,
        mode: PasscodeInputMode,
        server_url: &Url,
    ) -> bool {
        debug!(?mode, server = server_url.host_str(), "validating passcode");
        match mode {
            PasscodeInputMode::Create => match self.provision(passcode).await {
                Ok(()) => true,
                Err(err) => {
                    error!(error = %err, "secure store provisioning failed");
                    false
                }
            },
            PasscodeInputMode::Match => {
                let opened = self.open_secure_store(passcode).await;
                if opened {
                    self.persist_pending_token().await;
                }
                opened
            }
            PasscodeInputMode::MatchForChange => {
                if self.open_secure_store(passcode).await {
                    self.persist_pending_token().await;
                }
                false
            }
            PasscodeInputMode::Change => self.change_passcode(passcode).await,
        }
    }

    async fn persist_pending_token(&self) {
        let pending = self.pending.lock().await.take();
        if let Some(token) = pending {
            self.write_token(Some(&token)).await;
        }
    }

    /// Lock the store without destroying its data.
    pub async fn close_store(&self) {
        self.store.lock().await.close();
    }

    /// Delete the token, clear web-session data and destroy the store.
    pub async fn reset_store(&self) {
        self.write_token(None).await;
        self.pending.lock().await.take();
        self.web_cache.clear().await;
        if let Err(err) = self.store.lock().await.reset() {
            error!(error = %err, "failed to destroy secure store");
        }
        info!("secure store reset");
    }

    pub async fn is_authenticated_successful(&self) -> bool {
        self.store.lock().await.is_open()
    }
}

impl std::fmt::Debug for AuthorizationManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthorizationManager").finish_non_exhaustive()
    }
}

/// While the store is closed the manager holds the token in memory so a
/// transport session can use it before a passcode exists.
#[async_trait]
impl TokenStore for AuthorizationManager {
    async fn store(&self, token: OAuthToken) {
        let mut store = self.store.lock().await;
        if store.is_open() {
            put_token(&mut store, Some(&token));
        } else {
            *self.pending.lock().await = Some(token);
        }
    }

    async fn token(&self) -> Option<OAuthToken> {
        let store = self.store.lock().await;
        if store.is_open() {
            get_token(&store)
        } else {
            self.pending.lock().await.clone()
        }
    }

    async fn delete(&self) {
        self.pending.lock().await.take();
        self.write_token(None).await;
    }
}

fn put_token(store: &mut SecureStore, token: Option<&OAuthToken>) {
    let result = match token {
        Some(token) => token
            .to_json()
            .map_err(StoreError::from)
            .and_then(|json| store.put(TOKEN_STORE_KEY, json)),
        None => store.remove(TOKEN_STORE_KEY),
    };
    if let Err(err) = result {
        error!(error = %err, "failed to write token to secure store");
    }
}

fn get_token(store: &SecureStore) -> Option<OAuthToken> {
    let raw = match store.get(TOKEN_STORE_KEY) {
        Ok(raw) => raw?,
        Err(err) => {
            warn!(error = %err, "failed to read token from secure store");
            return None;
        }
    };
    match OAuthToken::from_json(&raw) {
        Ok(token) => Some(token),
        Err(err) => {
            warn!(error = %err, "stored token is unreadable");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    const ROUNDS: u32 = 16;

    fn manager(dir: &TempDir) -> AuthorizationManager {
        AuthorizationManager::new(SecureStore::new(
            dir.path().join("secure-store.json"),
            ROUNDS,
        ))
    }

    fn server() -> Url {
        Url::parse("https://shop.example.com/").unwrap()
    }

    #[derive(Default)]
    struct CountingCache(AtomicUsize);

    #[async_trait]
    impl WebSessionCache for CountingCache {
        async fn clear(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn create_persists_pending_token_and_keys_store() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir);
        manager.stage_token(OAuthToken::bearer("T")).await;

        assert!(
            manager
                .validate_passcode("1234", PasscodeInputMode::Create, &server())
                .await
        );
        assert!(manager.is_authenticated_successful().await);
        assert_eq!(manager.read_token().await.unwrap().access_token, "T");

        manager.close_store().await;
        assert!(manager.try_open("1234").await.is_ok());
        manager.close_store().await;
        assert!(matches!(
            manager.try_open("4321").await,
            Err(StoreError::AuthenticationFailed)
        ));
        assert!(!manager.is_authenticated_successful().await);
    }

    #[tokio::test]
    async fn reset_removes_token_and_store() {
        let dir = TempDir::new().unwrap();
        let cache = Arc::new(CountingCache::default());
        let manager = manager(&dir).with_web_cache(cache.clone());
        manager.stage_token(OAuthToken::bearer("T")).await;
        manager
            .validate_passcode("1234", PasscodeInputMode::Create, &server())
            .await;

        manager.reset_store().await;
        assert!(manager.read_token().await.is_none());
        assert!(!manager.open_secure_store("1234").await);
        assert!(matches!(
            manager.try_open("1234").await,
            Err(StoreError::NotProvisioned)
        ));
        assert_eq!(cache.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn change_passcode_rekeys_open_store() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir);
        assert!(!manager.change_passcode("5678").await);

        manager
            .validate_passcode("1234", PasscodeInputMode::Create, &server())
            .await;
        assert!(
            manager
                .validate_passcode("5678", PasscodeInputMode::Change, &server())
                .await
        );
        manager.close_store().await;

        assert!(!manager.open_secure_store("1234").await);
        assert!(manager.open_secure_store("5678").await);
    }

    #[tokio::test]
    async fn match_for_change_opens_but_reports_false() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir);
        manager
            .validate_passcode("1234", PasscodeInputMode::Create, &server())
            .await;
        manager.close_store().await;

        assert!(
            !manager
                .validate_passcode("1234", PasscodeInputMode::MatchForChange, &server())
                .await
        );
        assert!(manager.is_authenticated_successful().await);
    }

    #[tokio::test]
    async fn match_mode_rejects_wrong_passcode() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir);
        manager
            .validate_passcode("1234", PasscodeInputMode::Create, &server())
            .await;
        manager.close_store().await;

        assert!(
            !manager
                .validate_passcode("9999", PasscodeInputMode::Match, &server())
                .await
        );
        assert!(!manager.is_authenticated_successful().await);
        assert!(
            manager
                .validate_passcode("1234", PasscodeInputMode::Match, &server())
                .await
        );
    }

    #[tokio::test]
    async fn token_store_holds_token_until_store_opens() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir);
        manager.store(OAuthToken::bearer("early")).await;
        assert_eq!(manager.token().await.unwrap().access_token, "early");

        manager
            .validate_passcode("1234", PasscodeInputMode::Create, &server())
            .await;
        manager.store(OAuthToken::bearer("refreshed")).await;
        manager.close_store().await;
        assert!(manager.token().await.is_none());

        manager.open_secure_store("1234").await;
        assert_eq!(manager.token().await.unwrap().access_token, "refreshed");
    }

    #[tokio::test]
    async fn refreshed_token_is_staged_while_closed_and_written_once_open() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir);
        manager
            .validate_passcode("1234", PasscodeInputMode::Create, &server())
            .await;
        manager.close_store().await;

        manager.store(OAuthToken::bearer("refreshed")).await;
        assert_eq!(manager.token().await.unwrap().access_token, "refreshed");
        assert!(manager.read_token().await.is_none());

        assert!(
            manager
                .validate_passcode("1234", PasscodeInputMode::Match, &server())
                .await
        );
        assert_eq!(manager.read_token().await.unwrap().access_token, "refreshed");

        manager.store(OAuthToken::bearer("again")).await;
        manager.close_store().await;
        assert!(manager.token().await.is_none());
        manager.open_secure_store("1234").await;
        assert_eq!(manager.token().await.unwrap().access_token, "again");
    }
}
