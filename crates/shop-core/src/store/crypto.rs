use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rand::{thread_rng, RngCore};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use super::StoreError;

pub const ENVELOPE_VERSION: u32 = 1;
const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;
const KEY_LEN: usize = 32;

/// On-disk form of the store: AES-256-GCM ciphertext plus what is needed to
/// re-derive the key from the passcode.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Envelope {
    pub version: u32,
    pub kdf_rounds: u32,
    pub salt: String,
    pub nonce: String,
    pub ciphertext: String,
}

/// Key derived from a passcode, held only in memory while the store is open.
pub struct StoreKey {
    key: [u8; KEY_LEN],
    salt: [u8; SALT_LEN],
    rounds: u32,
}

impl StoreKey {
    /// Derive a key for `passcode` under a fresh random salt.
    pub fn generate(passcode: &str, rounds: u32) -> Self {
        let mut salt = [0u8; SALT_LEN];
        thread_rng().fill_bytes(&mut salt);
        Self::derive(passcode, salt, rounds)
    }

    fn derive(passcode: &str, salt: [u8; SALT_LEN], rounds: u32) -> Self {
        let mut key = [0u8; KEY_LEN];
        pbkdf2::pbkdf2_hmac::<Sha256>(passcode.as_bytes(), &salt, rounds, &mut key);
        Self { key, salt, rounds }
    }

    pub fn seal(&self, plaintext: &[u8]) -> Result<Envelope, StoreError> {
        let mut nonce = [0u8; NONCE_LEN];
        thread_rng().fill_bytes(&mut nonce);

        let ciphertext = self
            .cipher()?
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|err| StoreError::Crypto(err.to_string()))?;

        Ok(Envelope {
            version: ENVELOPE_VERSION,
            kdf_rounds: self.rounds,
            salt: BASE64.encode(self.salt),
            nonce: BASE64.encode(nonce),
            ciphertext: BASE64.encode(ciphertext),
        })
    }

    /// Re-derive the key from `passcode` and decrypt; a wrong passcode fails authentication.
    pub fn unseal(passcode: &str, envelope: &Envelope) -> Result<(Self, Vec<u8>), StoreError> {
        if envelope.version != ENVELOPE_VERSION {
            return Err(StoreError::UnsupportedVersion(envelope.version));
        }

        let salt: [u8; SALT_LEN] = decode_fixed(&envelope.salt)?;
        let nonce: [u8; NONCE_LEN] = decode_fixed(&envelope.nonce)?;
        let ciphertext = BASE64.decode(&envelope.ciphertext)?;

        let key = Self::derive(passcode, salt, envelope.kdf_rounds);
        let plaintext = key
            .cipher()?
            .decrypt(Nonce::from_slice(&nonce), ciphertext.as_slice())
            .map_err(|_| StoreError::AuthenticationFailed)?;
        Ok((key, plaintext))
    }

    fn cipher(&self) -> Result<Aes256Gcm, StoreError> {
        Aes256Gcm::new_from_slice(&self.key).map_err(|err| StoreError::Crypto(err.to_string()))
    }
}

fn decode_fixed<const N: usize>(encoded: &str) -> Result<[u8; N], StoreError> {
    let bytes = BASE64.decode(encoded)?;
    bytes
        .try_into()
        .map_err(|bytes: Vec<u8>| StoreError::Crypto(format!("expected {N} bytes, got {}", bytes.len())))
}

impl std::fmt::Debug for StoreKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreKey")
            .field("rounds", &self.rounds)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ROUNDS: u32 = 16;

    #[test]
    fn sealed_payload_opens_only_with_same_passcode() {
        let key = StoreKey::generate("1234", ROUNDS);
        let envelope = key.seal(b"{\"k\":\"v\"}").unwrap();
        assert_eq!(envelope.kdf_rounds, ROUNDS);

        let (_, plaintext) = StoreKey::unseal("1234", &envelope).unwrap();
        assert_eq!(plaintext, b"{\"k\":\"v\"}");
        assert!(matches!(
            StoreKey::unseal("9999", &envelope).unwrap_err(),
            StoreError::AuthenticationFailed
        ));
    }

    #[test]
    fn fresh_salt_and_nonce_per_key() {
        let first = StoreKey::generate("1234", ROUNDS).seal(b"x").unwrap();
        let second = StoreKey::generate("1234", ROUNDS).seal(b"x").unwrap();
        assert_ne!(first.salt, second.salt);
        assert_ne!(first.ciphertext, second.ciphertext);
    }

    #[test]
    fn unknown_version_is_rejected() {
        let mut envelope = StoreKey::generate("1234", ROUNDS).seal(b"x").unwrap();
        envelope.version = 7;
        assert!(matches!(
            StoreKey::unseal("1234", &envelope).unwrap_err(),
            StoreError::UnsupportedVersion(7)
        ));
    }

    #[test]
    fn truncated_salt_is_malformed() {
        let mut envelope = StoreKey::generate("1234", ROUNDS).seal(b"x").unwrap();
        envelope.salt = BASE64.encode([0u8; 4]);
        assert!(matches!(
            StoreKey::unseal("1234", &envelope).unwrap_err(),
            StoreError::Crypto(_)
        ));
    }
}
