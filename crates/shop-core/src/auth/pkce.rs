use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::distributions::Alphanumeric;
use rand::{thread_rng, Rng, RngCore};
use sha2::{Digest, Sha256};

const STATE_LEN: usize = 32;

/// PKCE code verifier and challenge pair.
#[derive(Debug, Clone)]
pub struct PkcePair {
    verifier: String,
    challenge: String,
}

impl PkcePair {
    /// Create a new random verifier/challenge pair following RFC 7636 recommendations.
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        thread_rng().fill_bytes(&mut bytes);
        let verifier = URL_SAFE_NO_PAD.encode(bytes);
        let challenge = URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()));
        Self {
            verifier,
            challenge,
        }
    }

    pub fn verifier(&self) -> &str {
        &self.verifier
    }

    pub fn challenge(&self) -> &str {
        &self.challenge
    }
}

/// Per-attempt secrets of one authorization-code request.
#[derive(Debug, Clone)]
pub struct AuthorizationAttempt {
    pub pkce: PkcePair,
    pub state: String,
}

impl AuthorizationAttempt {
    pub fn generate() -> Self {
        Self {
            pkce: PkcePair::generate(),
            state: random_state(STATE_LEN),
        }
    }
}

fn random_state(len: usize) -> String {
    thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verifier_meets_length_requirement() {
        let pair = PkcePair::generate();
        assert!(pair.verifier().len() >= 43);
        assert!(pair.verifier().len() <= 128);
        assert_ne!(pair.verifier(), pair.challenge());
    }

    #[test]
    fn attempts_do_not_repeat_state() {
        let first = AuthorizationAttempt::generate();
        let second = AuthorizationAttempt::generate();
        assert_eq!(first.state.len(), STATE_LEN);
        assert_ne!(first.state, second.state);
    }
}
