//! Symmetric encryption for token cookies
//!
//! Cookie values are sealed with AES-256-GCM. The 256-bit key is derived from
//! the configured password and salt with HKDF-SHA256, so every relay instance
//! configured with the same pair can open cookies issued by any other.
//!
//! Wire format: `base64url_nopad(nonce[12] || ciphertext || tag[16])`.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use hkdf::Hkdf;
use sha2::Sha256;

use crate::error::{RelayError, Result};

const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;
const KEY_INFO: &[u8] = b"tokenrelay cookie key";

/// Reason a sealed value could not be opened.
///
/// Deliberately carries no detail: callers only need to know the value is
/// unusable, and the detail could leak information about the key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("value could not be decrypted")]
pub struct DecryptError;

/// AES-256-GCM cipher keyed from a password and salt.
///
/// # Examples
///
/// ```
/// use tokenrelay::security::cipher::TokenCipher;
///
/// let cipher = TokenCipher::new("password", "0123456789abcdef").unwrap();
/// let sealed = cipher.encrypt("bearer-token").unwrap();
/// assert_eq!(cipher.decrypt(&sealed).unwrap(), "bearer-token");
/// ```
#[derive(Clone)]
pub struct TokenCipher {
    cipher: Aes256Gcm,
}

impl TokenCipher {
    /// Derives the cipher key from `password` and `salt`.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Config`] if either input is empty.
    pub fn new(password: &str, salt: &str) -> Result<Self> {
        if password.is_empty() || salt.is_empty() {
            return Err(RelayError::Config(
                "cookie encryptor password and salt must not be empty".to_string(),
            ));
        }

        let hk = Hkdf::<Sha256>::new(Some(salt.as_bytes()), password.as_bytes());
        let mut key = [0u8; 32];
        hk.expand(KEY_INFO, &mut key)
            .map_err(|e| RelayError::Config(format!("cookie key derivation failed: {e}")))?;

        Ok(Self {
            cipher: Aes256Gcm::new((&key).into()),
        })
    }

    /// Seals `clear_text` under a fresh random nonce.
    pub fn encrypt(&self, clear_text: &str) -> Result<String> {
        use rand::RngCore as _;
        let mut nonce = [0u8; NONCE_LEN];
        rand::rng().fill_bytes(&mut nonce);

        let sealed = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce), clear_text.as_bytes())
            .map_err(|_| RelayError::Config("cookie encryption failed".to_string()))?;

        let mut out = Vec::with_capacity(NONCE_LEN + sealed.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&sealed);
        Ok(URL_SAFE_NO_PAD.encode(out))
    }

    /// Opens a value produced by [`encrypt`](Self::encrypt).
    ///
    /// Any malformed input, wrong key or tampered byte yields
    /// [`DecryptError`]; a wrong key never produces a plausible clear text.
    pub fn decrypt(&self, cipher_text: &str) -> std::result::Result<String, DecryptError> {
        let raw = URL_SAFE_NO_PAD.decode(cipher_text).map_err(|_| DecryptError)?;
        if raw.len() < NONCE_LEN + TAG_LEN {
            return Err(DecryptError);
        }

        let (nonce, sealed) = raw.split_at(NONCE_LEN);
        let clear = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), sealed)
            .map_err(|_| DecryptError)?;

        String::from_utf8(clear).map_err(|_| DecryptError)
    }
}

impl std::fmt::Debug for TokenCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCipher").finish_non_exhaustive()
    }
}
