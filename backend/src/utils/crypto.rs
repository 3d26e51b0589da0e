//! Symmetric encryption for chat content, file key references and the room
//! correlation token.
//!
//! Key material is passed in at construction time and comes from
//! configuration, so ciphertext written before a restart stays readable.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use base64::{
    engine::general_purpose::{STANDARD_NO_PAD, URL_SAFE_NO_PAD},
    Engine as _,
};
use rand::{rngs::OsRng, RngCore};
use thiserror::Error;

use crate::error::AppError;

const NONCE_LENGTH: usize = 12;
const ENVELOPE_PREFIX: &str = "enc:v1";

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("stored value is not a recognized ciphertext envelope")]
    MalformedEnvelope,
    #[error("encryption failed")]
    EncryptFailed,
    #[error("decryption failed; key material may have rotated")]
    DecryptFailed,
}

impl From<CryptoError> for AppError {
    fn from(err: CryptoError) -> Self {
        AppError::DecryptionFailed(err.to_string())
    }
}

#[derive(Clone)]
pub struct ChannelCrypto {
    key: [u8; 32],
}

impl ChannelCrypto {
    pub fn new(key: [u8; 32]) -> Self {
        Self { key }
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<String, CryptoError> {
        let mut nonce_bytes = [0u8; NONCE_LENGTH];
        OsRng.fill_bytes(&mut nonce_bytes);

        let cipher =
            Aes256Gcm::new_from_slice(&self.key).map_err(|_| CryptoError::EncryptFailed)?;
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), plaintext.as_bytes())
            .map_err(|_| CryptoError::EncryptFailed)?;

        Ok(format!(
            "{}:{}:{}",
            ENVELOPE_PREFIX,
            STANDARD_NO_PAD.encode(nonce_bytes),
            STANDARD_NO_PAD.encode(ciphertext)
        ))
    }

    pub fn decrypt(&self, stored: &str) -> Result<String, CryptoError> {
        let payload = stored
            .strip_prefix("enc:v1:")
            .ok_or(CryptoError::MalformedEnvelope)?;

        let (nonce_part, cipher_part) = payload
            .split_once(':')
            .ok_or(CryptoError::MalformedEnvelope)?;

        let nonce_bytes = STANDARD_NO_PAD
            .decode(nonce_part)
            .map_err(|_| CryptoError::MalformedEnvelope)?;
        if nonce_bytes.len() != NONCE_LENGTH {
            return Err(CryptoError::MalformedEnvelope);
        }
        let ciphertext = STANDARD_NO_PAD
            .decode(cipher_part)
            .map_err(|_| CryptoError::MalformedEnvelope)?;

        let cipher =
            Aes256Gcm::new_from_slice(&self.key).map_err(|_| CryptoError::DecryptFailed)?;
        let plaintext = cipher
            .decrypt(Nonce::from_slice(&nonce_bytes), ciphertext.as_ref())
            .map_err(|_| CryptoError::DecryptFailed)?;
        String::from_utf8(plaintext).map_err(|_| CryptoError::DecryptFailed)
    }
}

/// Random correlation secret for a session's media room. Carries no
/// authorization by itself.
pub fn generate_room_secret() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}
