//! X25519 key management for WireGuard peers

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use rand::rngs::OsRng;
use thiserror::Error;
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret};

#[derive(Error, Debug)]
pub enum KeyError {
    #[error("Invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    #[error("Key decoding failed: {0}")]
    KeyDecodingFailed(String),
}

/// X25519 key pair as used by WireGuard
pub struct TunnelKeyPair {
    secret: StaticSecret,
    public: X25519PublicKey,
}

impl TunnelKeyPair {
    /// Generate a new random key pair
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = X25519PublicKey::from(&secret);
        Self { secret, public }
    }

    /// Create from secret key bytes
    pub fn from_secret(secret_bytes: &[u8; 32]) -> Self {
        let secret = StaticSecret::from(*secret_bytes);
        let public = X25519PublicKey::from(&secret);
        Self { secret, public }
    }

    /// Create from a base64 private key (`wg genkey` format)
    pub fn from_base64(private_key: &str) -> Result<Self, KeyError> {
        let bytes = STANDARD
            .decode(private_key.trim())
            .map_err(|e| KeyError::KeyDecodingFailed(e.to_string()))?;
        let secret: [u8; 32] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| KeyError::InvalidKeyLength {
                expected: 32,
                actual: bytes.len(),
            })?;
        Ok(Self::from_secret(&secret))
    }

    /// Get the public key
    pub fn public_key(&self) -> [u8; 32] {
        self.public.to_bytes()
    }

    /// Private key in base64
    pub fn private_key_base64(&self) -> String {
        STANDARD.encode(self.secret.to_bytes())
    }

    /// Public key in base64 (`wg pubkey` format)
    pub fn public_key_base64(&self) -> String {
        STANDARD.encode(self.public.to_bytes())
    }
}

impl std::fmt::Debug for TunnelKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TunnelKeyPair")
            .field("public", &self.public_key_base64())
            .finish_non_exhaustive()
    }
}
