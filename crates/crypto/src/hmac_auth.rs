//! HMAC-SHA256 bearer tokens

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum TokenError {
    #[error("Malformed token")]
    Malformed,

    #[error("HMAC verification failed")]
    VerificationFailed,

    #[error("Token expired")]
    Expired,
}

/// HMAC-SHA256 authenticator
pub struct HmacAuthenticator {
    secret: [u8; 32],
}

impl HmacAuthenticator {
    /// Create a new authenticator with the given secret
    pub fn new(secret: [u8; 32]) -> Self {
        Self { secret }
    }

    /// Compute HMAC for the given data
    pub fn compute(&self, data: &[u8]) -> [u8; 32] {
        // HMAC accepts keys of any length, so this cannot fail
        let mut mac = match HmacSha256::new_from_slice(&self.secret) {
            Ok(mac) => mac,
            Err(_) => unreachable!("HMAC can take key of any size"),
        };
        mac.update(data);
        mac.finalize().into_bytes().into()
    }

    /// Verify HMAC in constant time
    pub fn verify(&self, data: &[u8], expected: &[u8; 32]) -> Result<(), TokenError> {
        let computed = self.compute(data);
        if constant_time_compare(&computed, expected) {
            Ok(())
        } else {
            Err(TokenError::VerificationFailed)
        }
    }
}

/// Identity carried by a bearer token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenClaims {
    pub wallet_address: String,
    #[serde(default)]
    pub is_admin: bool,
    /// Expiry, seconds since the Unix epoch
    pub exp: u64,
}

/// Issues and verifies `base64url(claims).hex(hmac)` bearer tokens
pub struct TokenSigner {
    hmac: HmacAuthenticator,
}

impl TokenSigner {
    pub fn new(secret: [u8; 32]) -> Self {
        Self {
            hmac: HmacAuthenticator::new(secret),
        }
    }

    /// Sign a set of claims
    pub fn issue(&self, claims: &TokenClaims) -> String {
        // Serialising a struct of plain fields does not fail
        let payload = serde_json::to_vec(claims).unwrap_or_default();
        let encoded = URL_SAFE_NO_PAD.encode(&payload);
        let mac = self.hmac.compute(encoded.as_bytes());
        format!("{}.{}", encoded, hex::encode(mac))
    }

    /// Verify a token and return its claims
    pub fn verify(&self, token: &str, now_secs: u64) -> Result<TokenClaims, TokenError> {
        let (encoded, mac_hex) = token.trim().split_once('.').ok_or(TokenError::Malformed)?;

        let mac_bytes = hex::decode(mac_hex).map_err(|_| TokenError::Malformed)?;
        let mac: [u8; 32] = mac_bytes
            .as_slice()
            .try_into()
            .map_err(|_| TokenError::Malformed)?;
        self.hmac.verify(encoded.as_bytes(), &mac)?;

        let payload = URL_SAFE_NO_PAD
            .decode(encoded)
            .map_err(|_| TokenError::Malformed)?;
        let claims: TokenClaims =
            serde_json::from_slice(&payload).map_err(|_| TokenError::Malformed)?;

        if now_secs > claims.exp {
            return Err(TokenError::Expired);
        }

        Ok(claims)
    }
}

/// Constant-time comparison to prevent timing attacks
#[inline]
fn constant_time_compare(a: &[u8; 32], b: &[u8; 32]) -> bool {
    let mut result = 0u8;
    for i in 0..32 {
        result |= a[i] ^ b[i];
    }
    result == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claims(exp: u64) -> TokenClaims {
        TokenClaims {
            wallet_address: "0xabc".to_string(),
            is_admin: false,
            exp,
        }
    }

    #[test]
    fn test_hmac_compute_verify() {
        let auth = HmacAuthenticator::new([42u8; 32]);

        let data = b"Hello, exitnet!";
        let mac = auth.compute(data);

        assert!(auth.verify(data, &mac).is_ok());
        assert!(auth.verify(b"Wrong data!", &mac).is_err());
    }

    #[test]
    fn test_token_roundtrip() {
        let signer = TokenSigner::new([7u8; 32]);
        let token = signer.issue(&claims(1_000));

        let verified = signer.verify(&token, 999).unwrap();
        assert_eq!(verified.wallet_address, "0xabc");
        assert!(!verified.is_admin);
    }

    #[test]
    fn test_token_expired() {
        let signer = TokenSigner::new([7u8; 32]);
        let token = signer.issue(&claims(1_000));

        assert_eq!(signer.verify(&token, 1_001), Err(TokenError::Expired));
    }

    #[test]
    fn test_token_wrong_secret() {
        let token = TokenSigner::new([7u8; 32]).issue(&claims(1_000));
        let other = TokenSigner::new([8u8; 32]);

        assert_eq!(other.verify(&token, 0), Err(TokenError::VerificationFailed));
    }

    #[test]
    fn test_token_tampered_payload() {
        let signer = TokenSigner::new([7u8; 32]);
        let token = signer.issue(&claims(1_000));
        let (_, mac) = token.split_once('.').unwrap();

        let mut forged = claims(1_000);
        forged.is_admin = true;
        let forged_payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&forged).unwrap());
        let forged_token = format!("{}.{}", forged_payload, mac);

        assert_eq!(signer.verify(&forged_token, 0), Err(TokenError::VerificationFailed));
    }

    #[test]
    fn test_malformed_token() {
        let signer = TokenSigner::new([7u8; 32]);
        assert_eq!(signer.verify("not-a-token", 0), Err(TokenError::Malformed));
        assert_eq!(signer.verify("abc.zz", 0), Err(TokenError::Malformed));
    }

    #[test]
    fn test_constant_time_compare() {
        let a = [1u8; 32];
        let b = [1u8; 32];
        let c = [2u8; 32];

        assert!(constant_time_compare(&a, &b));
        assert!(!constant_time_compare(&a, &c));
    }
}
