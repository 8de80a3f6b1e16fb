//! Authentication module

use crate::config::SecurityConfig;
use axum::http::HeaderMap;
use axum::http::header::AUTHORIZATION;
use exitnet_crypto::{TokenClaims, TokenError, TokenSigner};
use exitnet_protocol::{ValidationError, validate_wallet_address};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

/// Fallback identity header
pub const WALLET_HEADER: &str = "x-wallet-address";

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Authentication required")]
    MissingCredentials,

    #[error("Invalid token: {0}")]
    InvalidToken(#[from] TokenError),

    #[error("Invalid wallet address: {0}")]
    InvalidWallet(#[from] ValidationError),

    #[error("Token secret must be 32 bytes of hex")]
    InvalidSecret,

    #[error("Token signing is disabled: no token secret configured")]
    SigningDisabled,
}

/// The caller of a request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub wallet_address: String,
    pub is_admin: bool,
}

/// Resolves request headers to an `Identity`
pub struct Authenticator {
    /// Bearer token signer; `None` disables bearer tokens
    signer: Option<TokenSigner>,

    /// Token TTL (seconds)
    token_ttl_secs: u64,

    /// Identity for credential-less requests, development only
    dev_identity: Option<Identity>,

    admin_wallets: Vec<String>,
}

impl Authenticator {
    /// Create an authenticator from the security section
    pub fn new(config: &SecurityConfig, development: bool) -> Result<Self, AuthError> {
        let signer = match &config.token_secret {
            Some(secret) => Some(TokenSigner::new(parse_secret(secret)?)),
            None => None,
        };

        let dev_identity = development.then(|| Identity {
            wallet_address: config.dev_wallet_address.clone(),
            is_admin: true,
        });

        Ok(Self {
            signer,
            token_ttl_secs: config.token_ttl,
            dev_identity,
            admin_wallets: config.admin_wallets.clone(),
        })
    }

    /// Resolve the caller.
    ///
    /// A bearer token wins over the wallet header; with neither present the
    /// development identity is used when configured.
    pub fn authenticate(&self, headers: &HeaderMap, now_secs: u64) -> Result<Identity, AuthError> {
        if let Some(token) = bearer_token(headers) {
            let signer = self.signer.as_ref().ok_or(TokenError::VerificationFailed)?;
            let claims = signer.verify(token, now_secs)?;
            validate_wallet_address("walletAddress", &claims.wallet_address)?;
            let is_admin = claims.is_admin || self.admin_wallets.contains(&claims.wallet_address);
            debug!("Authenticated bearer: wallet={}, admin={}", claims.wallet_address, is_admin);
            return Ok(Identity {
                wallet_address: claims.wallet_address,
                is_admin,
            });
        }

        if let Some(wallet) = headers.get(WALLET_HEADER) {
            let wallet = wallet
                .to_str()
                .map_err(|_| ValidationError::InvalidWalletCharacters)?
                .trim();
            validate_wallet_address("walletAddress", wallet)?;
            return Ok(Identity {
                wallet_address: wallet.to_string(),
                is_admin: false,
            });
        }

        match &self.dev_identity {
            Some(identity) => Ok(identity.clone()),
            None => Err(AuthError::MissingCredentials),
        }
    }

    /// Issue a bearer token valid for the configured TTL
    pub fn issue_token(
        &self,
        wallet_address: &str,
        is_admin: bool,
        now_secs: u64,
    ) -> Result<IssuedToken, AuthError> {
        let Some(signer) = &self.signer else {
            warn!("Token requested but no token secret is configured");
            return Err(AuthError::SigningDisabled);
        };
        let wallet = wallet_address.trim();
        validate_wallet_address("walletAddress", wallet)?;

        let expires_at = now_secs + self.token_ttl_secs;
        let token = signer.issue(&TokenClaims {
            wallet_address: wallet.to_string(),
            is_admin,
            exp: expires_at,
        });
        debug!("Issued token: wallet={}, admin={}, exp={}", wallet, is_admin, expires_at);
        Ok(IssuedToken { token, expires_at })
    }
}

/// A freshly signed bearer token
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IssuedToken {
    pub token: String,
    /// Unix seconds
    pub expires_at: u64,
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    value
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

fn parse_secret(secret: &str) -> Result<[u8; 32], AuthError> {
    let bytes = hex::decode(secret.trim()).map_err(|_| AuthError::InvalidSecret)?;
    bytes.as_slice().try_into().map_err(|_| AuthError::InvalidSecret)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    const NOW: u64 = 1_700_000_000;

    fn security() -> SecurityConfig {
        SecurityConfig {
            token_secret: Some(hex::encode([7u8; 32])),
            admin_wallets: vec!["ADMIN_WALLET".to_string()],
            ..Default::default()
        }
    }

    fn create_auth(development: bool) -> Authenticator {
        Authenticator::new(&security(), development).unwrap()
    }

    fn bearer(token: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", token)).unwrap(),
        );
        headers
    }

    #[test]
    fn test_token_roundtrip() {
        let auth = create_auth(false);
        let token = auth.issue_token("wallet-1", false, NOW).unwrap().token;

        let identity = auth.authenticate(&bearer(&token), NOW + 10).unwrap();
        assert_eq!(identity.wallet_address, "wallet-1");
        assert!(!identity.is_admin);
    }

    #[test]
    fn test_expired_token() {
        let auth = create_auth(false);
        let token = auth.issue_token("wallet-1", false, NOW).unwrap().token;

        let err = auth.authenticate(&bearer(&token), NOW + 86_401).unwrap_err();
        assert!(matches!(err, AuthError::InvalidToken(TokenError::Expired)));
    }

    #[test]
    fn test_admin_from_config_list() {
        let auth = create_auth(false);
        let token = auth.issue_token("ADMIN_WALLET", false, NOW).unwrap().token;

        assert!(auth.authenticate(&bearer(&token), NOW).unwrap().is_admin);
    }

    #[test]
    fn test_wallet_header_is_never_admin() {
        let auth = create_auth(false);
        let mut headers = HeaderMap::new();
        headers.insert(WALLET_HEADER, HeaderValue::from_static("ADMIN_WALLET"));

        let identity = auth.authenticate(&headers, NOW).unwrap();
        assert_eq!(identity.wallet_address, "ADMIN_WALLET");
        assert!(!identity.is_admin);
    }

    #[test]
    fn test_missing_credentials() {
        let auth = create_auth(false);
        assert!(matches!(
            auth.authenticate(&HeaderMap::new(), NOW),
            Err(AuthError::MissingCredentials)
        ));
    }

    #[test]
    fn test_development_identity() {
        let auth = create_auth(true);
        let identity = auth.authenticate(&HeaderMap::new(), NOW).unwrap();
        assert_eq!(identity.wallet_address, "TEST_WALLET_ADDRESS");
        assert!(identity.is_admin);
    }

    #[test]
    fn test_tampered_token_rejected() {
        let auth = create_auth(false);
        let token = auth.issue_token("wallet-1", false, NOW).unwrap().token;
        let other = Authenticator::new(
            &SecurityConfig {
                token_secret: Some(hex::encode([8u8; 32])),
                ..Default::default()
            },
            false,
        )
        .unwrap();

        assert!(other.authenticate(&bearer(&token), NOW).is_err());
    }

    #[test]
    fn test_bad_secret() {
        let config = SecurityConfig {
            token_secret: Some("abcd".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            Authenticator::new(&config, false),
            Err(AuthError::InvalidSecret)
        ));
    }

    #[test]
    fn test_issue_requires_secret() {
        let auth = Authenticator::new(&SecurityConfig::default(), false).unwrap();
        assert!(matches!(
            auth.issue_token("wallet-1", false, NOW),
            Err(AuthError::SigningDisabled)
        ));
    }

    #[test]
    fn test_issued_admin_claim() {
        let auth = create_auth(false);
        let issued = auth.issue_token(" operator-2 ", true, NOW).unwrap();
        assert_eq!(issued.expires_at, NOW + security().token_ttl);

        let identity = auth.authenticate(&bearer(&issued.token), NOW).unwrap();
        assert_eq!(identity.wallet_address, "operator-2");
        assert!(identity.is_admin);
    }
}
