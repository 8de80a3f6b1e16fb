//! Request validation utilities

use thiserror::Error;

/// Validation errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Wallet address too long: {len} characters (max: {max})")]
    WalletTooLong { len: usize, max: usize },

    #[error("Wallet address contains invalid characters")]
    InvalidWalletCharacters,

    #[error("Value out of range for {field}: {value}")]
    OutOfRange { field: &'static str, value: f64 },
}

/// Maximum accepted wallet address length
pub const MAX_WALLET_LEN: usize = 128;

/// Validate a wallet address (or tunnel user id)
pub fn validate_wallet_address(field: &'static str, wallet: &str) -> Result<(), ValidationError> {
    let wallet = wallet.trim();
    if wallet.is_empty() {
        return Err(ValidationError::MissingField(field));
    }

    if wallet.len() > MAX_WALLET_LEN {
        return Err(ValidationError::WalletTooLong {
            len: wallet.len(),
            max: MAX_WALLET_LEN,
        });
    }

    if !wallet
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | ':'))
    {
        return Err(ValidationError::InvalidWalletCharacters);
    }

    Ok(())
}

/// Validate an optional non-negative metric
pub fn validate_metric(field: &'static str, value: Option<f64>) -> Result<(), ValidationError> {
    match value {
        Some(v) if !v.is_finite() || v < 0.0 => Err(ValidationError::OutOfRange { field, value: v }),
        _ => Ok(()),
    }
}
