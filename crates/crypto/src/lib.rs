//! exitnet Crypto - Tunnel keys and bearer tokens
//!
//! This crate provides:
//! - X25519 key pairs for WireGuard peers (base64 encoded)
//! - HMAC-SHA256 with constant-time comparison
//! - Signed bearer tokens carrying a wallet identity

mod hmac_auth;
mod keys;

pub use hmac_auth::*;
pub use keys::*;
