//! exitnet Protocol - Data model shared by every exitnet component
//!
//! This crate defines:
//! - `Node`: a HOST or USER participant keyed by wallet address
//! - `Connection`: a HOST <-> USER tunnel session
//! - `TunnelConfig`: per-user WireGuard credentials
//! - `Account`: per-wallet reward claim ledger
//! - `NodeInfo`: the partial update applied on connect
//!
//! All structures serialise with serde using camelCase field names.

mod account;
mod connection;
mod node;
mod time;
mod tunnel;
mod validation;

pub use account::*;
pub use connection::*;
pub use node::*;
pub use time::*;
pub use tunnel::*;
pub use validation::*;
