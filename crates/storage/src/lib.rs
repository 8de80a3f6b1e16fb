//! exitnet Storage - Entity repositories and caches
//!
//! This crate provides:
//! - One repository trait per entity (nodes, connections, tunnel configs, accounts)
//! - An in-memory backend (DashMap) for development and tests
//! - A PostgreSQL backend storing JSONB documents
//! - A best-effort key/value `Cache` with TTLs (in-memory or disabled)

mod cache;
mod memory;
pub mod postgres;
mod repo;

pub use cache::*;
pub use memory::*;
pub use repo::*;
