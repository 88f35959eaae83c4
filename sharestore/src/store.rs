//! In-memory document index and the stores that persist it.
pub mod config;
pub mod index;
pub mod query;
pub mod snapshot;
