//! Server process hosting sharestore replicas.
//!
//! The server opens one [`sharestore::Driver`] per hosted share. Shares are listed
//! statically in the [`config::Config`] or published as documents in a settings share.

#![deny(missing_docs, rustdoc::broken_intra_doc_links)]

pub mod config;
pub mod host;
pub mod server;
pub mod settings;

pub use host::ReplicaHost;
