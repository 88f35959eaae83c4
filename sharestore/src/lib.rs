//! Persistent document-store driver for peer-replicated shares.
//!
//! A [`Driver`] holds the documents of one share in an in-memory [`DocumentIndex`] and
//! writes the whole index as a single snapshot through a [`Backend`] key-value store.
//! Small per-share settings live next to it in a namespaced config store.
#![deny(missing_docs, rustdoc::broken_intra_doc_links)]

pub mod backend;
pub mod doc;
pub mod driver;
pub mod keys;
pub mod store;

pub use backend::{Backend, BackendError, Key, MemBackend, RedbBackend};
pub use doc::Document;
pub use driver::{Driver, DriverError, DriverOptions};
pub use keys::{Namespace, ShareAddress};
pub use store::{index::DocumentIndex, query::Query, snapshot::FlushStrategy};
