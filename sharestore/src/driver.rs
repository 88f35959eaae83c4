//! The share driver: a [`DocumentIndex`] kept durable through a [`Backend`].

use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Weak,
    },
    time::Duration,
};

use parking_lot::RwLock;
use tracing::{debug, info, trace, warn};

use crate::{
    backend::{Backend, BackendError},
    doc::{Document, ID_SEPARATOR},
    keys::{Namespace, ShareAddress},
    store::{
        config::{ConfigError, ConfigStore},
        index::DocumentIndex,
        query::Query,
        snapshot::{FlushStrategy, PersistenceGateway, SaveError},
    },
};

/// Options for [`Driver::open`].
#[derive(Debug, Clone, Default)]
pub struct DriverOptions {
    /// When upserts are written to the backend.
    pub flush: FlushStrategy,
}

/// Error returned from [`Driver`] operations.
#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    /// The driver has been closed.
    #[error("driver for {0} is closed")]
    Closed(Namespace),
    /// The backend failed or rejected a write. The operation did not take effect.
    #[error(transparent)]
    Backend(#[from] BackendError),
    /// The document cannot be stored in this driver.
    #[error("invalid document at {path} by {author}: {reason}")]
    InvalidDocument {
        /// Path of the document.
        path: String,
        /// Author of the document.
        author: String,
        /// Why the document was rejected.
        reason: &'static str,
    },
    /// A stored config value is not valid UTF-8.
    #[error("config value for {key} is not valid UTF-8")]
    InvalidConfigValue {
        /// The config key.
        key: String,
    },
    /// The snapshot could not be serialized.
    #[error("failed to encode snapshot: {0}")]
    Encode(#[from] serde_json::Error),
}

impl DriverError {
    /// Whether this error was caused by a closed driver.
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed(_))
    }

    /// Whether this error was caused by the backend running out of capacity.
    pub fn is_capacity(&self) -> bool {
        matches!(self, Self::Backend(BackendError::Capacity { .. }))
    }
}

impl From<SaveError> for DriverError {
    fn from(err: SaveError) -> Self {
        match err {
            SaveError::Encode(err) => Self::Encode(err),
            SaveError::Backend(err) => Self::Backend(err),
        }
    }
}

impl From<ConfigError> for DriverError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Backend(err) => Self::Backend(err),
            ConfigError::InvalidValue { key } => Self::InvalidConfigValue { key },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Open,
    Erasing,
    Closed,
}

/// Persistent store of the documents and settings of one share.
///
/// All documents are held in memory and the whole index is written as one snapshot value.
/// With the default [`FlushStrategy::Immediate`] an upsert returns only after its snapshot
/// has been written, and a failed write leaves the driver unchanged.
///
/// Upserts, flushes and close are serialized internally. Config operations go straight to
/// the backend, one key at a time.
///
/// Cloning returns a handle to the same driver.
#[derive(Debug, Clone)]
pub struct Driver {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    namespace: Namespace,
    options: DriverOptions,
    state: RwLock<State>,
    shared: RwLock<Shared>,
    /// Held by every operation that writes the snapshot or changes the state.
    write_gate: tokio::sync::Mutex<()>,
    /// Bumped on every debounced upsert, a scheduled flush only runs if it is still current.
    flush_generation: AtomicU64,
    gateway: PersistenceGateway,
    config: ConfigStore,
}

#[derive(Debug, Default)]
struct Shared {
    index: DocumentIndex,
    /// Whether `index` has changes that are not written yet.
    dirty: bool,
}

impl Driver {
    /// Open the driver for `namespace`, restoring its documents from `backend`.
    ///
    /// Fails if the backend cannot be read. A malformed snapshot is logged and the driver
    /// starts empty.
    pub async fn open(
        namespace: Namespace,
        backend: Arc<dyn Backend>,
        options: DriverOptions,
    ) -> Result<Self, DriverError> {
        let gateway = PersistenceGateway::new(backend.clone(), &namespace);
        let index = gateway.load().await?;
        info!(
            %namespace,
            docs = index.len(),
            max_local_index = ?index.max_local_index(),
            "opened driver"
        );
        let inner = Inner {
            config: ConfigStore::new(backend, namespace.clone()),
            namespace,
            options,
            state: RwLock::new(State::Open),
            shared: RwLock::new(Shared {
                index,
                dirty: false,
            }),
            write_gate: Default::default(),
            flush_generation: AtomicU64::new(0),
            gateway,
        };
        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    /// The share of this driver.
    pub fn share(&self) -> &ShareAddress {
        self.inner.namespace.share()
    }

    /// The backend namespace of this driver.
    pub fn namespace(&self) -> &Namespace {
        &self.inner.namespace
    }

    /// Whether the driver is closed or being erased.
    pub fn is_closed(&self) -> bool {
        *self.inner.state.read() != State::Open
    }

    /// Highest local index of all documents, `None` if there are none.
    pub fn max_local_index(&self) -> Result<Option<u64>, DriverError> {
        self.inner.ensure_open()?;
        Ok(self.inner.shared.read().index.max_local_index())
    }

    /// Get all documents matching `query`.
    pub fn query_docs(&self, query: &Query) -> Result<Vec<Document>, DriverError> {
        self.inner.ensure_open()?;
        let shared = self.inner.shared.read();
        Ok(shared.index.query(query).cloned().collect())
    }

    /// Insert a document, replacing the document of the same author at the same path.
    ///
    /// Returns the committed document. With [`FlushStrategy::Immediate`] the document is
    /// durable once this returns; otherwise it is visible to queries but only written on
    /// the next flush.
    pub async fn upsert(&self, doc: Document) -> Result<Document, DriverError> {
        let _gate = self.inner.write_gate.lock().await;
        self.inner.ensure_open()?;
        self.validate(&doc)?;
        trace!(namespace = %self.inner.namespace, path = %doc.path, author = %doc.author, "upsert");

        match self.inner.options.flush {
            FlushStrategy::Immediate => {
                let staged = {
                    let shared = self.inner.shared.read();
                    let mut staged = shared.index.clone();
                    staged.upsert(doc.clone());
                    staged
                };
                self.inner.gateway.save(&staged).await?;
                let mut shared = self.inner.shared.write();
                shared.index = staged;
                shared.dirty = false;
            }
            FlushStrategy::Debounced(delay) => {
                self.inner.apply(doc.clone());
                self.schedule_flush(delay);
            }
            FlushStrategy::Manual => self.inner.apply(doc.clone()),
        }
        Ok(doc)
    }

    /// Write pending upserts to the backend.
    pub async fn flush(&self) -> Result<(), DriverError> {
        let _gate = self.inner.write_gate.lock().await;
        self.inner.ensure_open()?;
        self.inner.flush_locked().await
    }

    /// Whether there are upserts that are not written to the backend yet.
    ///
    /// Unlike the data accessors this also works on a closed driver, where it is always
    /// `false`: a close only succeeds once pending upserts are written or erased.
    pub fn has_pending_writes(&self) -> bool {
        self.inner.shared.read().dirty
    }

    /// Get a config value.
    pub async fn get_config(&self, key: &str) -> Result<Option<String>, DriverError> {
        self.inner.ensure_open()?;
        Ok(self.inner.config.get(key).await?)
    }

    /// Set a config value.
    pub async fn set_config(&self, key: &str, value: &str) -> Result<(), DriverError> {
        self.inner.ensure_open()?;
        self.inner.config.set(key, value).await?;
        Ok(())
    }

    /// List all config keys, sorted.
    pub async fn list_config_keys(&self) -> Result<Vec<String>, DriverError> {
        self.inner.ensure_open()?;
        Ok(self.inner.config.list().await?)
    }

    /// Delete a config value, returning whether it existed.
    pub async fn delete_config(&self, key: &str) -> Result<bool, DriverError> {
        self.inner.ensure_open()?;
        Ok(self.inner.config.delete(key).await?)
    }

    /// Close the driver.
    ///
    /// Without `erase`, pending upserts are written first; if that fails the driver stays
    /// open. With `erase`, the snapshot and every config entry of the namespace are
    /// deleted from the backend and the in-memory index is cleared. If the backend fails
    /// during erase the driver stays open with its documents intact and pending, so the
    /// next flush or close writes them again.
    ///
    /// Closing a closed driver does nothing.
    pub async fn close(&self, erase: bool) -> Result<(), DriverError> {
        let _gate = self.inner.write_gate.lock().await;
        if *self.inner.state.read() == State::Closed {
            return Ok(());
        }
        // no scheduled flush may run after this point
        self.inner.flush_generation.fetch_add(1, Ordering::Relaxed);

        if !erase {
            self.inner.flush_locked().await?;
            *self.inner.state.write() = State::Closed;
            info!(namespace = %self.inner.namespace, "closed driver");
            return Ok(());
        }

        *self.inner.state.write() = State::Erasing;
        if let Err(err) = self.inner.erase().await {
            warn!(namespace = %self.inner.namespace, "erase failed: {err}");
            // the snapshot may be gone, so the next flush must rewrite it
            self.inner.shared.write().dirty = true;
            *self.inner.state.write() = State::Open;
            return Err(err.into());
        }
        *self.inner.shared.write() = Shared::default();
        *self.inner.state.write() = State::Closed;
        info!(namespace = %self.inner.namespace, "erased and closed driver");
        Ok(())
    }

    fn validate(&self, doc: &Document) -> Result<(), DriverError> {
        let reason = if !doc.path.starts_with('/') {
            "path must start with '/'"
        } else if doc.author.is_empty() {
            "author must not be empty"
        } else if doc.author.contains(ID_SEPARATOR) {
            "author must not contain '|'"
        } else if &doc.share != self.share() {
            "document belongs to another share"
        } else {
            return Ok(());
        };
        Err(DriverError::InvalidDocument {
            path: doc.path.clone(),
            author: doc.author.clone(),
            reason,
        })
    }

    fn schedule_flush(&self, delay: Duration) {
        let generation = self.inner.flush_generation.fetch_add(1, Ordering::Relaxed) + 1;
        let inner = Arc::downgrade(&self.inner);
        tokio::spawn(debounced_flush(inner, generation, delay));
    }
}

async fn debounced_flush(inner: Weak<Inner>, generation: u64, delay: Duration) {
    tokio::time::sleep(delay).await;
    let Some(inner) = inner.upgrade() else {
        return;
    };
    let _gate = inner.write_gate.lock().await;
    if inner.flush_generation.load(Ordering::Relaxed) != generation || inner.ensure_open().is_err()
    {
        return;
    }
    if let Err(err) = inner.flush_locked().await {
        warn!(namespace = %inner.namespace, "background flush failed: {err}");
    }
}

impl Inner {
    fn ensure_open(&self) -> Result<(), DriverError> {
        match *self.state.read() {
            State::Open => Ok(()),
            State::Erasing | State::Closed => Err(DriverError::Closed(self.namespace.clone())),
        }
    }

    fn apply(&self, doc: Document) {
        let mut shared = self.shared.write();
        shared.index.upsert(doc);
        shared.dirty = true;
    }

    /// Write the index if it is dirty. Must be called with the write gate held.
    async fn flush_locked(&self) -> Result<(), DriverError> {
        let bytes = {
            let shared = self.shared.read();
            if !shared.dirty {
                return Ok(());
            }
            PersistenceGateway::encode(&shared.index)?
        };
        self.gateway.write(bytes).await?;
        self.shared.write().dirty = false;
        debug!(namespace = %self.namespace, "flushed");
        Ok(())
    }

    /// Delete config entries first, so a failure leaves the snapshot in place.
    async fn erase(&self) -> Result<(), BackendError> {
        self.config.clear().await?;
        self.gateway.erase().await
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        if self.shared.get_mut().dirty {
            warn!(namespace = %self.namespace, "driver dropped with unflushed upserts");
        }
    }
}
