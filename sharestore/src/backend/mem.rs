//! In memory backend.

use std::{collections::BTreeMap, sync::Arc};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use tracing::trace;

use super::{Backend, BackendError, Key};

/// In-memory [`Backend`].
///
/// Cloning returns a handle to the same storage. An optional quota limits the number of
/// bytes (encoded keys plus values) stored per namespace, i.e. per first key segment.
#[derive(Debug, Clone, Default)]
pub struct MemBackend {
    inner: Arc<RwLock<Inner>>,
}

#[derive(Debug, Default)]
struct Inner {
    entries: BTreeMap<Key, Bytes>,
    quota: Option<u64>,
}

fn entry_size(key: &Key, value: &Bytes) -> u64 {
    key.encoded_len() + value.len() as u64
}

impl Inner {
    fn usage(&self, namespace: Option<&str>) -> u64 {
        self.entries
            .iter()
            .filter(|(k, _)| k.namespace() == namespace)
            .map(|(k, v)| entry_size(k, v))
            .sum()
    }
}

impl MemBackend {
    /// Create an empty backend without a quota.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty backend which stores at most `limit` bytes per namespace.
    pub fn with_quota(limit: u64) -> Self {
        let inner = Inner {
            entries: Default::default(),
            quota: Some(limit),
        };
        Self {
            inner: Arc::new(RwLock::new(inner)),
        }
    }

    /// Bytes currently used by `namespace`.
    pub fn usage(&self, namespace: &str) -> u64 {
        self.inner.read().usage(Some(namespace))
    }

    /// All keys currently stored, in key order.
    pub fn keys(&self) -> Vec<Key> {
        self.inner.read().entries.keys().cloned().collect()
    }

    /// Number of stored keys.
    pub fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    /// Whether the backend holds no keys.
    pub fn is_empty(&self) -> bool {
        self.inner.read().entries.is_empty()
    }
}

#[async_trait]
impl Backend for MemBackend {
    async fn get(&self, key: &Key) -> Result<Option<Bytes>, BackendError> {
        Ok(self.inner.read().entries.get(key).cloned())
    }

    async fn set(&self, key: &Key, value: Bytes) -> Result<(), BackendError> {
        // reject keys that no persistent backend could encode
        key.to_bytes()?;
        let mut inner = self.inner.write();
        if let Some(limit) = inner.quota {
            let namespace = key.namespace();
            let previous = inner
                .entries
                .get(key)
                .map(|v| entry_size(key, v))
                .unwrap_or_default();
            let requested = inner.usage(namespace) - previous + entry_size(key, &value);
            if requested > limit {
                return Err(BackendError::Capacity {
                    namespace: namespace.unwrap_or_default().to_string(),
                    requested,
                    limit,
                });
            }
        }
        trace!(%key, len = value.len(), "set");
        inner.entries.insert(key.clone(), value);
        Ok(())
    }

    async fn delete(&self, key: &Key) -> Result<(), BackendError> {
        trace!(%key, "delete");
        self.inner.write().entries.remove(key);
        Ok(())
    }

    async fn list(&self, prefix: &Key) -> Result<Vec<Key>, BackendError> {
        let inner = self.inner.read();
        let keys = inner
            .entries
            .range(prefix.clone()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect();
        Ok(keys)
    }
}
