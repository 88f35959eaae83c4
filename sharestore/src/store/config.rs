//! Namespaced string settings stored next to the document snapshot.

use std::sync::Arc;

use bytes::Bytes;

use crate::{
    backend::{Backend, BackendError},
    keys::Namespace,
};

/// Error returned from [`ConfigStore::get`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The backend failed.
    #[error(transparent)]
    Backend(#[from] BackendError),
    /// The stored value is not valid UTF-8.
    #[error("config value for {key} is not valid UTF-8")]
    InvalidValue {
        /// The config key.
        key: String,
    },
}

/// Key-value config entries of one namespace.
///
/// Every entry is its own backend key, so operations on different keys never conflict.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    backend: Arc<dyn Backend>,
    namespace: Namespace,
}

impl ConfigStore {
    /// Create the config store of `namespace`.
    pub fn new(backend: Arc<dyn Backend>, namespace: Namespace) -> Self {
        Self { backend, namespace }
    }

    /// Get the value of `key`.
    pub async fn get(&self, key: &str) -> Result<Option<String>, ConfigError> {
        let Some(bytes) = self.backend.get(&self.namespace.config_key(key)).await? else {
            return Ok(None);
        };
        let value = String::from_utf8(bytes.to_vec()).map_err(|_| ConfigError::InvalidValue {
            key: key.to_string(),
        })?;
        Ok(Some(value))
    }

    /// Set `key` to `value`.
    pub async fn set(&self, key: &str, value: &str) -> Result<(), BackendError> {
        let value = Bytes::copy_from_slice(value.as_bytes());
        self.backend
            .set(&self.namespace.config_key(key), value)
            .await
    }

    /// All keys, sorted.
    pub async fn list(&self) -> Result<Vec<String>, BackendError> {
        let prefix = self.namespace.config_prefix();
        let depth = prefix.segments().len() + 1;
        let mut keys: Vec<String> = self
            .backend
            .list(&prefix)
            .await?
            .into_iter()
            .filter(|key| key.segments().len() == depth)
            .filter_map(|key| key.last().map(ToOwned::to_owned))
            .collect();
        keys.sort();
        Ok(keys)
    }

    /// Delete `key`, returning whether it existed.
    pub async fn delete(&self, key: &str) -> Result<bool, BackendError> {
        let key = self.namespace.config_key(key);
        if self.backend.get(&key).await?.is_none() {
            return Ok(false);
        }
        self.backend.delete(&key).await?;
        Ok(true)
    }

    /// Delete every entry.
    pub async fn clear(&self) -> Result<(), BackendError> {
        for key in self.backend.list(&self.namespace.config_prefix()).await? {
            self.backend.delete(&key).await?;
        }
        Ok(())
    }
}
