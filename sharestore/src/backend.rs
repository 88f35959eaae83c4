//! Key-value backends the driver persists through.
//!
//! A [`Backend`] offers single-key operations only: no transactions span more than one
//! key. Keys are sequences of string segments; the first segment is the share a key
//! belongs to and is what capacity limits are accounted against.

use std::{fmt, sync::Arc};

use async_trait::async_trait;
use bytes::Bytes;

pub mod fs;
pub mod mem;

pub use self::{fs::RedbBackend, mem::MemBackend};

/// Error returned from [`Backend`] operations.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// The backend could not perform the operation.
    #[error("backend unavailable: {0}")]
    Unavailable(#[from] anyhow::Error),
    /// The write was rejected because the namespace is out of capacity.
    #[error(
        "backend capacity exceeded for {namespace}: {requested} bytes requested, limit is {limit}"
    )]
    Capacity {
        /// Namespace (first key segment) that ran out of capacity.
        namespace: String,
        /// Bytes the namespace would occupy after the write.
        requested: u64,
        /// Capacity of the namespace in bytes.
        limit: u64,
    },
}

/// A single-key asynchronous key-value store.
///
/// A successful [`Backend::set`] is assumed durable.
#[async_trait]
pub trait Backend: fmt::Debug + Send + Sync + 'static {
    /// Get the value stored at `key`.
    async fn get(&self, key: &Key) -> Result<Option<Bytes>, BackendError>;
    /// Store `value` at `key`, replacing any previous value.
    async fn set(&self, key: &Key, value: Bytes) -> Result<(), BackendError>;
    /// Remove `key`. Removing a missing key is not an error.
    async fn delete(&self, key: &Key) -> Result<(), BackendError>;
    /// List all keys that start with the segments of `prefix`, in no particular order.
    async fn list(&self, prefix: &Key) -> Result<Vec<Key>, BackendError>;
}

#[async_trait]
impl<T: Backend + ?Sized> Backend for Arc<T> {
    async fn get(&self, key: &Key) -> Result<Option<Bytes>, BackendError> {
        self.as_ref().get(key).await
    }

    async fn set(&self, key: &Key, value: Bytes) -> Result<(), BackendError> {
        self.as_ref().set(key, value).await
    }

    async fn delete(&self, key: &Key) -> Result<(), BackendError> {
        self.as_ref().delete(key).await
    }

    async fn list(&self, prefix: &Key) -> Result<Vec<Key>, BackendError> {
        self.as_ref().list(prefix).await
    }
}

/// Backend key: a sequence of string segments.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Key(Vec<String>);

impl Key {
    /// Create a key from its segments.
    pub fn new<S: Into<String>>(segments: impl IntoIterator<Item = S>) -> Self {
        Self(segments.into_iter().map(Into::into).collect())
    }

    /// The segments of this key.
    pub fn segments(&self) -> &[String] {
        &self.0
    }

    /// Append a segment.
    pub fn join(mut self, segment: impl Into<String>) -> Self {
        self.0.push(segment.into());
        self
    }

    /// The last segment.
    pub fn last(&self) -> Option<&str> {
        self.0.last().map(String::as_str)
    }

    /// The first segment, which names the namespace the key is accounted to.
    pub fn namespace(&self) -> Option<&str> {
        self.0.first().map(String::as_str)
    }

    /// Whether all segments of `prefix` are the leading segments of this key.
    pub fn starts_with(&self, prefix: &Key) -> bool {
        self.0.starts_with(&prefix.0)
    }

    /// Binary encoding where every segment is a big-endian `u32` length followed by its
    /// bytes.
    ///
    /// The encoding is injective, and the encoding of a segment prefix is a byte prefix of
    /// the encoding of every key it is a prefix of. Fails for segments longer than
    /// `u32::MAX` bytes.
    pub fn to_bytes(&self) -> anyhow::Result<Vec<u8>> {
        let mut out = Vec::with_capacity(self.encoded_len() as usize);
        for segment in &self.0 {
            out.extend_from_slice(&segment_len_prefix(segment.len())?);
            out.extend_from_slice(segment.as_bytes());
        }
        Ok(out)
    }

    /// Length of [`Self::to_bytes`].
    pub fn encoded_len(&self) -> u64 {
        self.0.iter().map(|s| s.len() as u64 + 4).sum()
    }

    /// Decode a key produced by [`Self::to_bytes`].
    pub fn from_bytes(mut bytes: &[u8]) -> anyhow::Result<Self> {
        let mut segments = Vec::new();
        while !bytes.is_empty() {
            anyhow::ensure!(bytes.len() >= 4, "truncated key segment length");
            let (len, rest) = bytes.split_at(4);
            let len = u32::from_be_bytes(len.try_into()?) as usize;
            anyhow::ensure!(rest.len() >= len, "truncated key segment");
            let (segment, rest) = rest.split_at(len);
            segments.push(String::from_utf8(segment.to_vec())?);
            bytes = rest;
        }
        Ok(Self(segments))
    }
}

fn segment_len_prefix(len: usize) -> anyhow::Result<[u8; 4]> {
    let len = u32::try_from(len)
        .map_err(|_| anyhow::anyhow!("key segment of {len} bytes is too long"))?;
    Ok(len.to_be_bytes())
}

impl<S: Into<String>, const N: usize> From<[S; N]> for Key {
    fn from(value: [S; N]) -> Self {
        Self::new(value)
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join(":"))
    }
}
