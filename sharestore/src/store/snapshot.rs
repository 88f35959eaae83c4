//! Whole-index snapshots and the gateway that moves them in and out of a backend.

use std::{collections::BTreeMap, sync::Arc, time::Duration};

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{
    backend::{Backend, BackendError, Key},
    doc::Document,
    keys::Namespace,
};

use super::index::DocumentIndex;

/// When the driver writes the snapshot of its index to the backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FlushStrategy {
    /// Write the snapshot as part of every upsert. An upsert only succeeds once the
    /// snapshot is written.
    #[default]
    Immediate,
    /// Apply upserts in memory and write the snapshot once no upsert happened for the
    /// given delay.
    Debounced(Duration),
    /// Apply upserts in memory and write the snapshot only on explicit flush or close.
    Manual,
}

/// Borrowed view of the full state of a [`DocumentIndex`], in its persisted shape.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot<'a> {
    pub(crate) by_path_and_author: BTreeMap<String, &'a Document>,
    pub(crate) by_path_newest_first: BTreeMap<&'a str, &'a [Document]>,
    pub(crate) latest_by_path: BTreeMap<&'a str, &'a Document>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) max_local_index: Option<u64>,
}

impl Snapshot<'_> {
    /// Copy the snapshot into owned data.
    pub fn to_data(&self) -> SnapshotData {
        SnapshotData {
            by_path_and_author: self
                .by_path_and_author
                .iter()
                .map(|(k, doc)| (k.clone(), (*doc).clone()))
                .collect(),
            by_path_newest_first: self
                .by_path_newest_first
                .iter()
                .map(|(path, docs)| (path.to_string(), docs.to_vec()))
                .collect(),
            latest_by_path: self
                .latest_by_path
                .iter()
                .map(|(path, doc)| (path.to_string(), (*doc).clone()))
                .collect(),
            max_local_index: self.max_local_index,
        }
    }
}

/// Owned, decoded snapshot.
///
/// All three maps must be present for a snapshot to decode. Only `by_path_and_author` is
/// used to rebuild an index, the other two are derived views. The stored maximum local
/// index only ever raises the one recomputed from the documents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotData {
    /// Documents keyed by their composite `author|path` id.
    pub by_path_and_author: BTreeMap<String, Document>,
    /// Documents of each path, newest first.
    pub by_path_newest_first: BTreeMap<String, Vec<Document>>,
    /// Newest document of each path.
    pub latest_by_path: BTreeMap<String, Document>,
    /// Highest local index ever upserted. May exceed the local indices of the stored
    /// documents once documents were replaced; missing in older snapshots.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_local_index: Option<u64>,
}

/// Error returned from [`PersistenceGateway::save`].
#[derive(Debug, thiserror::Error)]
pub enum SaveError {
    /// The index could not be serialized.
    #[error("failed to encode snapshot: {0}")]
    Encode(#[from] serde_json::Error),
    /// The backend rejected the write.
    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// A stored snapshot could not be decoded.
#[derive(Debug, thiserror::Error)]
pub enum MalformedSnapshot {
    /// The value is not a snapshot.
    #[error("failed to decode snapshot: {0}")]
    Decode(#[from] serde_json::Error),
    /// A by-path-and-author key does not match the document stored under it.
    #[error("snapshot key {key} does not match its document")]
    KeyMismatch {
        /// The mismatched key.
        key: String,
    },
}

impl SnapshotData {
    /// Decode a snapshot from its stored bytes.
    pub fn decode(bytes: &[u8]) -> Result<Self, MalformedSnapshot> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Reads and writes the snapshot of one namespace.
#[derive(Debug, Clone)]
pub struct PersistenceGateway {
    backend: Arc<dyn Backend>,
    key: Key,
}

impl PersistenceGateway {
    /// Create a gateway for the snapshot of `namespace`.
    pub fn new(backend: Arc<dyn Backend>, namespace: &Namespace) -> Self {
        Self {
            backend,
            key: namespace.snapshot_key(),
        }
    }

    /// The backend key the snapshot is stored at.
    pub fn key(&self) -> &Key {
        &self.key
    }

    /// Serialize the full index.
    pub fn encode(index: &DocumentIndex) -> Result<Bytes, serde_json::Error> {
        let bytes = serde_json::to_vec(&index.snapshot_all())?;
        Ok(bytes.into())
    }

    /// Write an encoded snapshot, overwriting the previous one.
    pub async fn write(&self, bytes: Bytes) -> Result<(), BackendError> {
        debug!(key = %self.key, len = bytes.len(), "writing snapshot");
        self.backend.set(&self.key, bytes).await
    }

    /// Serialize and write the full index.
    pub async fn save(&self, index: &DocumentIndex) -> Result<(), SaveError> {
        let bytes = Self::encode(index)?;
        self.write(bytes).await?;
        Ok(())
    }

    /// Load the stored index.
    ///
    /// A missing snapshot yields an empty index, as does a malformed one after logging a
    /// warning. Backend failures are returned.
    pub async fn load(&self) -> Result<DocumentIndex, BackendError> {
        let Some(bytes) = self.backend.get(&self.key).await? else {
            debug!(key = %self.key, "no snapshot stored");
            return Ok(DocumentIndex::default());
        };
        let index = SnapshotData::decode(&bytes).and_then(DocumentIndex::restore_all);
        match index {
            Ok(index) => {
                debug!(key = %self.key, docs = index.len(), "restored snapshot");
                Ok(index)
            }
            Err(err) => {
                warn!(key = %self.key, "ignoring malformed snapshot: {err}");
                Ok(DocumentIndex::default())
            }
        }
    }

    /// Delete the stored snapshot.
    pub async fn erase(&self) -> Result<(), BackendError> {
        self.backend.delete(&self.key).await
    }
}

#[cfg(test)]
mod tests {
    use tracing_test::traced_test;

    use super::*;
    use crate::{doc::tests::doc, MemBackend};

    fn gateway(backend: &MemBackend) -> PersistenceGateway {
        let namespace = Namespace::new("+test.abc".parse().unwrap());
        PersistenceGateway::new(Arc::new(backend.clone()), &namespace)
    }

    #[tokio::test]
    async fn test_save_load() {
        let backend = MemBackend::new();
        let gateway = gateway(&backend);
        assert!(gateway.load().await.unwrap().is_empty());

        let mut index = DocumentIndex::new();
        index.upsert(doc("/a", "@suzy", 100, 0));
        index.upsert(doc("/a", "@timmy", 200, 1));
        gateway.save(&index).await.unwrap();

        let loaded = gateway.load().await.unwrap();
        assert_eq!(loaded.snapshot_all().to_data(), index.snapshot_all().to_data());
        assert_eq!(loaded.max_local_index(), Some(1));

        gateway.erase().await.unwrap();
        assert!(backend.is_empty());
    }

    #[test]
    fn test_snapshot_shape() {
        let mut index = DocumentIndex::new();
        index.upsert(doc("/a", "@suzy", 100, 0));
        let value = serde_json::to_value(index.snapshot_all()).unwrap();
        let object = value.as_object().unwrap();
        assert!(object["byPathAndAuthor"]["@suzy|/a"].is_object());
        assert_eq!(object["byPathNewestFirst"]["/a"].as_array().unwrap().len(), 1);
        assert_eq!(object["latestByPath"]["/a"]["author"], "@suzy");
    }

    #[tokio::test]
    #[traced_test]
    async fn test_malformed_snapshot_loads_empty() {
        let backend = MemBackend::new();
        let gateway = gateway(&backend);

        backend
            .set(gateway.key(), Bytes::from_static(b"not json"))
            .await
            .unwrap();
        assert!(gateway.load().await.unwrap().is_empty());
        assert!(logs_contain("ignoring malformed snapshot"));

        // missing top-level fields
        backend
            .set(gateway.key(), Bytes::from_static(b"{\"byPathAndAuthor\":{}}"))
            .await
            .unwrap();
        assert!(gateway.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_restore_recomputes_max_local_index() {
        let backend = MemBackend::new();
        let gateway = gateway(&backend);

        let mut index = DocumentIndex::new();
        index.upsert(doc("/a", "@suzy", 100, 7));
        let mut data = index.snapshot_all().to_data();
        // derived views and the stored counter are not needed to restore
        data.latest_by_path.clear();
        data.by_path_newest_first.clear();
        data.max_local_index = None;
        backend
            .set(gateway.key(), serde_json::to_vec(&data).unwrap().into())
            .await
            .unwrap();

        let loaded = gateway.load().await.unwrap();
        assert_eq!(loaded.max_local_index(), Some(7));
        assert_eq!(loaded.latest("/a").unwrap().author, "@suzy");
    }
}
