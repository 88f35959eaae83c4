//! Backend persisted in a [`redb`] database.

use std::{path::Path, sync::Arc};

use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use redb::{backends::InMemoryBackend, Database, ReadableTable, TableDefinition};
use tracing::{info, trace};

use super::{Backend, BackendError, Key};

// Entries
// Table
// Key: Key::to_bytes
// Value: raw bytes
const ENTRIES_TABLE: TableDefinition<&[u8], &[u8]> = TableDefinition::new("entries-1");

/// [`Backend`] stored in a [`redb`] database, either on disk or in memory.
#[derive(Debug, Clone)]
pub struct RedbBackend {
    db: Arc<Database>,
}

impl RedbBackend {
    /// Open or create a database file at `path`.
    pub fn persistent(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("loading backend database from {}", path.to_string_lossy());
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!(
                    "failed to create database directory at {}",
                    path.to_string_lossy()
                )
            })?;
        }
        let db = Database::builder()
            .create(path)
            .context("failed to open backend database")?;
        Self::open(db)
    }

    /// Create a database that lives in memory only.
    pub fn in_memory() -> Result<Self> {
        info!("using in-memory backend database");
        let db = Database::builder().create_with_backend(InMemoryBackend::new())?;
        Self::open(db)
    }

    fn open(db: Database) -> Result<Self> {
        let write_tx = db.begin_write()?;
        {
            let _table = write_tx.open_table(ENTRIES_TABLE)?;
        }
        write_tx.commit()?;
        Ok(Self { db: Arc::new(db) })
    }

    fn get_sync(&self, key: &Key) -> Result<Option<Bytes>> {
        let tx = self.db.begin_read()?;
        let table = tx.open_table(ENTRIES_TABLE)?;
        let Some(row) = table.get(key.to_bytes()?.as_slice())? else {
            return Ok(None);
        };
        Ok(Some(Bytes::copy_from_slice(row.value())))
    }

    fn set_sync(&self, key: &Key, value: &[u8]) -> Result<()> {
        let tx = self.db.begin_write()?;
        {
            let mut table = tx.open_table(ENTRIES_TABLE)?;
            table.insert(key.to_bytes()?.as_slice(), value)?;
        }
        tx.commit()?;
        Ok(())
    }

    fn delete_sync(&self, key: &Key) -> Result<()> {
        let tx = self.db.begin_write()?;
        {
            let mut table = tx.open_table(ENTRIES_TABLE)?;
            table.remove(key.to_bytes()?.as_slice())?;
        }
        tx.commit()?;
        Ok(())
    }

    fn list_sync(&self, prefix: &Key) -> Result<Vec<Key>> {
        let tx = self.db.begin_read()?;
        let table = tx.open_table(ENTRIES_TABLE)?;
        let prefix_bytes = prefix.to_bytes()?;
        let mut keys = Vec::new();
        for row in table.range(prefix_bytes.as_slice()..)? {
            let (key, _value) = row?;
            let key = key.value();
            if !key.starts_with(&prefix_bytes) {
                break;
            }
            keys.push(Key::from_bytes(key)?);
        }
        Ok(keys)
    }
}

#[async_trait]
impl Backend for RedbBackend {
    async fn get(&self, key: &Key) -> Result<Option<Bytes>, BackendError> {
        Ok(self.get_sync(key)?)
    }

    async fn set(&self, key: &Key, value: Bytes) -> Result<(), BackendError> {
        trace!(%key, len = value.len(), "set");
        Ok(self.set_sync(key, &value)?)
    }

    async fn delete(&self, key: &Key) -> Result<(), BackendError> {
        trace!(%key, "delete");
        Ok(self.delete_sync(key)?)
    }

    async fn list(&self, prefix: &Key) -> Result<Vec<Key>, BackendError> {
        Ok(self.list_sync(prefix)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_redb_backend_persists() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("db").join("backend.redb");
        let key = Key::from(["+a.b", "config", "foo"]);
        {
            let backend = RedbBackend::persistent(&path)?;
            backend.set(&key, Bytes::from_static(b"bar")).await?;
            backend
                .set(&Key::from(["+a.b", "docs"]), Bytes::from_static(b"{}"))
                .await?;
            backend
                .set(&Key::from(["+a.bc", "config", "foo"]), Bytes::from_static(b"x"))
                .await?;
        }
        let backend = RedbBackend::persistent(&path)?;
        assert_eq!(backend.get(&key).await?, Some(Bytes::from_static(b"bar")));
        let listed = backend.list(&Key::from(["+a.b", "config"])).await?;
        assert_eq!(listed, vec![key.clone()]);
        assert_eq!(backend.list(&Key::from(["+a.b"])).await?.len(), 2);

        backend.delete(&key).await?;
        assert_eq!(backend.get(&key).await?, None);
        assert!(backend.list(&Key::from(["+a.b", "config"])).await?.is_empty());
        Ok(())
    }
}
