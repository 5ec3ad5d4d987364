use crate::{KVStore, Result};
use bytes::Bytes;
use redb::{Database, ReadableTable, TableDefinition};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

const STATE_TABLE: TableDefinition<&[u8], &[u8]> = TableDefinition::new("state");

/// redb-based storage backend
pub struct RedbBackend {
    db: Arc<Database>,
}

impl RedbBackend {
    /// Open (or create) the state database at `path`
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        info!("Opening state database at: {}", path.as_ref().display());

        let db = Database::create(path.as_ref())?;

        // Create the table if it doesn't exist
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(STATE_TABLE)?;
        }
        write_txn.commit()?;

        Ok(Self { db: Arc::new(db) })
    }
}

impl KVStore for RedbBackend {
    fn get(&self, key: &[u8]) -> Result<Option<Bytes>> {
        debug!("Getting key: {:?}", String::from_utf8_lossy(key));

        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(STATE_TABLE)?;

        Ok(table
            .get(key)?
            .map(|value| Bytes::from(value.value().to_vec())))
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.put_all(&[(key, value)])
    }

    fn put_all(&self, entries: &[(&[u8], &[u8])]) -> Result<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(STATE_TABLE)?;
            for (key, value) in entries {
                debug!("Putting key: {:?}", String::from_utf8_lossy(key));
                table.insert(*key, *value)?;
            }
        }
        write_txn.commit()?;

        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<()> {
        debug!("Deleting key: {:?}", String::from_utf8_lossy(key));

        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(STATE_TABLE)?;
            table.remove(key)?;
        }
        write_txn.commit()?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_redb_backend_basic_operations() {
        let dir = tempdir().unwrap();
        let backend = RedbBackend::new(dir.path().join("state.redb")).unwrap();

        backend.put(b"ca", b"pem").unwrap();
        assert_eq!(backend.get(b"ca").unwrap(), Some(Bytes::from("pem")));
        assert!(backend.exists(b"ca").unwrap());
        assert!(!backend.exists(b"key").unwrap());

        backend.delete(b"ca").unwrap();
        assert_eq!(backend.get(b"ca").unwrap(), None);
    }

    #[test]
    fn test_redb_backend_persists_across_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.redb");

        {
            let backend = RedbBackend::new(&path).unwrap();
            backend
                .put_all(&[(b"cert", b"c"), (b"key", b"k"), (b"ca", b"a")])
                .unwrap();
        }

        let backend = RedbBackend::new(&path).unwrap();
        assert_eq!(backend.get_string("cert").unwrap().as_deref(), Some("c"));
        assert_eq!(backend.get_string("key").unwrap().as_deref(), Some("k"));
        assert_eq!(backend.get_string("ca").unwrap().as_deref(), Some("a"));
    }
}
