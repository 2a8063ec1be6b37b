//! Embedded sled backend. sled iterates keys in lexical byte order, which
//! is exactly the contract the mailbox prefix scan needs.

use std::path::Path;

use tracing::info;

use crate::{Result, StorageError};

pub struct SledBackend {
    db: sled::Db,
}

impl SledBackend {
    pub fn open(path: &Path) -> Result<Self> {
        let db = sled::open(path)?;
        info!("Opened sled store at {:?}", path);
        Ok(Self { db })
    }

    pub fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        self.db.insert(key.as_bytes(), value)?;
        Ok(())
    }

    pub fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.db.get(key.as_bytes())?.map(|ivec| ivec.to_vec()))
    }

    pub fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.db.remove(key.as_bytes())?.is_some())
    }

    pub fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>> {
        let mut out = Vec::new();
        for entry in self.db.scan_prefix(prefix.as_bytes()) {
            let (key, value) = entry?;
            let key = String::from_utf8(key.to_vec()).map_err(|_| StorageError::InvalidKey)?;
            out.push((key, value.to_vec()));
        }
        Ok(out)
    }

    pub fn size_bytes(&self) -> u64 {
        self.db.size_on_disk().unwrap_or(0)
    }

    pub fn close(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reopen_preserves_data() {
        let dir = tempfile::tempdir().unwrap();
        {
            let backend = SledBackend::open(dir.path()).unwrap();
            backend.put("messages/R1/m1", b"payload").unwrap();
            backend.close().unwrap();
        }
        let backend = SledBackend::open(dir.path()).unwrap();
        assert_eq!(
            backend.get("messages/R1/m1").unwrap().unwrap(),
            b"payload"
        );
    }

    #[test]
    fn test_scan_prefix_is_ordered() {
        let dir = tempfile::tempdir().unwrap();
        let backend = SledBackend::open(dir.path()).unwrap();
        backend.put("messages/R1/z", b"").unwrap();
        backend.put("messages/R1/a", b"").unwrap();
        backend.put("messages/R2/a", b"").unwrap();

        let keys: Vec<String> = backend
            .scan_prefix("messages/R1/")
            .unwrap()
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        assert_eq!(keys, vec!["messages/R1/a", "messages/R1/z"]);
    }
}
