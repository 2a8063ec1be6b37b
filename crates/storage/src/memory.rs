//! In-memory backend: a BTreeMap behind a reader-writer lock.

use std::collections::BTreeMap;
use std::ops::Bound;

use parking_lot::RwLock;

use crate::Result;

#[derive(Default)]
pub struct MemoryBackend {
    inner: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        self.inner.write().insert(key.to_string(), value.to_vec());
        Ok(())
    }

    pub fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.inner.read().get(key).cloned())
    }

    pub fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.inner.write().remove(key).is_some())
    }

    pub fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>> {
        let map = self.inner.read();
        let range = map.range::<String, _>((Bound::Included(prefix.to_string()), Bound::Unbounded));
        Ok(range
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect())
    }

    pub fn size_bytes(&self) -> u64 {
        self.inner
            .read()
            .iter()
            .map(|(key, value)| (key.len() + value.len()) as u64)
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_is_lexical() {
        let backend = MemoryBackend::new();
        backend.put("p/10", b"").unwrap();
        backend.put("p/2", b"").unwrap();
        backend.put("p/1", b"").unwrap();

        let keys: Vec<String> = backend
            .scan_prefix("p/")
            .unwrap()
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        // Lexical, not numeric
        assert_eq!(keys, vec!["p/1", "p/10", "p/2"]);
    }

    #[test]
    fn test_scan_empty_prefix_miss() {
        let backend = MemoryBackend::new();
        backend.put("a/1", b"").unwrap();
        assert!(backend.scan_prefix("b/").unwrap().is_empty());
    }

    #[test]
    fn test_size_accounts_keys_and_values() {
        let backend = MemoryBackend::new();
        backend.put("k", b"vv").unwrap();
        assert_eq!(backend.size_bytes(), 3);
    }
}
