// In-memory registry store backed by DashMap
// Used for standalone runs and tests

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::{DashMap, DashSet};

use crate::store::RegistryStore;

/// In-memory registry store
#[derive(Clone, Default)]
pub struct MemoryRegistryStore {
    store: Arc<DashMap<String, String>>,
    /// Keys whose writes and deletes fail, for exercising partial failure
    failing_keys: Arc<DashSet<String>>,
    puts: Arc<AtomicU64>,
    deletes: Arc<AtomicU64>,
}

impl MemoryRegistryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make writes and deletes of `key` fail until healed
    pub fn fail_key(&self, key: &str) {
        self.failing_keys.insert(key.to_string());
    }

    pub fn heal_key(&self, key: &str) {
        self.failing_keys.remove(key);
    }

    /// Successful puts since creation
    pub fn put_count(&self) -> u64 {
        self.puts.load(Ordering::SeqCst)
    }

    /// Successful deletes since creation
    pub fn delete_count(&self) -> u64 {
        self.deletes.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    fn check_failure(&self, op: &str, key: &str) -> anyhow::Result<()> {
        if self.failing_keys.contains(key) {
            anyhow::bail!("{} of key '{}' failed", op, key);
        }
        Ok(())
    }
}

#[async_trait]
impl RegistryStore for MemoryRegistryStore {
    async fn list_keys(&self, prefix: &str) -> anyhow::Result<Vec<String>> {
        let mut keys: Vec<String> = self
            .store
            .iter()
            .filter(|entry| entry.key().starts_with(prefix))
            .map(|entry| entry.key().clone())
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn list(&self, prefix: &str) -> anyhow::Result<Vec<(String, String)>> {
        let mut pairs: Vec<(String, String)> = self
            .store
            .iter()
            .filter(|entry| entry.key().starts_with(prefix))
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        pairs.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(pairs)
    }

    async fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        Ok(self.store.get(key).map(|entry| entry.value().clone()))
    }

    async fn put(&self, key: &str, value: &str) -> anyhow::Result<()> {
        self.check_failure("put", key)?;
        self.store.insert(key.to_string(), value.to_string());
        self.puts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn delete(&self, key: &str) -> anyhow::Result<bool> {
        self.check_failure("delete", key)?;
        let existed = self.store.remove(key).is_some();
        if existed {
            self.deletes.fetch_add(1, Ordering::SeqCst);
        }
        Ok(existed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_get_delete() {
        let store = MemoryRegistryStore::new();
        store.put("/a/routes/1", "{}").await.unwrap();
        assert_eq!(store.get("/a/routes/1").await.unwrap(), Some("{}".to_string()));
        assert!(store.delete("/a/routes/1").await.unwrap());
        assert!(!store.delete("/a/routes/1").await.unwrap());
        assert_eq!(store.put_count(), 1);
        assert_eq!(store.delete_count(), 1);
    }

    #[tokio::test]
    async fn test_list_keys_by_prefix_sorted() {
        let store = MemoryRegistryStore::new();
        store.put("/p/gw/prod/v2/routes/b", "1").await.unwrap();
        store.put("/p/gw/prod/v2/routes/a", "2").await.unwrap();
        store.put("/p/gw/prod2/v2/routes/c", "3").await.unwrap();

        let keys = store.list_keys("/p/gw/prod/").await.unwrap();
        assert_eq!(keys, vec!["/p/gw/prod/v2/routes/a", "/p/gw/prod/v2/routes/b"]);

        let pairs = store.list("/p/gw/").await.unwrap();
        assert_eq!(pairs.len(), 3);
    }

    #[tokio::test]
    async fn test_failing_key() {
        let store = MemoryRegistryStore::new();
        store.fail_key("/k");
        assert!(store.put("/k", "v").await.is_err());
        assert!(store.is_empty());
        store.heal_key("/k");
        store.put("/k", "v").await.unwrap();
        assert_eq!(store.len(), 1);
    }
}
