//! Registry store abstraction

use async_trait::async_trait;

/// A flat string key-value store with prefix listing
///
/// Writes are whole-value replacements. Implementations must be safe to
/// share across tasks.
#[async_trait]
pub trait RegistryStore: Send + Sync {
    /// Keys starting with `prefix`, sorted
    async fn list_keys(&self, prefix: &str) -> anyhow::Result<Vec<String>>;

    /// Key-value pairs starting with `prefix`, sorted by key
    async fn list(&self, prefix: &str) -> anyhow::Result<Vec<(String, String)>>;

    async fn get(&self, key: &str) -> anyhow::Result<Option<String>>;

    async fn put(&self, key: &str, value: &str) -> anyhow::Result<()>;

    /// Returns whether the key existed
    async fn delete(&self, key: &str) -> anyhow::Result<bool>;
}
