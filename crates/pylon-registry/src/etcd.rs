//! etcd registry store over the v3 JSON gateway
//!
//! Talks to `/v3/kv/range`, `/v3/kv/put` and `/v3/kv/deleterange`. Keys and
//! values travel base64 encoded. Requests fail over across the configured
//! endpoints.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tracing::{debug, error, warn};

use crate::store::RegistryStore;

/// Connection settings for an etcd cluster
#[derive(Clone, Debug)]
pub struct EtcdConfig {
    /// Endpoints such as `http://127.0.0.1:2379`
    pub endpoints: Vec<String>,
    pub connect_timeout_ms: u64,
    pub request_timeout_ms: u64,
}

impl Default for EtcdConfig {
    fn default() -> Self {
        Self {
            endpoints: vec!["http://127.0.0.1:2379".to_string()],
            connect_timeout_ms: 3000,
            request_timeout_ms: 10000,
        }
    }
}

impl EtcdConfig {
    pub fn with_endpoints(endpoints: Vec<String>) -> Self {
        Self {
            endpoints,
            ..Default::default()
        }
    }

    pub fn with_timeouts(mut self, connect_ms: u64, request_ms: u64) -> Self {
        self.connect_timeout_ms = connect_ms;
        self.request_timeout_ms = request_ms;
        self
    }
}

#[derive(Serialize)]
struct RangeRequest {
    key: String,
    range_end: String,
    keys_only: bool,
}

#[derive(Deserialize, Default)]
struct RangeResponse {
    #[serde(default)]
    kvs: Vec<KeyValue>,
}

#[derive(Deserialize)]
struct KeyValue {
    key: String,
    #[serde(default)]
    value: String,
}

#[derive(Serialize)]
struct PutRequest {
    key: String,
    value: String,
}

#[derive(Serialize)]
struct DeleteRangeRequest {
    key: String,
}

#[derive(Deserialize, Default)]
struct DeleteRangeResponse {
    /// int64 rendered as a JSON string, absent when zero
    #[serde(default)]
    deleted: Option<String>,
}

#[derive(Deserialize)]
struct Ignored {}

/// The smallest key greater than every key starting with `prefix`
fn prefix_range_end(prefix: &[u8]) -> Vec<u8> {
    let mut end = prefix.to_vec();
    while let Some(last) = end.pop() {
        if last < 0xff {
            end.push(last + 1);
            return end;
        }
    }
    // every byte was 0xff: "\0" means "to the end of the keyspace"
    vec![0]
}

fn decode(field: &str) -> anyhow::Result<String> {
    let bytes = BASE64.decode(field)?;
    Ok(String::from_utf8(bytes)?)
}

/// etcd v3 registry store
pub struct EtcdRegistryStore {
    config: EtcdConfig,
    client: Client,
    current: AtomicUsize,
}

impl EtcdRegistryStore {
    pub fn new(config: EtcdConfig) -> anyhow::Result<Self> {
        if config.endpoints.is_empty() {
            anyhow::bail!("at least one etcd endpoint is required");
        }

        let client = Client::builder()
            .connect_timeout(Duration::from_millis(config.connect_timeout_ms))
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()?;

        Ok(Self {
            config,
            client,
            current: AtomicUsize::new(0),
        })
    }

    fn endpoint(&self) -> &str {
        let index = self.current.load(Ordering::Relaxed) % self.config.endpoints.len();
        self.config.endpoints[index].trim_end_matches('/')
    }

    fn switch_to_next_endpoint(&self) {
        self.current.fetch_add(1, Ordering::Relaxed);
    }

    /// POST a JSON request, failing over to the next endpoint on transport errors
    async fn call<B, T>(&self, path: &str, body: &B) -> anyhow::Result<T>
    where
        B: Serialize + Sync,
        T: DeserializeOwned,
    {
        let mut last_error = None;

        for _ in 0..self.config.endpoints.len() {
            let url = format!("{}{}", self.endpoint(), path);
            match self.client.post(&url).json(body).send().await {
                Ok(response) => return Self::handle_response(response).await,
                Err(e) => {
                    warn!(url = %url, error = %e, "etcd request failed, switching to next endpoint");
                    self.switch_to_next_endpoint();
                    last_error = Some(e.into());
                }
            }
        }

        Err(last_error.unwrap_or_else(|| anyhow::anyhow!("All etcd endpoints failed")))
    }

    async fn handle_response<T: DeserializeOwned>(response: Response) -> anyhow::Result<T> {
        let status = response.status();

        if status.is_success() {
            Ok(response.json::<T>().await?)
        } else {
            let body = response.text().await.unwrap_or_default();
            error!("etcd request failed with status {}: {}", status, body);
            Err(anyhow::anyhow!(
                "etcd request failed with status {}: {}",
                status,
                body
            ))
        }
    }

    async fn range(&self, prefix: &str, keys_only: bool) -> anyhow::Result<Vec<KeyValue>> {
        let request = RangeRequest {
            key: BASE64.encode(prefix.as_bytes()),
            range_end: BASE64.encode(prefix_range_end(prefix.as_bytes())),
            keys_only,
        };
        let response: RangeResponse = self.call("/v3/kv/range", &request).await?;
        Ok(response.kvs)
    }
}

#[async_trait]
impl RegistryStore for EtcdRegistryStore {
    async fn list_keys(&self, prefix: &str) -> anyhow::Result<Vec<String>> {
        let mut keys = self
            .range(prefix, true)
            .await?
            .iter()
            .map(|kv| decode(&kv.key))
            .collect::<anyhow::Result<Vec<String>>>()?;
        keys.sort();
        debug!(prefix, count = keys.len(), "Listed etcd keys");
        Ok(keys)
    }

    async fn list(&self, prefix: &str) -> anyhow::Result<Vec<(String, String)>> {
        let mut pairs = self
            .range(prefix, false)
            .await?
            .iter()
            .map(|kv| -> anyhow::Result<(String, String)> {
                Ok((decode(&kv.key)?, decode(&kv.value)?))
            })
            .collect::<anyhow::Result<Vec<(String, String)>>>()?;
        pairs.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(pairs)
    }

    async fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        let request = serde_json::json!({ "key": BASE64.encode(key.as_bytes()) });
        let response: RangeResponse = self.call("/v3/kv/range", &request).await?;
        response.kvs.first().map(|kv| decode(&kv.value)).transpose()
    }

    async fn put(&self, key: &str, value: &str) -> anyhow::Result<()> {
        let request = PutRequest {
            key: BASE64.encode(key.as_bytes()),
            value: BASE64.encode(value.as_bytes()),
        };
        let _: Ignored = self.call("/v3/kv/put", &request).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> anyhow::Result<bool> {
        let request = DeleteRangeRequest {
            key: BASE64.encode(key.as_bytes()),
        };
        let response: DeleteRangeResponse = self.call("/v3/kv/deleterange", &request).await?;
        let deleted = response
            .deleted
            .as_deref()
            .and_then(|d| d.parse::<i64>().ok())
            .unwrap_or(0);
        Ok(deleted > 0)
    }
}
