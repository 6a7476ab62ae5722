//! HTTP client for the key-share service.
//!
//! The service holds each per-minute encryption key under secret sharing
//! across three backend nodes. This client ships new keys as they rotate,
//! deduplicating against the last few already-sent key UUIDs, and exposes
//! the service's retrieve/decrypt/health/stats surface. Key-share failures
//! are observable through a counter but never block an upload.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info, warn};

/// How many recently-sent key UUIDs are remembered for deduplication.
const SENT_KEYS_KEPT: usize = 8;

#[derive(thiserror::Error, Debug)]
pub enum KeyShareClientError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("key not found: {0}")]
    NotFound(String),

    #[error("service rejected request: {0}")]
    Rejected(String),
}

#[derive(Debug, Serialize)]
struct StoreKeyRequest<'a> {
    #[serde(rename = "packageUuid")]
    package_uuid: &'a str,
    #[serde(rename = "encryptionKey")]
    encryption_key: String,
}

#[derive(Debug, Deserialize)]
pub struct StoreKeyResponse {
    pub success: bool,
    #[serde(rename = "packageUuid")]
    pub package_uuid: String,
    #[serde(rename = "collectionId", default)]
    pub collection_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RetrieveKeyResponse {
    pub success: bool,
    #[serde(rename = "packageUuid")]
    pub package_uuid: String,
    #[serde(rename = "encryptionKey")]
    pub encryption_key: String,
}

#[derive(Debug, Serialize)]
struct DecryptRequest<'a> {
    #[serde(rename = "encryptedData")]
    encrypted_data: String,
    #[serde(rename = "encryptionKeyUuid")]
    encryption_key_uuid: &'a str,
}

#[derive(Debug, Deserialize)]
pub struct DecryptResponse {
    #[serde(rename = "decryptedData")]
    pub decrypted_data: String,
    pub size: u64,
}

#[derive(Debug, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    #[serde(default)]
    pub collection: Option<String>,
    #[serde(rename = "userDid", default)]
    pub user_did: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct StatsResponse {
    pub success: bool,
    #[serde(rename = "totalKeys")]
    pub total_keys: u64,
    #[serde(rename = "collectionId", default)]
    pub collection_id: Option<String>,
    #[serde(rename = "userDid", default)]
    pub user_did: Option<String>,
    pub status: String,
}

pub struct KeyShareClient {
    base_url: String,
    client: reqwest::Client,
    /// LRU of key UUIDs already shipped this session.
    sent: Mutex<VecDeque<String>>,
    share_errors: AtomicU64,
}

impl KeyShareClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
            sent: Mutex::new(VecDeque::with_capacity(SENT_KEYS_KEPT)),
            share_errors: AtomicU64::new(0),
        }
    }

    /// Key-share POST failures observed so far. The encrypted pipeline's
    /// own counter is optimistic; this is the separate error observable.
    pub fn share_errors(&self) -> u64 {
        self.share_errors.load(Ordering::Relaxed)
    }

    /// Ship one minute key to the share service. Already-sent keys are
    /// skipped; failures are recorded and surfaced, never fatal upstream.
    pub async fn store_key(
        &self,
        key_uuid: &str,
        raw_key: &[u8; 32],
    ) -> Result<(), KeyShareClientError> {
        if self.already_sent(key_uuid) {
            debug!("Key {} already shipped, skipping", key_uuid);
            return Ok(());
        }

        let request = StoreKeyRequest {
            package_uuid: key_uuid,
            encryption_key: hex::encode(raw_key),
        };

        let result = self
            .client
            .post(format!("{}/store-key", self.base_url))
            .json(&request)
            .send()
            .await;

        let response = match result {
            Ok(r) => r,
            Err(e) => {
                self.share_errors.fetch_add(1, Ordering::Relaxed);
                return Err(e.into());
            }
        };

        if !response.status().is_success() {
            self.share_errors.fetch_add(1, Ordering::Relaxed);
            return Err(KeyShareClientError::Rejected(format!(
                "store-key returned {}",
                response.status()
            )));
        }

        let body: StoreKeyResponse = response.json().await.map_err(|e| {
            self.share_errors.fetch_add(1, Ordering::Relaxed);
            KeyShareClientError::from(e)
        })?;
        if !body.success {
            self.share_errors.fetch_add(1, Ordering::Relaxed);
            return Err(KeyShareClientError::Rejected(format!(
                "store-key unsuccessful for {}",
                body.package_uuid
            )));
        }

        self.remember_sent(key_uuid);
        info!(
            "Stored minute key {} (collection {:?})",
            key_uuid, body.collection_id
        );
        Ok(())
    }

    pub async fn retrieve_key(
        &self,
        key_uuid: &str,
    ) -> Result<RetrieveKeyResponse, KeyShareClientError> {
        let response = self
            .client
            .get(format!("{}/retrieve-key/{}", self.base_url, key_uuid))
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(KeyShareClientError::NotFound(key_uuid.to_string()));
        }
        if !response.status().is_success() {
            return Err(KeyShareClientError::Rejected(format!(
                "retrieve-key returned {}",
                response.status()
            )));
        }
        Ok(response.json().await?)
    }

    /// Ask the service to decrypt a package with a key it holds.
    pub async fn remote_decrypt(
        &self,
        encrypted: &[u8],
        key_uuid: &str,
    ) -> Result<Vec<u8>, KeyShareClientError> {
        let request = DecryptRequest {
            encrypted_data: BASE64.encode(encrypted),
            encryption_key_uuid: key_uuid,
        };
        let response = self
            .client
            .post(format!("{}/decrypt", self.base_url))
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(KeyShareClientError::Rejected(format!(
                "decrypt returned {}",
                response.status()
            )));
        }
        let body: DecryptResponse = response.json().await?;
        BASE64
            .decode(body.decrypted_data.as_bytes())
            .map_err(|e| KeyShareClientError::Rejected(format!("bad decrypt payload: {}", e)))
    }

    pub async fn health(&self) -> Result<HealthResponse, KeyShareClientError> {
        let response = self
            .client
            .get(format!("{}/health", self.base_url))
            .send()
            .await?;
        Ok(response.json().await?)
    }

    pub async fn stats(&self) -> Result<StatsResponse, KeyShareClientError> {
        let response = self
            .client
            .get(format!("{}/stats", self.base_url))
            .send()
            .await?;
        Ok(response.json().await?)
    }

    fn already_sent(&self, key_uuid: &str) -> bool {
        self.sent.lock().iter().any(|k| k == key_uuid)
    }

    fn remember_sent(&self, key_uuid: &str) {
        let mut sent = self.sent.lock();
        if sent.len() >= SENT_KEYS_KEPT {
            sent.pop_front();
        }
        sent.push_back(key_uuid.to_string());
    }
}

/// Log-and-count wrapper for fire-and-forget callers.
pub async fn ship_key_best_effort(client: &KeyShareClient, key_uuid: &str, raw_key: &[u8; 32]) {
    if let Err(e) = client.store_key(key_uuid, raw_key).await {
        warn!("Key-share store failed for {}: {}", key_uuid, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dedup_window_keeps_the_most_recent_keys() {
        let client = KeyShareClient::new("http://localhost:9000");
        for i in 0..12 {
            client.remember_sent(&format!("enckey-{}-u", i));
        }
        assert!(!client.already_sent("enckey-0-u"));
        assert!(!client.already_sent("enckey-3-u"));
        assert!(client.already_sent("enckey-4-u"));
        assert!(client.already_sent("enckey-11-u"));
        assert_eq!(client.sent.lock().len(), SENT_KEYS_KEPT);
    }

    #[tokio::test]
    async fn transport_failures_count_as_share_errors() {
        // Port 1 refuses connections immediately.
        let client = KeyShareClient::new("http://127.0.0.1:1");
        let err = client.store_key("enckey-1-u", &[0u8; 32]).await;
        assert!(err.is_err());
        assert_eq!(client.share_errors(), 1);
        // A failed send must not mark the key as shipped.
        assert!(!client.already_sent("enckey-1-u"));
    }
}
