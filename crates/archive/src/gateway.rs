use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, error};

use crate::tags::{tag_list_bytes, Tag, MAX_TAG_LIST_BYTES};
use crate::wallet::Wallet;

/// Upload progress callback, 0-100.
pub type ProgressFn = Arc<dyn Fn(u8) + Send + Sync>;

#[derive(Error, Debug)]
pub enum UploadError {
    /// Network failures, 5xx and gateway rejections. Worth retrying.
    #[error("retryable upload error: {0}")]
    Retryable(String),

    /// Validation failures (bad tags, 4xx). Fatal for the batch.
    #[error("fatal upload error: {0}")]
    Fatal(String),
}

impl UploadError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, UploadError::Retryable(_))
    }
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub base_url: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: std::env::var("ARCHIVE_GATEWAY")
                .unwrap_or_else(|_| "https://gateway.derad.network".to_string()),
        }
    }
}

/// Gateway client. One attempt per call; the upload pipeline owns retries.
pub struct GatewayClient {
    config: GatewayConfig,
    wallet: Arc<Wallet>,
    client: reqwest::Client,
}

impl GatewayClient {
    pub fn new(config: GatewayConfig, wallet: Arc<Wallet>) -> Self {
        Self {
            config,
            wallet,
            client: reqwest::Client::new(),
        }
    }

    pub fn wallet(&self) -> &Wallet {
        &self.wallet
    }

    /// Submit a payload with its tag list; returns the transaction id the
    /// gateway reports, verbatim.
    pub async fn upload(
        &self,
        payload: &[u8],
        tags: &[Tag],
        progress: Option<ProgressFn>,
    ) -> Result<String, UploadError> {
        let tag_bytes = tag_list_bytes(tags);
        if tag_bytes >= MAX_TAG_LIST_BYTES {
            return Err(UploadError::Fatal(format!(
                "tag list is {} bytes, limit is {}",
                tag_bytes, MAX_TAG_LIST_BYTES
            )));
        }

        if let Some(cb) = &progress {
            cb(0);
        }

        let body = json!({
            "data": BASE64.encode(payload),
            "tags": tags,
            "owner": self.wallet.address(),
            "signature": self.wallet.sign_payload(payload),
        });

        let url = format!("{}/tx", self.config.base_url);
        let start = Instant::now();
        debug!("Uploading {} bytes to {}", payload.len(), url);

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| UploadError::Retryable(format!("gateway request failed: {}", e)))?;

        let status = response.status();
        if status.is_server_error() {
            return Err(UploadError::Retryable(format!(
                "gateway returned {}",
                status
            )));
        }
        if status.is_client_error() {
            let detail = response.text().await.unwrap_or_default();
            error!("Gateway rejected upload: {} {}", status, detail);
            return Err(UploadError::Fatal(format!(
                "gateway returned {}: {}",
                status, detail
            )));
        }

        let info: Value = response
            .json()
            .await
            .map_err(|e| UploadError::Retryable(format!("unreadable gateway response: {}", e)))?;

        let tx_id = info
            .pointer("/id")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| {
                UploadError::Retryable("gateway response carried no transaction id".to_string())
            })?;

        if let Some(cb) = &progress {
            cb(100);
        }
        debug!(
            "Upload completed in {:?}, tx id {}",
            start.elapsed(),
            tx_id
        );
        Ok(tx_id)
    }

    /// Fetch the raw bytes of a transaction's data.
    pub async fn download(&self, tx_id: &str) -> Result<Vec<u8>, UploadError> {
        let url = format!("{}/tx/{}/data", self.config.base_url, tx_id);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| UploadError::Retryable(format!("gateway request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(UploadError::Retryable(format!(
                "gateway returned {} for tx {}",
                status, tx_id
            )));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| UploadError::Retryable(format!("unreadable tx body: {}", e)))?;
        Ok(bytes.to_vec())
    }

    pub fn graphql_url(&self) -> String {
        format!("{}/graphql", self.config.base_url)
    }

    pub fn http(&self) -> &reqwest::Client {
        &self.client
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oversized_tag_lists_are_fatal_before_any_io() {
        let huge = "x".repeat(MAX_TAG_LIST_BYTES);
        let tags = vec![Tag::new("Blob", huge)];
        assert!(tag_list_bytes(&tags) >= MAX_TAG_LIST_BYTES);
        // Classification, not transport: a Fatal error never retries.
        let err = UploadError::Fatal("tag list too large".into());
        assert!(!err.is_retryable());
        assert!(UploadError::Retryable("503".into()).is_retryable());
    }
}
