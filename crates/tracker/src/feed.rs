use anyhow::{anyhow, Result};
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use model::FeedSnapshot;

/// Feed request timeout.
const FETCH_TIMEOUT: Duration = Duration::from_secs(3);

type SharedFetch = Shared<BoxFuture<'static, Result<Arc<FeedSnapshot>, Arc<anyhow::Error>>>>;

#[derive(Default)]
struct Validators {
    etag: Option<String>,
    last_modified: Option<String>,
    body: Option<Arc<FeedSnapshot>>,
}

/// Conditional-GET fetcher for one antenna.
///
/// Keeps one keep-alive socket, remembers the last ETag/Last-Modified pair
/// and serves the cached body on 304. At most one request is in flight;
/// concurrent callers share its result.
pub struct FeedClient {
    antenna_id: String,
    url: String,
    client: reqwest::Client,
    validators: Mutex<Validators>,
    inflight: Mutex<Option<SharedFetch>>,
    cache_hits: AtomicU64,
}

impl FeedClient {
    pub fn new(antenna_id: impl Into<String>, url: impl Into<String>) -> Result<Arc<Self>> {
        let client = reqwest::Client::builder()
            .timeout(FETCH_TIMEOUT)
            .pool_max_idle_per_host(1)
            .tcp_keepalive(Duration::from_secs(30))
            .build()?;
        Ok(Arc::new(Self {
            antenna_id: antenna_id.into(),
            url: url.into(),
            client,
            validators: Mutex::new(Validators::default()),
            inflight: Mutex::new(None),
            cache_hits: AtomicU64::new(0),
        }))
    }

    pub fn antenna_id(&self) -> &str {
        &self.antenna_id
    }

    pub fn cache_hits(&self) -> u64 {
        self.cache_hits.load(Ordering::Relaxed)
    }

    /// Fetch the feed, joining any request already in flight.
    pub async fn fetch(self: Arc<Self>) -> Result<Arc<FeedSnapshot>> {
        let shared = {
            let mut slot = self.inflight.lock();
            match slot.as_ref() {
                Some(existing) => existing.clone(),
                None => {
                    let this = Arc::clone(&self);
                    let fut = async move {
                        let result = this.fetch_inner().await.map_err(Arc::new);
                        *this.inflight.lock() = None;
                        result
                    }
                    .boxed()
                    .shared();
                    *slot = Some(fut.clone());
                    fut
                }
            }
        };

        shared.await.map_err(|e| anyhow!("{}", e))
    }

    async fn fetch_inner(&self) -> Result<Arc<FeedSnapshot>> {
        let (etag, last_modified) = {
            let validators = self.validators.lock();
            (validators.etag.clone(), validators.last_modified.clone())
        };

        let mut request = self.client.get(&self.url);
        if let Some(etag) = etag {
            request = request.header(reqwest::header::IF_NONE_MATCH, etag);
        }
        if let Some(last_modified) = last_modified {
            request = request.header(reqwest::header::IF_MODIFIED_SINCE, last_modified);
        }

        let response = match request.send().await {
            Ok(r) => r,
            Err(e) => {
                // A failed poll invalidates everything we cached.
                *self.validators.lock() = Validators::default();
                return Err(anyhow!("antenna {}: {}", self.antenna_id, e));
            }
        };

        if response.status() == reqwest::StatusCode::NOT_MODIFIED {
            self.cache_hits.fetch_add(1, Ordering::Relaxed);
            let cached = self.validators.lock().body.clone();
            return cached.ok_or_else(|| {
                anyhow!(
                    "antenna {}: 304 with no cached body",
                    self.antenna_id
                )
            });
        }

        if !response.status().is_success() {
            *self.validators.lock() = Validators::default();
            return Err(anyhow!(
                "antenna {} returned {}",
                self.antenna_id,
                response.status()
            ));
        }

        let etag = header_string(&response, reqwest::header::ETAG);
        let last_modified = header_string(&response, reqwest::header::LAST_MODIFIED);

        let feed: FeedSnapshot = match response.json().await {
            Ok(feed) => feed,
            Err(e) => {
                *self.validators.lock() = Validators::default();
                warn!("Antenna {} body unparseable: {}", self.antenna_id, e);
                return Err(anyhow!("antenna {}: {}", self.antenna_id, e));
            }
        };

        let body = Arc::new(feed);
        {
            let mut validators = self.validators.lock();
            validators.etag = etag;
            validators.last_modified = last_modified;
            validators.body = Some(body.clone());
        }
        debug!(
            "Antenna {}: {} aircraft at {}",
            self.antenna_id,
            body.aircraft.len(),
            body.snapshot_seconds()
        );
        Ok(body)
    }
}

fn header_string(response: &reqwest::Response, name: reqwest::header::HeaderName) -> Option<String> {
    response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}
