//! Subscription sync
//!
//! A subscribed title mirrors a definition hosted elsewhere. The sweep
//! re-fetches every subscribed definition, compares the SHA256 of its
//! canonical JSON with the stored copy, and rewrites the blob and summary on
//! change. Each title is handled on its own: a failure is recorded on that
//! title and the sweep moves on.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use super::titles::TitleService;
use super::versions::{commit_definition, load_title};
use crate::definitions::{format_timestamp, Definition};
use crate::store::records::fields;
use crate::store::{compute_etag, Attributes, Stores, TitleRecord, TitleSummary};
use crate::types::{PatchError, Result};

/// Default bound on one definition fetch
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("Request failed: {0}")]
    Network(String),

    #[error("HTTP {0}")]
    Status(u16),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("HTTP client setup failed: {0}")]
    Client(String),
}

/// Retrieves a definition document from its source URL
#[async_trait]
pub trait DefinitionFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> std::result::Result<Bytes, FetchError>;
}

/// Fetches definitions over HTTP(S)
#[derive(Clone)]
pub struct HttpFetcher {
    http_client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> std::result::Result<Self, FetchError> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent("communitypatch-sync/1.0")
            .build()
            .map_err(|e| FetchError::Client(e.to_string()))?;
        Ok(Self { http_client })
    }
}

#[async_trait]
impl DefinitionFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> std::result::Result<Bytes, FetchError> {
        let response = self
            .http_client
            .get(url)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| FetchError::Network(e.to_string()))?;

        if !response.status().is_success() {
            return Err(FetchError::Status(response.status().as_u16()));
        }

        response
            .bytes()
            .await
            .map_err(|e| FetchError::Network(e.to_string()))
    }
}

/// Body of a subscription request
#[derive(Debug, Clone, Deserialize)]
pub struct SubscribeRequest {
    pub json_url: String,
}

/// Outcome counts of one sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub checked: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub failed: usize,
}

/// Hash of the canonical serialization
fn canonical_hash(document: &Definition) -> Result<String> {
    let bytes = document
        .to_vec()
        .map_err(|e| PatchError::Internal(format!("Failed to encode definition: {}", e)))?;
    Ok(compute_etag(&bytes))
}

#[derive(Clone)]
pub struct SubscriptionSync {
    stores: Stores,
    titles: TitleService,
    fetcher: Arc<dyn DefinitionFetcher>,
    fetch_timeout: Duration,
}

impl SubscriptionSync {
    pub fn new(
        stores: Stores,
        titles: TitleService,
        fetcher: Arc<dyn DefinitionFetcher>,
        fetch_timeout: Duration,
    ) -> Self {
        Self {
            stores,
            titles,
            fetcher,
            fetch_timeout,
        }
    }

    /// Fetch, parse and validate a remote definition
    async fn fetch_definition(&self, url: &str) -> Result<Definition> {
        let fetched = tokio::time::timeout(self.fetch_timeout, self.fetcher.fetch(url))
            .await
            .map_err(|_| FetchError::Timeout(self.fetch_timeout))
            .and_then(|r| r);
        let bytes = fetched.map_err(|e| {
            PatchError::Validation(format!("Unable to load definition from '{}': {}", url, e))
        })?;

        let document = Definition::from_slice(&bytes).map_err(|e| {
            PatchError::Validation(format!("The definition at '{}' is invalid: {}", url, e))
        })?;
        document.validate().map_err(|e| {
            PatchError::Validation(format!("The definition at '{}' is invalid: {}", url, e))
        })?;
        Ok(document)
    }

    /// Create a read-only title mirroring `request.json_url`
    pub async fn subscribe(&self, contributor_id: &str, request: SubscribeRequest) -> Result<TitleSummary> {
        let url = reqwest::Url::parse(&request.json_url)
            .map_err(|e| PatchError::Validation(format!("Invalid URL: {}", e)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(PatchError::Validation(
                "Subscription URLs must use http or https".into(),
            ));
        }

        let document = self.fetch_definition(url.as_str()).await?;
        let summary = self
            .titles
            .create_with_sync(contributor_id, document, Some(url.to_string()))
            .await?;

        info!(contributor = %contributor_id, title = %summary.id, url = %url, "Subscribed to definition");
        Ok(summary)
    }

    /// Refresh one subscribed title; `true` when its content changed
    pub async fn sync_title(&self, record: &TitleRecord) -> Result<bool> {
        let url = record.sync_url.as_deref().ok_or_else(|| {
            PatchError::Validation(format!("The title '{}' has no sync URL", record.title_id))
        })?;

        let mut fetched = self.fetch_definition(url).await?;
        // The mirror keeps the id it was registered under
        fetched.id = record.title_id.clone();

        let loaded = load_title(&self.stores, &record.contributor_id, &record.title_id).await?;
        if canonical_hash(&fetched)? == canonical_hash(&loaded.document)? {
            debug!(title = %record.title_id, "Definition hashes match: no update");
            self.titles.record_sync_result(&loaded.record, true).await?;
            return Ok(false);
        }

        let mut extra = Attributes::new();
        extra.insert(fields::LAST_SYNC_RESULT.into(), Value::Bool(true));
        extra.insert(
            fields::LAST_SYNC_TIME.into(),
            Value::String(format_timestamp(Utc::now())),
        );
        commit_definition(&self.stores, &loaded, &fetched, extra).await?;

        info!(
            contributor = %record.contributor_id,
            title = %record.title_id,
            current = %fetched.current_version,
            "Definition hashes differ: mirror updated"
        );
        Ok(true)
    }

    /// Refresh every subscribed title
    pub async fn sweep(&self) -> Result<SyncReport> {
        let mut report = SyncReport::default();
        let subscribed = self
            .stores
            .all_titles()
            .await?
            .into_iter()
            .filter(|r| r.is_synced && r.sync_url.is_some());

        for record in subscribed {
            report.checked += 1;
            match self.sync_title(&record).await {
                Ok(true) => report.updated += 1,
                Ok(false) => report.unchanged += 1,
                Err(e) => {
                    report.failed += 1;
                    warn!(
                        contributor = %record.contributor_id,
                        title = %record.title_id,
                        url = ?record.sync_url,
                        error = %e,
                        "Definition sync failed"
                    );
                    if let Err(e) = self.titles.record_sync_result(&record, false).await {
                        warn!(title = %record.title_id, error = %e, "Could not record sync failure");
                    }
                }
            }
        }

        info!(
            checked = report.checked,
            updated = report.updated,
            unchanged = report.unchanged,
            failed = report.failed,
            "Subscription sync sweep finished"
        );
        Ok(report)
    }
}

/// Spawn the periodic sync sweep
pub fn spawn_sync_task(sync: SubscriptionSync, interval: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            if let Err(e) = sync.sweep().await {
                warn!(error = %e, "Subscription sync sweep aborted");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definitions::document::tests::sample_json;
    use crate::services::testing::{test_stores, CID};
    use std::collections::HashMap;
    use tokio::sync::RwLock;
    use tokio_test::{assert_err, assert_ok};

    /// Serves canned bodies by URL
    #[derive(Default)]
    struct StaticFetcher {
        bodies: RwLock<HashMap<String, Bytes>>,
    }

    impl StaticFetcher {
        async fn serve(&self, url: &str, body: Value) {
            self.bodies
                .write()
                .await
                .insert(url.to_string(), Bytes::from(serde_json::to_vec(&body).unwrap()));
        }
    }

    #[async_trait]
    impl DefinitionFetcher for StaticFetcher {
        async fn fetch(&self, url: &str) -> std::result::Result<Bytes, FetchError> {
            self.bodies
                .read()
                .await
                .get(url)
                .cloned()
                .ok_or(FetchError::Status(404))
        }
    }

    const URL: &str = "https://example.com/firefox.json";

    #[test]
    fn test_http_fetcher_builds_with_timeout() {
        assert_ok!(HttpFetcher::new(Duration::from_millis(250)));
    }

    fn setup() -> (Stores, Arc<StaticFetcher>, SubscriptionSync) {
        let stores = test_stores();
        let fetcher = Arc::new(StaticFetcher::default());
        let sync = SubscriptionSync::new(
            stores.clone(),
            TitleService::new(stores.clone()),
            fetcher.clone(),
            DEFAULT_FETCH_TIMEOUT,
        );
        (stores, fetcher, sync)
    }

    #[tokio::test]
    async fn test_subscribe_creates_synced_title() {
        let (stores, fetcher, sync) = setup();
        fetcher.serve(URL, sample_json(&["2.0", "1.0"])).await;

        let summary = sync
            .subscribe(CID, SubscribeRequest { json_url: URL.into() })
            .await
            .unwrap();
        assert_eq!(summary.id, "firefox");

        let record = stores.title(CID, "firefox").await.unwrap().unwrap();
        assert!(record.is_synced);
        assert_eq!(record.sync_url.as_deref(), Some(URL));
    }

    #[tokio::test]
    async fn test_subscribe_rejects_bad_sources() {
        let (_, fetcher, sync) = setup();
        let err = assert_err!(
            sync.subscribe(CID, SubscribeRequest { json_url: "ftp://example.com/x".into() })
                .await
        );
        assert!(matches!(err, PatchError::Validation(_)));

        let err = sync
            .subscribe(CID, SubscribeRequest { json_url: URL.into() })
            .await
            .unwrap_err();
        assert!(matches!(err, PatchError::Validation(_)));

        fetcher.serve(URL, serde_json::json!({ "id": "broken" })).await;
        let err = sync
            .subscribe(CID, SubscribeRequest { json_url: URL.into() })
            .await
            .unwrap_err();
        assert!(matches!(err, PatchError::Validation(_)));
    }

    #[tokio::test]
    async fn test_sweep_updates_changed_and_skips_unchanged() {
        let (stores, fetcher, sync) = setup();
        fetcher.serve(URL, sample_json(&["2.0", "1.0"])).await;
        sync.subscribe(CID, SubscribeRequest { json_url: URL.into() })
            .await
            .unwrap();

        let report = sync.sweep().await.unwrap();
        assert_eq!(report, SyncReport { checked: 1, updated: 0, unchanged: 1, failed: 0 });

        let mut upstream = sample_json(&["3.0", "2.0", "1.0"]);
        upstream["lastModified"] = "2024-02-01T00:00:00Z".into();
        fetcher.serve(URL, upstream).await;

        let report = sync.sweep().await.unwrap();
        assert_eq!(report.updated, 1);

        let record = stores.title(CID, "firefox").await.unwrap().unwrap();
        assert_eq!(record.summary.current_version, "3.0");
        assert_eq!(record.last_sync_result, Some(true));
        let object = stores.get_object(&record.blob_key()).await.unwrap();
        assert_eq!(record.blob_etag.as_deref(), Some(object.etag.as_str()));
    }

    #[tokio::test]
    async fn test_sweep_records_failure_and_continues() {
        let (stores, fetcher, sync) = setup();
        let other = "https://example.com/chrome.json";
        fetcher.serve(URL, sample_json(&["1.0"])).await;
        let mut chrome = sample_json(&["9.0"]);
        chrome["id"] = "chrome".into();
        fetcher.serve(other, chrome).await;

        sync.subscribe(CID, SubscribeRequest { json_url: URL.into() }).await.unwrap();
        sync.subscribe(CID, SubscribeRequest { json_url: other.into() }).await.unwrap();

        // Source goes away
        fetcher.bodies.write().await.remove(URL);

        let report = assert_ok!(sync.sweep().await);
        assert_eq!(report.checked, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(report.unchanged, 1);

        let failed = stores.title(CID, "firefox").await.unwrap().unwrap();
        assert_eq!(failed.last_sync_result, Some(false));
        assert!(failed.last_sync_time.is_some());
    }
}
