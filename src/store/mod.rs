//! Storage layer for CommunityPatch
//!
//! Two collaborators sit behind traits: the key-value [`CatalogStore`] and the
//! blob [`ObjectStore`]. [`Stores`] bundles both and bounds every call with
//! the configured timeout.

pub mod catalog;
pub mod fs;
pub mod memory;
pub mod mongo;
pub mod objects;
pub mod records;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use crate::types::PatchError;

pub use catalog::{Attributes, CatalogStore, Condition, Item, ItemKey};
pub use fs::FsObjectStore;
pub use memory::{MemoryCatalogStore, MemoryObjectStore};
pub use mongo::MongoCatalogStore;
pub use objects::{compute_etag, ObjectStore, PutCondition, StoredObject};
pub use records::{
    definition_key, CatalogRecord, ContributorRecord, RevokedTokenRecord, TitleRecord,
    TitleSummary,
};

/// Default bound on a single store call
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Condition check failed")]
    ConditionFailed,

    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Store call timed out after {0:?}")]
    Timeout(Duration),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Backend error: {0}")]
    Backend(String),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        Self::Backend(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<bson::ser::Error> for StoreError {
    fn from(err: bson::ser::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<bson::de::Error> for StoreError {
    fn from(err: bson::de::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<mongodb::error::Error> for StoreError {
    fn from(err: mongodb::error::Error) -> Self {
        Self::Backend(err.to_string())
    }
}

/// Store failures that the calling operation did not map to a business
/// outcome are internal errors.
impl From<StoreError> for PatchError {
    fn from(err: StoreError) -> Self {
        PatchError::Internal(format!("Store error: {}", err))
    }
}

/// Run a store call under a deadline
pub async fn bounded<T, F>(limit: Duration, call: F) -> StoreResult<T>
where
    F: Future<Output = StoreResult<T>>,
{
    tokio::time::timeout(limit, call)
        .await
        .map_err(|_| StoreError::Timeout(limit))?
}

/// Both stores plus the per-call timeout
#[derive(Clone)]
pub struct Stores {
    catalog: Arc<dyn CatalogStore>,
    objects: Arc<dyn ObjectStore>,
    timeout: Duration,
}

impl Stores {
    pub fn new(
        catalog: Arc<dyn CatalogStore>,
        objects: Arc<dyn ObjectStore>,
        timeout: Duration,
    ) -> Self {
        Self {
            catalog,
            objects,
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub async fn get_item(&self, key: &ItemKey) -> StoreResult<Option<Item>> {
        bounded(self.timeout, self.catalog.get_item(key)).await
    }

    pub async fn put_item(&self, item: Item, condition: Condition) -> StoreResult<()> {
        bounded(self.timeout, self.catalog.put_item(item, condition)).await
    }

    pub async fn update_item(
        &self,
        key: &ItemKey,
        set: Attributes,
        condition: Condition,
    ) -> StoreResult<Item> {
        bounded(self.timeout, self.catalog.update_item(key, set, condition)).await
    }

    pub async fn delete_item(&self, key: &ItemKey, condition: Condition) -> StoreResult<()> {
        bounded(self.timeout, self.catalog.delete_item(key, condition)).await
    }

    pub async fn query(&self, partition: &str) -> StoreResult<Vec<Item>> {
        bounded(self.timeout, self.catalog.query(partition)).await
    }

    pub async fn scan(&self) -> StoreResult<Vec<Item>> {
        bounded(self.timeout, self.catalog.scan()).await
    }

    pub async fn get_object(&self, key: &str) -> StoreResult<StoredObject> {
        bounded(self.timeout, self.objects.get_object(key)).await
    }

    pub async fn put_object(
        &self,
        key: &str,
        bytes: Bytes,
        condition: PutCondition,
    ) -> StoreResult<String> {
        bounded(self.timeout, self.objects.put_object(key, bytes, condition)).await
    }

    pub async fn delete_object(&self, key: &str) -> StoreResult<()> {
        bounded(self.timeout, self.objects.delete_object(key)).await
    }

    pub async fn put_record<R: CatalogRecord + Sync>(
        &self,
        record: &R,
        condition: Condition,
    ) -> StoreResult<()> {
        self.put_item(record.to_item()?, condition).await
    }

    pub async fn get_record<R: CatalogRecord>(&self, key: &ItemKey) -> StoreResult<Option<R>> {
        self.get_item(key).await?.map(R::from_item).transpose()
    }

    pub async fn title(&self, contributor_id: &str, title_id: &str) -> StoreResult<Option<TitleRecord>> {
        self.get_record(&TitleRecord::key_for(contributor_id, title_id))
            .await
    }

    pub async fn contributor(&self, contributor_id: &str) -> StoreResult<Option<ContributorRecord>> {
        self.get_record(&ContributorRecord::key_for(contributor_id))
            .await
    }

    pub async fn is_revoked(&self, contributor_id: &str, jti: &str) -> StoreResult<bool> {
        Ok(self
            .get_item(&RevokedTokenRecord::key_for(contributor_id, jti))
            .await?
            .is_some())
    }

    /// Every title record in the catalog; undecodable items are skipped.
    pub async fn all_titles(&self) -> StoreResult<Vec<TitleRecord>> {
        Ok(self
            .scan()
            .await?
            .into_iter()
            .filter(|item| item.key.sort.starts_with(records::TITLE_PREFIX))
            .filter_map(|item| {
                let key = item.key.clone();
                TitleRecord::from_item(item)
                    .map_err(|e| {
                        tracing::warn!(partition = %key.partition, sort = %key.sort, error = %e, "Skipping undecodable title record");
                    })
                    .ok()
            })
            .collect())
    }
}
