//! Title lifecycle: create, read, replace, delete, and the listing views
//! served to Jamf

use std::collections::HashSet;

use bytes::Bytes;
use chrono::Utc;
use serde_json::Value;
use tracing::{error, info, warn};

use super::versions::{commit_definition, load_title, title_not_found};
use crate::definitions::{format_timestamp, normalize_title_id, Definition};
use crate::store::records::{fields, TITLE_PREFIX};
use crate::store::{
    compute_etag, Attributes, CatalogRecord, Condition, PutCondition, StoreError, Stores,
    TitleRecord, TitleSummary,
};
use crate::types::{PatchError, Result};

#[derive(Clone)]
pub struct TitleService {
    stores: Stores,
}

impl TitleService {
    pub fn new(stores: Stores) -> Self {
        Self { stores }
    }

    /// Create a title owned by the contributor
    pub async fn create(&self, contributor_id: &str, document: Definition) -> Result<TitleSummary> {
        self.create_with_sync(contributor_id, document, None).await
    }

    /// Create a title; with a sync URL the title is a read-only mirror
    pub(crate) async fn create_with_sync(
        &self,
        contributor_id: &str,
        mut document: Definition,
        sync_url: Option<String>,
    ) -> Result<TitleSummary> {
        document.validate()?;
        document.normalize_id();

        let bytes = document
            .to_vec()
            .map_err(|e| PatchError::Internal(format!("Failed to encode definition: {}", e)))?;
        let synced = sync_url.is_some();
        let record = TitleRecord {
            contributor_id: contributor_id.to_string(),
            title_id: document.id.clone(),
            summary: document.summary(),
            blob_etag: Some(compute_etag(&bytes)),
            is_synced: synced,
            sync_url,
            last_sync_result: synced.then_some(true),
            last_sync_time: synced.then(|| format_timestamp(Utc::now())),
        };

        match self.stores.put_record(&record, Condition::NotExists).await {
            Ok(()) => {}
            Err(StoreError::ConditionFailed) => {
                return Err(PatchError::Conflict(format!(
                    "You have already created a title with the ID '{}'",
                    record.title_id
                )));
            }
            Err(e) => return Err(e.into()),
        }

        if let Err(e) = self.write_new_blob(&record, Bytes::from(bytes)).await {
            error!(
                contributor = %contributor_id,
                title = %record.title_id,
                error = %e,
                "Definition blob write failed; removing catalog record"
            );
            if let Err(cleanup) = self
                .stores
                .delete_item(&record.key(), Condition::Exists)
                .await
            {
                error!(
                    contributor = %contributor_id,
                    title = %record.title_id,
                    error = %cleanup,
                    "Catalog record left without a blob"
                );
            }
            return Err(PatchError::Internal(format!(
                "Failed to store definition '{}': {}",
                record.title_id, e
            )));
        }

        info!(
            contributor = %contributor_id,
            title = %record.title_id,
            synced,
            "Title created"
        );
        Ok(record.summary)
    }

    /// A blob already at the key of a record that did not exist is an orphan
    /// from an earlier failed delete; it is replaced.
    async fn write_new_blob(&self, record: &TitleRecord, bytes: Bytes) -> std::result::Result<String, StoreError> {
        let key = record.blob_key();
        match self
            .stores
            .put_object(&key, bytes.clone(), PutCondition::IfNoneMatch)
            .await
        {
            Err(StoreError::ConditionFailed) => {
                warn!(key = %key, "Replacing orphaned definition blob");
                self.stores.put_object(&key, bytes, PutCondition::Any).await
            }
            other => other,
        }
    }

    pub async fn read(&self, contributor_id: &str, title_id: &str) -> Result<Definition> {
        let title_id = normalize_title_id(title_id)?;
        Ok(load_title(&self.stores, contributor_id, &title_id)
            .await?
            .document)
    }

    /// Replace the whole definition. `lastModified` is stamped with the
    /// time of the write; the caller's value is discarded.
    pub async fn replace(
        &self,
        contributor_id: &str,
        title_id: &str,
        mut document: Definition,
    ) -> Result<TitleSummary> {
        let title_id = normalize_title_id(title_id)?;
        document.normalize_id();
        if document.id != title_id {
            return Err(PatchError::Conflict(format!(
                "The definition ID '{}' does not match the title ID '{}'",
                document.id, title_id
            )));
        }
        document.validate()?;
        document.touch(Utc::now());

        let loaded = load_title(&self.stores, contributor_id, &title_id).await?;
        if loaded.record.is_synced {
            return Err(PatchError::Forbidden);
        }
        commit_definition(&self.stores, &loaded, &document, Attributes::new()).await?;

        info!(contributor = %contributor_id, title = %title_id, "Title replaced");
        Ok(document.summary())
    }

    pub async fn delete(&self, contributor_id: &str, title_id: &str) -> Result<()> {
        let title_id = normalize_title_id(title_id)?;
        let key = TitleRecord::key_for(contributor_id, &title_id);
        match self.stores.delete_item(&key, Condition::Exists).await {
            Ok(()) => {}
            Err(StoreError::ConditionFailed) => return Err(title_not_found(&title_id)),
            Err(e) => return Err(e.into()),
        }

        let blob_key = crate::store::definition_key(contributor_id, &title_id);
        if let Err(e) = self.stores.delete_object(&blob_key).await {
            error!(key = %blob_key, error = %e, "Catalog record deleted but definition blob orphaned");
            return Err(PatchError::Internal(format!(
                "Failed to delete definition '{}': {}",
                title_id, e
            )));
        }

        info!(contributor = %contributor_id, title = %title_id, "Title deleted");
        Ok(())
    }

    async fn titles(&self, contributor_id: &str) -> Result<Vec<TitleRecord>> {
        Ok(self
            .stores
            .query(contributor_id)
            .await?
            .into_iter()
            .filter(|item| item.key.sort.starts_with(TITLE_PREFIX))
            .filter_map(|item| {
                TitleRecord::from_item(item)
                    .map_err(|e| warn!(contributor = %contributor_id, error = %e, "Skipping undecodable title record"))
                    .ok()
            })
            .collect())
    }

    /// Every title summary of a contributor; `extend` adds sync status
    pub async fn list_summaries(&self, contributor_id: &str, extend: bool) -> Result<Vec<Value>> {
        let mut summaries = Vec::new();
        for record in self.titles(contributor_id).await? {
            let value = if extend {
                Value::Object(record.extended_summary()?)
            } else {
                serde_json::to_value(&record.summary)
                    .map_err(|e| PatchError::Internal(e.to_string()))?
            };
            summaries.push(value);
        }
        Ok(summaries)
    }

    /// Summaries for the requested ids, in request order. Unknown ids are
    /// skipped; so are ids whose lookup fails.
    pub async fn select_summaries(&self, contributor_id: &str, ids: &[String]) -> Result<Vec<TitleSummary>> {
        let mut seen = HashSet::new();
        let mut summaries = Vec::new();
        for id in ids {
            let Ok(id) = normalize_title_id(id.trim()) else {
                continue;
            };
            if !seen.insert(id.clone()) {
                continue;
            }
            match self.stores.title(contributor_id, &id).await {
                Ok(Some(record)) => summaries.push(record.summary),
                Ok(None) => {}
                Err(e) => warn!(contributor = %contributor_id, title = %id, error = %e, "Title lookup failed"),
            }
        }
        Ok(summaries)
    }

    /// Record the outcome of a sync attempt on a title
    pub(crate) async fn record_sync_result(&self, record: &TitleRecord, success: bool) -> Result<()> {
        let mut set = Attributes::new();
        set.insert(fields::LAST_SYNC_RESULT.into(), Value::Bool(success));
        set.insert(
            fields::LAST_SYNC_TIME.into(),
            Value::String(format_timestamp(Utc::now())),
        );
        self.stores
            .update_item(&record.key(), set, Condition::Exists)
            .await?;
        Ok(())
    }
}
