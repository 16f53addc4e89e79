//! Version add/delete against the stores
//!
//! Commit order: the definition blob is written first under an `IfMatch`
//! precondition on the ETag that was read, then the catalog summary is
//! updated under a condition on the `blob_etag` the record carried when it
//! was read. A lost blob race is a `ConcurrentModification`. A summary
//! failure after the blob landed leaves the two stores diverged; it is
//! reported as `Internal` and repaired by the reconciliation sweep.

use chrono::Utc;
use serde_json::Value;
use tracing::{error, info};

use crate::definitions::{self, normalize_title_id, Definition, Placement, VersionEntry};
use crate::store::records::fields;
use crate::store::{Attributes, Condition, PutCondition, StoreError, Stores, TitleRecord};
use crate::types::{PatchError, Result};

/// A title's catalog record and the blob it points at
#[derive(Debug, Clone)]
pub(crate) struct LoadedTitle {
    pub record: TitleRecord,
    pub document: Definition,
    pub etag: String,
}

pub(crate) fn title_not_found(title_id: &str) -> PatchError {
    PatchError::NotFound(format!("The title '{}' was not found", title_id))
}

pub(crate) async fn load_title(
    stores: &Stores,
    contributor_id: &str,
    title_id: &str,
) -> Result<LoadedTitle> {
    let record = stores
        .title(contributor_id, title_id)
        .await?
        .ok_or_else(|| title_not_found(title_id))?;

    let object = match stores.get_object(&record.blob_key()).await {
        Ok(object) => object,
        Err(StoreError::NotFound(key)) => {
            error!(
                contributor = %contributor_id,
                title = %title_id,
                key = %key,
                "Catalog record has no definition blob"
            );
            return Err(PatchError::Internal(format!("Missing definition blob {}", key)));
        }
        Err(e) => return Err(e.into()),
    };

    let document = Definition::from_slice(&object.bytes).map_err(|e| {
        PatchError::Internal(format!("Stored definition {} is unreadable: {}", record.blob_key(), e))
    })?;

    Ok(LoadedTitle {
        record,
        document,
        etag: object.etag,
    })
}

/// Summary fields derived from a definition, as dotted-path updates
pub(crate) fn summary_fields(document: &Definition, blob_etag: &str) -> Attributes {
    let mut set = Attributes::new();
    set.insert(fields::CURRENT_VERSION.into(), Value::String(document.current_version.clone()));
    set.insert(fields::LAST_MODIFIED.into(), Value::String(document.last_modified.clone()));
    set.insert(fields::NAME.into(), Value::String(document.name.clone()));
    set.insert(fields::PUBLISHER.into(), Value::String(document.publisher.clone()));
    set.insert(fields::BLOB_ETAG.into(), Value::String(blob_etag.to_string()));
    set
}

/// Write an edited definition back: blob first, then summary.
/// `extra` is merged into the summary update.
pub(crate) async fn commit_definition(
    stores: &Stores,
    loaded: &LoadedTitle,
    updated: &Definition,
    extra: Attributes,
) -> Result<String> {
    let record = &loaded.record;
    let bytes = updated
        .to_vec()
        .map_err(|e| PatchError::Internal(format!("Failed to encode definition: {}", e)))?;

    let new_etag = match stores
        .put_object(&record.blob_key(), bytes.into(), PutCondition::IfMatch(loaded.etag.clone()))
        .await
    {
        Ok(etag) => etag,
        Err(StoreError::ConditionFailed) => {
            return Err(PatchError::ConcurrentModification(format!(
                "The title '{}' was modified by another request",
                record.title_id
            )));
        }
        Err(e) => return Err(e.into()),
    };

    let mut set = summary_fields(updated, &new_etag);
    set.extend(extra);

    let key = TitleRecord::key_for(&record.contributor_id, &record.title_id);
    let condition = Condition::equals(fields::BLOB_ETAG, record.etag_value());
    if let Err(e) = stores.update_item(&key, set, condition).await {
        error!(
            contributor = %record.contributor_id,
            title = %record.title_id,
            blob_etag = %new_etag,
            error = %e,
            "Definition written but catalog summary not updated; stores diverged until reconciliation"
        );
        return Err(PatchError::Internal(format!(
            "Summary update for '{}' failed: {}",
            record.title_id, e
        )));
    }

    Ok(new_etag)
}

#[derive(Clone)]
pub struct VersionService {
    stores: Stores,
}

impl VersionService {
    pub fn new(stores: Stores) -> Self {
        Self { stores }
    }

    /// Insert a version entry at the requested position
    pub async fn add_version(
        &self,
        contributor_id: &str,
        title_id: &str,
        entry: VersionEntry,
        placement: &Placement,
    ) -> Result<Definition> {
        entry.validate()?;
        let title_id = normalize_title_id(title_id)?;
        let loaded = load_title(&self.stores, contributor_id, &title_id).await?;

        let version = entry.version.clone();
        let updated = definitions::add_version(&loaded.document, entry, placement, Utc::now())?;
        commit_definition(&self.stores, &loaded, &updated, Attributes::new()).await?;

        info!(
            contributor = %contributor_id,
            title = %title_id,
            version = %version,
            current = %updated.current_version,
            "Version added"
        );
        Ok(updated)
    }

    /// Remove a version entry
    pub async fn delete_version(
        &self,
        contributor_id: &str,
        title_id: &str,
        version: &str,
    ) -> Result<Definition> {
        let title_id = normalize_title_id(title_id)?;
        let loaded = load_title(&self.stores, contributor_id, &title_id).await?;

        let updated = definitions::delete_version(&loaded.document, version, Utc::now())?;
        commit_definition(&self.stores, &loaded, &updated, Attributes::new()).await?;

        info!(
            contributor = %contributor_id,
            title = %title_id,
            version = %version,
            current = %updated.current_version,
            "Version deleted"
        );
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definitions::document::tests::sample_entry;
    use crate::services::testing::{seed_title, test_stores, CID};
    use crate::store::{MemoryCatalogStore, MemoryObjectStore, ObjectStore, StoreResult, StoredObject};
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::sync::Arc;

    fn versions(doc: &Definition) -> Vec<String> {
        doc.patches.iter().map(|p| p.version.clone()).collect()
    }

    #[tokio::test]
    async fn test_add_version_updates_blob_and_summary() {
        let stores = test_stores();
        seed_title(&stores, "firefox", &["2.0"]).await;
        let service = VersionService::new(stores.clone());

        let updated = service
            .add_version(CID, "Firefox", sample_entry("3.0"), &Placement::default())
            .await
            .unwrap();
        assert_eq!(versions(&updated), vec!["3.0", "2.0"]);

        let loaded = load_title(&stores, CID, "firefox").await.unwrap();
        assert_eq!(loaded.document, updated);
        assert_eq!(loaded.record.summary.current_version, "3.0");
        assert_eq!(loaded.record.summary.last_modified, updated.last_modified);
        assert_eq!(loaded.record.blob_etag.as_deref(), Some(loaded.etag.as_str()));
    }

    #[tokio::test]
    async fn test_insert_after_keeps_current() {
        let stores = test_stores();
        seed_title(&stores, "firefox", &["2.0"]).await;
        let service = VersionService::new(stores.clone());

        let updated = service
            .add_version(CID, "firefox", sample_entry("1.0"), &Placement::after("2.0"))
            .await
            .unwrap();
        assert_eq!(versions(&updated), vec!["2.0", "1.0"]);
        let record = stores.title(CID, "firefox").await.unwrap().unwrap();
        assert_eq!(record.summary.current_version, "2.0");
    }

    #[tokio::test]
    async fn test_duplicate_version_conflicts_and_changes_nothing() {
        let stores = test_stores();
        seed_title(&stores, "firefox", &["2.0", "1.0"]).await;
        let before = load_title(&stores, CID, "firefox").await.unwrap();
        let service = VersionService::new(stores.clone());

        let err = service
            .add_version(CID, "firefox", sample_entry("1.0"), &Placement::default())
            .await
            .unwrap_err();
        assert!(matches!(err, PatchError::Conflict(_)));

        let after = load_title(&stores, CID, "firefox").await.unwrap();
        assert_eq!(after.etag, before.etag);
    }

    #[tokio::test]
    async fn test_incomplete_entry_is_rejected_before_any_write() {
        let stores = test_stores();
        seed_title(&stores, "firefox", &["2.0"]).await;
        let before = load_title(&stores, CID, "firefox").await.unwrap();
        let service = VersionService::new(stores.clone());

        let err = service
            .add_version(CID, "firefox", VersionEntry::new("3.0"), &Placement::default())
            .await
            .unwrap_err();
        assert!(matches!(err, PatchError::Validation(ref m) if m.contains("releaseDate")));

        let after = load_title(&stores, CID, "firefox").await.unwrap();
        assert_eq!(after.etag, before.etag);
    }

    #[tokio::test]
    async fn test_unusable_path_id_is_rejected() {
        let service = VersionService::new(test_stores());
        for bad in ["../firefox", "a/b"] {
            let err = service
                .add_version(CID, bad, sample_entry("1.0"), &Placement::default())
                .await
                .unwrap_err();
            assert!(matches!(err, PatchError::Validation(_)));
            let err = service.delete_version(CID, bad, "1.0").await.unwrap_err();
            assert!(matches!(err, PatchError::Validation(_)));
        }
    }

    #[tokio::test]
    async fn test_missing_title() {
        let service = VersionService::new(test_stores());
        let err = service
            .add_version(CID, "nothing", sample_entry("1.0"), &Placement::default())
            .await
            .unwrap_err();
        assert!(matches!(err, PatchError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_delete_version() {
        let stores = test_stores();
        seed_title(&stores, "firefox", &["3.0", "2.0"]).await;
        let service = VersionService::new(stores.clone());

        let updated = service.delete_version(CID, "firefox", "3.0").await.unwrap();
        assert_eq!(versions(&updated), vec!["2.0"]);
        let record = stores.title(CID, "firefox").await.unwrap().unwrap();
        assert_eq!(record.summary.current_version, "2.0");

        let err = service.delete_version(CID, "firefox", "2.0").await.unwrap_err();
        assert!(matches!(err, PatchError::Validation(_)));
    }

    #[tokio::test]
    async fn test_delete_unknown_version() {
        let stores = test_stores();
        seed_title(&stores, "firefox", &["3.0", "2.0"]).await;
        let service = VersionService::new(stores);
        let err = service.delete_version(CID, "firefox", "9.9").await.unwrap_err();
        assert!(matches!(err, PatchError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_lost_blob_race_is_concurrent_modification() {
        let stores = test_stores();
        seed_title(&stores, "firefox", &["2.0"]).await;
        let loaded = load_title(&stores, CID, "firefox").await.unwrap();

        // Another writer lands first
        stores
            .put_object(&loaded.record.blob_key(), Bytes::from_static(b"{}"), PutCondition::Any)
            .await
            .unwrap();

        let updated =
            definitions::add_version(&loaded.document, VersionEntry::new("3.0"), &Placement::default(), Utc::now())
                .unwrap();
        let err = commit_definition(&stores, &loaded, &updated, Attributes::new())
            .await
            .unwrap_err();
        assert!(matches!(err, PatchError::ConcurrentModification(_)));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_summary_failure_after_blob_write_is_internal() {
        let stores = test_stores();
        seed_title(&stores, "firefox", &["2.0"]).await;
        let loaded = load_title(&stores, CID, "firefox").await.unwrap();

        // The record moves on underneath us
        let mut set = Attributes::new();
        set.insert(fields::BLOB_ETAG.into(), Value::String("sha256-other".into()));
        stores
            .update_item(&TitleRecord::key_for(CID, "firefox"), set, Condition::Exists)
            .await
            .unwrap();

        let updated =
            definitions::add_version(&loaded.document, VersionEntry::new("3.0"), &Placement::default(), Utc::now())
                .unwrap();
        let err = commit_definition(&stores, &loaded, &updated, Attributes::new())
            .await
            .unwrap_err();
        assert!(matches!(err, PatchError::Internal(_)));

        // Blob landed, summary did not
        let object = stores.get_object(&loaded.record.blob_key()).await.unwrap();
        assert_eq!(Definition::from_slice(&object.bytes).unwrap().current_version, "3.0");
        let record = stores.title(CID, "firefox").await.unwrap().unwrap();
        assert_eq!(record.summary.current_version, "2.0");
    }

    struct LostObjects;

    #[async_trait]
    impl ObjectStore for LostObjects {
        async fn get_object(&self, key: &str) -> StoreResult<StoredObject> {
            Err(StoreError::NotFound(key.to_string()))
        }
        async fn put_object(&self, _key: &str, bytes: Bytes, _c: PutCondition) -> StoreResult<String> {
            Ok(crate::store::compute_etag(&bytes))
        }
        async fn delete_object(&self, _key: &str) -> StoreResult<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_missing_blob_is_internal() {
        let catalog = Arc::new(MemoryCatalogStore::new());
        let seeded = test_stores_with(catalog.clone(), Arc::new(MemoryObjectStore::new()));
        seed_title(&seeded, "firefox", &["2.0"]).await;

        let stores = test_stores_with(catalog, Arc::new(LostObjects));
        let service = VersionService::new(stores);
        let err = service
            .add_version(CID, "firefox", sample_entry("3.0"), &Placement::default())
            .await
            .unwrap_err();
        assert!(matches!(err, PatchError::Internal(_)));
    }

    fn test_stores_with(
        catalog: Arc<MemoryCatalogStore>,
        objects: Arc<dyn ObjectStore>,
    ) -> Stores {
        Stores::new(catalog, objects, crate::store::DEFAULT_STORE_TIMEOUT)
    }
}
