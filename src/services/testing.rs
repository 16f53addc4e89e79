//! Shared fixtures for service tests

use std::sync::Arc;

use bytes::Bytes;

use crate::definitions::document::tests::sample;
use crate::store::{
    compute_etag, CatalogRecord, Condition, MemoryCatalogStore, MemoryObjectStore, PutCondition,
    Stores, TitleRecord, DEFAULT_STORE_TIMEOUT,
};

pub(crate) const CID: &str = "0123456789abcdef0123456789abcdef";

pub(crate) fn test_stores() -> Stores {
    Stores::new(
        Arc::new(MemoryCatalogStore::new()),
        Arc::new(MemoryObjectStore::new()),
        DEFAULT_STORE_TIMEOUT,
    )
}

/// Write a consistent record/blob pair for `title_id`
pub(crate) async fn seed_title(stores: &Stores, title_id: &str, versions: &[&str]) -> TitleRecord {
    let mut doc = sample(versions);
    doc.id = title_id.to_string();
    let bytes = doc.to_vec().unwrap();

    let record = TitleRecord {
        contributor_id: CID.into(),
        title_id: title_id.into(),
        summary: doc.summary(),
        blob_etag: Some(compute_etag(&bytes)),
        is_synced: false,
        sync_url: None,
        last_sync_result: None,
        last_sync_time: None,
    };
    stores
        .put_object(&record.blob_key(), Bytes::from(bytes), PutCondition::Any)
        .await
        .unwrap();
    stores
        .put_item(record.to_item().unwrap(), Condition::None)
        .await
        .unwrap();
    record
}
