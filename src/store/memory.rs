//! In-memory store adapters for tests and dev mode

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::RwLock;

use super::catalog::{set_path, Attributes, CatalogStore, Condition, Item, ItemKey};
use super::objects::{compute_etag, ObjectStore, PutCondition, StoredObject};
use super::{StoreError, StoreResult};

/// Catalog held in a sorted map; one write lock per call makes every
/// condition check atomic with its write.
#[derive(Default)]
pub struct MemoryCatalogStore {
    items: RwLock<BTreeMap<ItemKey, Attributes>>,
}

impl MemoryCatalogStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.items.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.items.read().await.is_empty()
    }
}

#[async_trait]
impl CatalogStore for MemoryCatalogStore {
    async fn get_item(&self, key: &ItemKey) -> StoreResult<Option<Item>> {
        let items = self.items.read().await;
        Ok(items.get(key).map(|attributes| Item {
            key: key.clone(),
            attributes: attributes.clone(),
        }))
    }

    async fn put_item(&self, item: Item, condition: Condition) -> StoreResult<()> {
        let mut items = self.items.write().await;
        if !condition.holds(items.get(&item.key)) {
            return Err(StoreError::ConditionFailed);
        }
        items.insert(item.key, item.attributes);
        Ok(())
    }

    async fn update_item(
        &self,
        key: &ItemKey,
        set: Attributes,
        condition: Condition,
    ) -> StoreResult<Item> {
        let mut items = self.items.write().await;
        if !condition.holds(items.get(key)) {
            return Err(StoreError::ConditionFailed);
        }
        let attributes = items.entry(key.clone()).or_default();
        for (path, value) in set {
            set_path(attributes, &path, value);
        }
        Ok(Item {
            key: key.clone(),
            attributes: attributes.clone(),
        })
    }

    async fn delete_item(&self, key: &ItemKey, condition: Condition) -> StoreResult<()> {
        let mut items = self.items.write().await;
        if !condition.holds(items.get(key)) {
            return Err(StoreError::ConditionFailed);
        }
        items.remove(key);
        Ok(())
    }

    async fn query(&self, partition: &str) -> StoreResult<Vec<Item>> {
        let items = self.items.read().await;
        Ok(items
            .iter()
            .filter(|(key, _)| key.partition == partition)
            .map(|(key, attributes)| Item {
                key: key.clone(),
                attributes: attributes.clone(),
            })
            .collect())
    }

    async fn scan(&self) -> StoreResult<Vec<Item>> {
        let items = self.items.read().await;
        Ok(items
            .iter()
            .map(|(key, attributes)| Item {
                key: key.clone(),
                attributes: attributes.clone(),
            })
            .collect())
    }
}

/// Object store held in a map
#[derive(Default)]
pub struct MemoryObjectStore {
    objects: RwLock<HashMap<String, StoredObject>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn contains(&self, key: &str) -> bool {
        self.objects.read().await.contains_key(key)
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn get_object(&self, key: &str) -> StoreResult<StoredObject> {
        self.objects
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }

    async fn put_object(
        &self,
        key: &str,
        bytes: Bytes,
        condition: PutCondition,
    ) -> StoreResult<String> {
        let mut objects = self.objects.write().await;
        let current = objects.get(key).map(|o| o.etag.as_str());
        if !condition.holds(current) {
            return Err(StoreError::ConditionFailed);
        }
        let etag = compute_etag(&bytes);
        objects.insert(
            key.to_string(),
            StoredObject {
                bytes,
                etag: etag.clone(),
            },
        );
        Ok(etag)
    }

    async fn delete_object(&self, key: &str) -> StoreResult<()> {
        self.objects.write().await.remove(key);
        Ok(())
    }
}
