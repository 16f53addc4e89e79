//! MongoDB catalog store
//!
//! One collection holds every catalog item as
//! `{ pk, sk, attributes: { ... } }` with a unique index on `(pk, sk)`.
//! Conditions become part of the write filter, so a write that matches
//! nothing (or collides with the unique index) is a failed condition.

use async_trait::async_trait;
use bson::{doc, Bson, Document};
use futures_util::TryStreamExt;
use mongodb::{
    error::{CommandError, ErrorKind, WriteError, WriteFailure},
    options::{IndexOptions, ReturnDocument},
    Client, Collection, IndexModel,
};
use tracing::info;

use super::catalog::{set_path, Attributes, CatalogStore, Condition, Item, ItemKey};
use super::{StoreError, StoreResult};

const DUPLICATE_KEY: i32 = 11000;

#[derive(Clone)]
pub struct MongoCatalogStore {
    collection: Collection<Document>,
}

impl MongoCatalogStore {
    /// Connect, verify the connection and apply the key index
    pub async fn connect(uri: &str, db_name: &str, collection: &str) -> StoreResult<Self> {
        info!("Connecting to MongoDB at {}", uri);

        // Fail fast when MongoDB is unreachable
        let timeout_uri = if uri.contains('?') {
            format!("{}&serverSelectionTimeoutMS=3000&connectTimeoutMS=3000", uri)
        } else {
            format!("{}?serverSelectionTimeoutMS=3000&connectTimeoutMS=3000", uri)
        };

        let client = Client::with_uri_str(&timeout_uri)
            .await
            .map_err(|e| StoreError::Backend(format!("Failed to connect to MongoDB: {}", e)))?;

        client
            .database(db_name)
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|e| StoreError::Backend(format!("MongoDB ping failed: {}", e)))?;

        info!("Connected to MongoDB database '{}'", db_name);

        let store = Self {
            collection: client.database(db_name).collection(collection),
        };
        store.apply_indexes().await?;
        Ok(store)
    }

    async fn apply_indexes(&self) -> StoreResult<()> {
        let index = IndexModel::builder()
            .keys(doc! { "pk": 1, "sk": 1 })
            .options(IndexOptions::builder().unique(true).build())
            .build();

        self.collection
            .create_index(index)
            .await
            .map_err(|e| StoreError::Backend(format!("Failed to create indexes: {}", e)))?;
        Ok(())
    }

    fn key_filter(key: &ItemKey) -> Document {
        doc! { "pk": key.partition.as_str(), "sk": key.sort.as_str() }
    }

    fn condition_filter(key: &ItemKey, condition: &Condition) -> StoreResult<Document> {
        let mut filter = Self::key_filter(key);
        if let Condition::Equals { path, value } = condition {
            // `{ field: null }` also matches a missing field
            filter.insert(format!("attributes.{}", path), bson::to_bson(value)?);
        }
        Ok(filter)
    }

    fn to_document(item: &Item) -> StoreResult<Document> {
        Ok(doc! {
            "pk": item.key.partition.as_str(),
            "sk": item.key.sort.as_str(),
            "attributes": bson::to_document(&item.attributes)?,
        })
    }

    fn from_document(mut doc: Document) -> StoreResult<Item> {
        let partition = doc.get_str("pk").map_err(|e| StoreError::Serialization(e.to_string()))?;
        let sort = doc.get_str("sk").map_err(|e| StoreError::Serialization(e.to_string()))?;
        let key = ItemKey::new(partition, sort);
        let attributes = match doc.remove("attributes") {
            Some(Bson::Document(attrs)) => bson::from_document::<Attributes>(attrs)?,
            _ => Attributes::new(),
        };
        Ok(Item { key, attributes })
    }

    fn set_document(set: &Attributes) -> StoreResult<Document> {
        let mut update = Document::new();
        for (path, value) in set {
            update.insert(format!("attributes.{}", path), bson::to_bson(value)?);
        }
        Ok(doc! { "$set": update })
    }
}

/// Unique index collisions from inserts and upserts
fn is_duplicate_key(err: &mongodb::error::Error) -> bool {
    matches!(
        err.kind.as_ref(),
        ErrorKind::Write(WriteFailure::WriteError(WriteError { code: DUPLICATE_KEY, .. }))
            | ErrorKind::Command(CommandError { code: DUPLICATE_KEY, .. })
    )
}

fn map_write_error(err: mongodb::error::Error) -> StoreError {
    if is_duplicate_key(&err) {
        StoreError::ConditionFailed
    } else {
        err.into()
    }
}

#[async_trait]
impl CatalogStore for MongoCatalogStore {
    async fn get_item(&self, key: &ItemKey) -> StoreResult<Option<Item>> {
        self.collection
            .find_one(Self::key_filter(key))
            .await?
            .map(Self::from_document)
            .transpose()
    }

    async fn put_item(&self, item: Item, condition: Condition) -> StoreResult<()> {
        let document = Self::to_document(&item)?;
        match condition {
            Condition::NotExists => {
                self.collection
                    .insert_one(document)
                    .await
                    .map_err(map_write_error)?;
            }
            Condition::None => {
                self.collection
                    .replace_one(Self::key_filter(&item.key), document)
                    .upsert(true)
                    .await
                    .map_err(map_write_error)?;
            }
            Condition::Exists | Condition::Equals { .. } => {
                let filter = Self::condition_filter(&item.key, &condition)?;
                let result = self.collection.replace_one(filter, document).await?;
                if result.matched_count == 0 {
                    return Err(StoreError::ConditionFailed);
                }
            }
        }
        Ok(())
    }

    async fn update_item(
        &self,
        key: &ItemKey,
        set: Attributes,
        condition: Condition,
    ) -> StoreResult<Item> {
        if let Condition::NotExists = condition {
            let mut attributes = Attributes::new();
            for (path, value) in set {
                set_path(&mut attributes, &path, value);
            }
            let item = Item {
                key: key.clone(),
                attributes,
            };
            self.put_item(item.clone(), Condition::NotExists).await?;
            return Ok(item);
        }

        let filter = Self::condition_filter(key, &condition)?;
        if set.is_empty() {
            return match self.collection.find_one(filter).await? {
                Some(doc) => Self::from_document(doc),
                None if matches!(condition, Condition::None) => Ok(Item {
                    key: key.clone(),
                    attributes: Attributes::new(),
                }),
                None => Err(StoreError::ConditionFailed),
            };
        }

        let updated = self
            .collection
            .find_one_and_update(filter, Self::set_document(&set)?)
            .upsert(matches!(condition, Condition::None))
            .return_document(ReturnDocument::After)
            .await
            .map_err(map_write_error)?;

        match updated {
            Some(doc) => Self::from_document(doc),
            None => Err(StoreError::ConditionFailed),
        }
    }

    async fn delete_item(&self, key: &ItemKey, condition: Condition) -> StoreResult<()> {
        match condition {
            Condition::None => {
                self.collection.delete_one(Self::key_filter(key)).await?;
            }
            Condition::NotExists => {
                if self.collection.find_one(Self::key_filter(key)).await?.is_some() {
                    return Err(StoreError::ConditionFailed);
                }
            }
            Condition::Exists | Condition::Equals { .. } => {
                let filter = Self::condition_filter(key, &condition)?;
                let result = self.collection.delete_one(filter).await?;
                if result.deleted_count == 0 {
                    return Err(StoreError::ConditionFailed);
                }
            }
        }
        Ok(())
    }

    async fn query(&self, partition: &str) -> StoreResult<Vec<Item>> {
        let docs: Vec<Document> = self
            .collection
            .find(doc! { "pk": partition })
            .sort(doc! { "sk": 1 })
            .await?
            .try_collect()
            .await?;
        docs.into_iter().map(Self::from_document).collect()
    }

    async fn scan(&self) -> StoreResult<Vec<Item>> {
        let docs: Vec<Document> = self.collection.find(doc! {}).await?.try_collect().await?;
        docs.into_iter().map(Self::from_document).collect()
    }
}
