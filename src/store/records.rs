//! Typed catalog records
//!
//! Each record type knows its key layout and converts to and from a raw
//! catalog [`Item`].

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;

use super::catalog::{Attributes, Item, ItemKey};
use super::{StoreError, StoreResult};

pub const TITLE_PREFIX: &str = "TITLE#";
pub const REVOKED_PREFIX: &str = "REVOKED#";
pub const CONTRIBUTOR_SORT: &str = "CONTRIBUTOR";

/// Attribute paths written by partial updates
pub mod fields {
    pub const CURRENT_VERSION: &str = "summary.currentVersion";
    pub const LAST_MODIFIED: &str = "summary.lastModified";
    pub const NAME: &str = "summary.name";
    pub const PUBLISHER: &str = "summary.publisher";
    pub const BLOB_ETAG: &str = "blob_etag";
    pub const LAST_SYNC_RESULT: &str = "last_sync_result";
    pub const LAST_SYNC_TIME: &str = "last_sync_time";
    pub const TOKEN_ID: &str = "token_id";
    pub const VERIFICATION_CODE: &str = "verification_code";
    pub const VERIFIED: &str = "verified";
}

/// Object store key of a title's definition blob
pub fn definition_key(contributor_id: &str, title_id: &str) -> String {
    format!("titles/{}/{}", contributor_id, title_id)
}

/// Conversion between a typed record and a catalog item
pub trait CatalogRecord: Serialize + DeserializeOwned {
    fn key(&self) -> ItemKey;

    fn to_item(&self) -> StoreResult<Item> {
        let attributes = match serde_json::to_value(self)? {
            Value::Object(map) => map,
            other => {
                return Err(StoreError::Serialization(format!(
                    "record serialized to non-object: {}",
                    other
                )))
            }
        };
        Ok(Item {
            key: self.key(),
            attributes,
        })
    }

    fn from_item(item: Item) -> StoreResult<Self> {
        Ok(serde_json::from_value(Value::Object(item.attributes))?)
    }
}

/// The listing view of a title, as served by the Jamf software endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TitleSummary {
    pub id: String,
    pub name: String,
    pub publisher: String,
    pub current_version: String,
    pub last_modified: String,
}

/// Catalog projection of one definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TitleRecord {
    pub contributor_id: String,
    pub title_id: String,
    pub summary: TitleSummary,
    /// ETag of the blob `summary` was derived from
    #[serde(default)]
    pub blob_etag: Option<String>,
    #[serde(default)]
    pub is_synced: bool,
    #[serde(default)]
    pub sync_url: Option<String>,
    #[serde(default)]
    pub last_sync_result: Option<bool>,
    #[serde(default)]
    pub last_sync_time: Option<String>,
}

impl TitleRecord {
    pub fn key_for(contributor_id: &str, title_id: &str) -> ItemKey {
        ItemKey::new(contributor_id, format!("{}{}", TITLE_PREFIX, title_id))
    }

    pub fn blob_key(&self) -> String {
        definition_key(&self.contributor_id, &self.title_id)
    }

    /// `blob_etag` as a condition value; absent compares equal to null
    pub fn etag_value(&self) -> Value {
        self.blob_etag
            .as_ref()
            .map(|e| Value::String(e.clone()))
            .unwrap_or(Value::Null)
    }

    /// Summary with the sync bookkeeping fields appended
    pub fn extended_summary(&self) -> StoreResult<Attributes> {
        let mut attrs = match serde_json::to_value(&self.summary)? {
            Value::Object(map) => map,
            _ => Attributes::new(),
        };
        attrs.insert(
            "last_sync_result".into(),
            serde_json::to_value(self.last_sync_result)?,
        );
        attrs.insert(
            "last_sync_time".into(),
            serde_json::to_value(&self.last_sync_time)?,
        );
        Ok(attrs)
    }
}

impl CatalogRecord for TitleRecord {
    fn key(&self) -> ItemKey {
        Self::key_for(&self.contributor_id, &self.title_id)
    }
}

/// A registered contributor and their current token
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContributorRecord {
    pub contributor_id: String,
    pub display_name: String,
    pub email: String,
    #[serde(default)]
    pub verification_code: Option<String>,
    #[serde(default)]
    pub verified: bool,
    /// Unix seconds
    pub date_registered: i64,
    /// jti of the only token currently accepted
    #[serde(default)]
    pub token_id: Option<String>,
}

impl ContributorRecord {
    pub fn key_for(contributor_id: &str) -> ItemKey {
        ItemKey::new(contributor_id, CONTRIBUTOR_SORT)
    }
}

impl CatalogRecord for ContributorRecord {
    fn key(&self) -> ItemKey {
        Self::key_for(&self.contributor_id)
    }
}

/// Blacklist entry for a revoked token
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RevokedTokenRecord {
    pub contributor_id: String,
    pub jti: String,
    pub revoked_at: String,
}

impl RevokedTokenRecord {
    pub fn key_for(contributor_id: &str, jti: &str) -> ItemKey {
        ItemKey::new(contributor_id, format!("{}{}", REVOKED_PREFIX, jti))
    }
}

impl CatalogRecord for RevokedTokenRecord {
    fn key(&self) -> ItemKey {
        Self::key_for(&self.contributor_id, &self.jti)
    }
}
