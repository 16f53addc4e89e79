//! Catalog store contract
//!
//! A key-value table addressed by `(partition, sort)`. Every business
//! invariant write carries a [`Condition`] that the backend evaluates
//! atomically with the write.

use async_trait::async_trait;
use serde_json::{Map, Value};

use super::StoreResult;

/// Attribute map of one catalog item. Nested maps are addressed with
/// dotted paths (`summary.currentVersion`).
pub type Attributes = Map<String, Value>;

/// Primary key of a catalog item
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ItemKey {
    pub partition: String,
    pub sort: String,
}

impl ItemKey {
    pub fn new(partition: impl Into<String>, sort: impl Into<String>) -> Self {
        Self {
            partition: partition.into(),
            sort: sort.into(),
        }
    }
}

/// One stored item
#[derive(Debug, Clone, PartialEq)]
pub struct Item {
    pub key: ItemKey,
    pub attributes: Attributes,
}

/// Precondition evaluated against the current item before a write
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// Unconditional
    None,
    /// The item must exist
    Exists,
    /// The item must not exist
    NotExists,
    /// The item must exist and the attribute at `path` must equal `value`.
    /// A missing attribute compares equal to `Value::Null`.
    Equals { path: String, value: Value },
}

impl Condition {
    pub fn equals(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Equals {
            path: path.into(),
            value: value.into(),
        }
    }

    /// Evaluate against the current state of the item
    pub fn holds(&self, current: Option<&Attributes>) -> bool {
        match (self, current) {
            (Self::None, _) => true,
            (Self::Exists, current) => current.is_some(),
            (Self::NotExists, current) => current.is_none(),
            (Self::Equals { .. }, None) => false,
            (Self::Equals { path, value }, Some(attrs)) => {
                get_path(attrs, path).unwrap_or(&Value::Null) == value
            }
        }
    }
}

/// Key-value catalog with conditional writes
#[async_trait]
pub trait CatalogStore: Send + Sync {
    async fn get_item(&self, key: &ItemKey) -> StoreResult<Option<Item>>;

    /// Write the whole item
    async fn put_item(&self, item: Item, condition: Condition) -> StoreResult<()>;

    /// Set the given (dotted-path) attributes and return the updated item.
    /// With `Condition::None` a missing item is created.
    async fn update_item(
        &self,
        key: &ItemKey,
        set: Attributes,
        condition: Condition,
    ) -> StoreResult<Item>;

    async fn delete_item(&self, key: &ItemKey, condition: Condition) -> StoreResult<()>;

    /// All items of one partition, ordered by sort key
    async fn query(&self, partition: &str) -> StoreResult<Vec<Item>>;

    /// Every item in the table; only batch sweeps call this
    async fn scan(&self) -> StoreResult<Vec<Item>>;
}

/// Look up a dotted path in an attribute map
pub fn get_path<'a>(attrs: &'a Attributes, path: &str) -> Option<&'a Value> {
    let mut parts = path.split('.');
    let first = parts.next()?;
    let mut current = attrs.get(first)?;
    for part in parts {
        current = current.as_object()?.get(part)?;
    }
    Some(current)
}

/// Set a dotted path, creating intermediate maps as needed
pub fn set_path(attrs: &mut Attributes, path: &str, value: Value) {
    match path.split_once('.') {
        None => {
            attrs.insert(path.to_string(), value);
        }
        Some((head, rest)) => {
            let entry = attrs
                .entry(head.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !entry.is_object() {
                *entry = Value::Object(Map::new());
            }
            if let Value::Object(inner) = entry {
                set_path(inner, rest, value);
            }
        }
    }
}
