//! Object store contract
//!
//! Definitions are stored as whole JSON blobs. Every blob carries an ETag,
//! the SHA256 of its content, which writers use as an optimistic lock.

use async_trait::async_trait;
use bytes::Bytes;
use sha2::{Digest, Sha256};

use super::StoreResult;

/// Blob content with its ETag
#[derive(Debug, Clone, PartialEq)]
pub struct StoredObject {
    pub bytes: Bytes,
    pub etag: String,
}

/// Precondition for a put
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PutCondition {
    /// Overwrite whatever is there
    Any,
    /// Current ETag must equal this value
    IfMatch(String),
    /// Nothing may exist at the key
    IfNoneMatch,
}

impl PutCondition {
    pub fn holds(&self, current_etag: Option<&str>) -> bool {
        match self {
            Self::Any => true,
            Self::IfMatch(expected) => current_etag == Some(expected.as_str()),
            Self::IfNoneMatch => current_etag.is_none(),
        }
    }
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fails with `StoreError::NotFound` when absent
    async fn get_object(&self, key: &str) -> StoreResult<StoredObject>;

    /// Returns the ETag of the written object
    async fn put_object(&self, key: &str, bytes: Bytes, condition: PutCondition)
        -> StoreResult<String>;

    /// Deleting a missing key is not an error
    async fn delete_object(&self, key: &str) -> StoreResult<()>;
}

/// Compute the ETag of a blob
pub fn compute_etag(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("sha256-{}", hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compute_etag() {
        let etag = compute_etag(b"hello");
        assert!(etag.starts_with("sha256-"));
        assert_eq!(etag.len(), 7 + 64);
        assert_eq!(etag, compute_etag(b"hello"));
        assert_ne!(etag, compute_etag(b"hello!"));
    }

    #[test]
    fn test_put_condition() {
        assert!(PutCondition::Any.holds(None));
        assert!(PutCondition::IfNoneMatch.holds(None));
        assert!(!PutCondition::IfNoneMatch.holds(Some("e1")));
        assert!(PutCondition::IfMatch("e1".into()).holds(Some("e1")));
        assert!(!PutCondition::IfMatch("e1".into()).holds(Some("e2")));
        assert!(!PutCondition::IfMatch("e1".into()).holds(None));
    }
}
