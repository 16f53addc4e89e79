//! Definition document model
//!
//! A definition is the full Jamf patch-definition JSON for one title. Only the
//! fields the service reasons about are typed; all other Jamf metadata
//! (`appName`, `bundleId`, `requirements`, `extensionAttributes`, per-patch
//! `components`, ...) rides along in flattened maps and is written back
//! unchanged.

use std::collections::HashSet;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::schema;
use crate::store::TitleSummary;

/// Timestamp format of `lastModified`
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Format a timestamp the way definitions store it (second precision, `Z`)
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.format(TIMESTAMP_FORMAT).to_string()
}

#[derive(Debug, thiserror::Error)]
pub enum DocumentError {
    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Missing or empty field '{0}'")]
    MissingField(&'static str),

    #[error("A title must contain at least 1 version")]
    NoVersions,

    #[error("Every patch requires a non-empty 'version'")]
    EmptyVersion,

    #[error("The version '{0}' appears more than once")]
    DuplicateVersion(String),

    #[error("currentVersion '{found}' does not match the first patch version '{expected}'")]
    CurrentVersionMismatch { expected: String, found: String },

    #[error("lastModified '{0}' is not a YYYY-MM-DDTHH:MM:SSZ timestamp")]
    InvalidTimestamp(String),

    #[error("Invalid title ID '{0}': use letters, digits, '.', '_' or '-'")]
    InvalidId(String),

    #[error("Schema validation failed: {0}")]
    Schema(String),

    #[error("Schema unavailable: {0}")]
    SchemaUnavailable(String),
}

/// Lower-case a title id and check it is usable as a storage key segment
pub fn normalize_title_id(raw: &str) -> Result<String, DocumentError> {
    let id = raw.to_lowercase();
    let allowed = id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
    if id.is_empty() || id == "." || id == ".." || !allowed {
        return Err(DocumentError::InvalidId(raw.to_string()));
    }
    Ok(id)
}

/// One patch entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionEntry {
    pub version: String,
    #[serde(flatten)]
    pub metadata: Map<String, Value>,
}

impl VersionEntry {
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            metadata: Map::new(),
        }
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, DocumentError> {
        let entry: Self = serde_json::from_slice(bytes)?;
        entry.validate()?;
        Ok(entry)
    }

    pub fn validate(&self) -> Result<(), DocumentError> {
        if self.version.trim().is_empty() {
            return Err(DocumentError::EmptyVersion);
        }
        schema::check_version(&serde_json::to_value(self)?)
    }
}

/// A full patch definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Definition {
    pub id: String,
    pub name: String,
    pub publisher: String,
    pub current_version: String,
    pub last_modified: String,
    pub patches: Vec<VersionEntry>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Definition {
    /// Parse without validating
    pub fn from_slice(bytes: &[u8]) -> Result<Self, DocumentError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    pub fn to_vec(&self) -> Result<Vec<u8>, DocumentError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Check the structural invariants
    pub fn validate(&self) -> Result<(), DocumentError> {
        if self.id.trim().is_empty() {
            return Err(DocumentError::MissingField("id"));
        }
        normalize_title_id(&self.id)?;
        if self.name.trim().is_empty() {
            return Err(DocumentError::MissingField("name"));
        }
        if self.publisher.trim().is_empty() {
            return Err(DocumentError::MissingField("publisher"));
        }
        if self.patches.is_empty() {
            return Err(DocumentError::NoVersions);
        }

        let mut seen = HashSet::with_capacity(self.patches.len());
        for entry in &self.patches {
            entry.validate()?;
            if !seen.insert(entry.version.as_str()) {
                return Err(DocumentError::DuplicateVersion(entry.version.clone()));
            }
        }

        let expected = &self.patches[0].version;
        if &self.current_version != expected {
            return Err(DocumentError::CurrentVersionMismatch {
                expected: expected.clone(),
                found: self.current_version.clone(),
            });
        }

        if NaiveDateTime::parse_from_str(&self.last_modified, TIMESTAMP_FORMAT).is_err() {
            return Err(DocumentError::InvalidTimestamp(self.last_modified.clone()));
        }
        schema::check_definition(&serde_json::to_value(self)?)
    }

    /// Ids are case-insensitive; store them lower-cased
    pub fn normalize_id(&mut self) {
        self.id = self.id.to_lowercase();
    }

    pub fn position_of(&self, version: &str) -> Option<usize> {
        self.patches.iter().position(|p| p.version == version)
    }

    pub fn contains_version(&self, version: &str) -> bool {
        self.position_of(version).is_some()
    }

    /// Re-derive `currentVersion` and stamp `lastModified`
    pub(crate) fn touch(&mut self, now: DateTime<Utc>) {
        if let Some(front) = self.patches.first() {
            self.current_version = front.version.clone();
        }
        self.last_modified = format_timestamp(now);
    }

    pub fn summary(&self) -> TitleSummary {
        TitleSummary {
            id: self.id.clone(),
            name: self.name.clone(),
            publisher: self.publisher.clone(),
            current_version: self.current_version.clone(),
            last_modified: self.last_modified.clone(),
        }
    }
}
