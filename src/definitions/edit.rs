//! Version edit engine
//!
//! Pure functions over a [`Definition`]: they take the current document and
//! return the edited copy, so a failed edit never touches stored state.
//! Positions are explicit. Entries are never sorted; index 0 is the current
//! version.

use chrono::{DateTime, Utc};

use super::document::{Definition, VersionEntry};
use crate::types::PatchError;

pub const INSERT_AFTER: &str = "insert_after";
pub const INSERT_BEFORE: &str = "insert_before";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EditError {
    #[error("Conflicting parameters provided")]
    ConflictingParameters,

    #[error("Parameter '{0}' has no value")]
    EmptyParameterValue(&'static str),

    #[error("The version '{0}' was not found")]
    ReferenceVersionNotFound(String),

    #[error("The version '{0}' exists")]
    DuplicateVersion(String),

    #[error("A title must contain at least 1 version")]
    MinimumVersionViolation,

    #[error("The version '{0}' was not found")]
    VersionNotFound(String),
}

impl From<EditError> for PatchError {
    fn from(err: EditError) -> Self {
        match err {
            EditError::DuplicateVersion(_) => PatchError::Conflict(err.to_string()),
            EditError::VersionNotFound(_) => PatchError::NotFound(err.to_string()),
            EditError::ConflictingParameters
            | EditError::EmptyParameterValue(_)
            | EditError::ReferenceVersionNotFound(_)
            | EditError::MinimumVersionViolation => PatchError::Validation(err.to_string()),
        }
    }
}

/// Placement parameters of an add. `Some("")` means the key was supplied
/// without a value, which is distinct from the key being absent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Placement {
    pub insert_after: Option<String>,
    pub insert_before: Option<String>,
}

impl Placement {
    pub fn after(version: impl Into<String>) -> Self {
        Self {
            insert_after: Some(version.into()),
            insert_before: None,
        }
    }

    pub fn before(version: impl Into<String>) -> Self {
        Self {
            insert_after: None,
            insert_before: Some(version.into()),
        }
    }

    /// Pick the placement keys out of decoded query pairs; other keys are ignored.
    pub fn from_pairs(pairs: &[(String, String)]) -> Self {
        let find = |name: &str| {
            pairs
                .iter()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.clone())
        };
        Self {
            insert_after: find(INSERT_AFTER),
            insert_before: find(INSERT_BEFORE),
        }
    }
}

/// Index at which a new entry goes
pub fn resolve_insert_position(
    patches: &[VersionEntry],
    placement: &Placement,
) -> Result<usize, EditError> {
    let position_of = |version: &str| {
        patches
            .iter()
            .position(|p| p.version == version)
            .ok_or_else(|| EditError::ReferenceVersionNotFound(version.to_string()))
    };

    match (&placement.insert_after, &placement.insert_before) {
        (None, None) => Ok(0),
        (Some(_), Some(_)) => Err(EditError::ConflictingParameters),
        (Some(after), None) if after.is_empty() => Err(EditError::EmptyParameterValue(INSERT_AFTER)),
        (None, Some(before)) if before.is_empty() => {
            Err(EditError::EmptyParameterValue(INSERT_BEFORE))
        }
        (Some(after), None) => Ok(position_of(after)? + 1),
        (None, Some(before)) => position_of(before),
    }
}

/// Insert `entry` at the resolved position
pub fn add_version(
    document: &Definition,
    entry: VersionEntry,
    placement: &Placement,
    now: DateTime<Utc>,
) -> Result<Definition, EditError> {
    if document.contains_version(&entry.version) {
        return Err(EditError::DuplicateVersion(entry.version));
    }
    let index = resolve_insert_position(&document.patches, placement)?;

    let mut updated = document.clone();
    updated.patches.insert(index, entry);
    updated.touch(now);
    Ok(updated)
}

/// Remove `version`; a document keeps at least one entry
pub fn delete_version(
    document: &Definition,
    version: &str,
    now: DateTime<Utc>,
) -> Result<Definition, EditError> {
    if document.patches.len() < 2 {
        return Err(EditError::MinimumVersionViolation);
    }
    let index = document
        .position_of(version)
        .ok_or_else(|| EditError::VersionNotFound(version.to_string()))?;

    let mut updated = document.clone();
    updated.patches.remove(index);
    updated.touch(now);
    Ok(updated)
}
