//! Patch definition documents and the edits applied to them

pub mod document;
pub mod edit;
pub mod schema;

use crate::types::PatchError;

pub use document::{format_timestamp, normalize_title_id, Definition, DocumentError, VersionEntry};
pub use edit::{add_version, delete_version, resolve_insert_position, EditError, Placement};

impl From<DocumentError> for PatchError {
    fn from(err: DocumentError) -> Self {
        match err {
            DocumentError::SchemaUnavailable(_) => PatchError::Internal(err.to_string()),
            other => PatchError::Validation(other.to_string()),
        }
    }
}
