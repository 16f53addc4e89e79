//! Jamf schemas for definition and version bodies
//!
//! The schemas are embedded at build time and compiled on first use.

use std::sync::OnceLock;

use jsonschema::{paths::JSONPointer, JSONSchema};
use serde_json::Value;

use super::document::DocumentError;

const DEFINITION_SCHEMA: &str = include_str!("schemas/definition.json");
const VERSION_SCHEMA: &str = include_str!("schemas/version.json");

static DEFINITION: OnceLock<Result<JSONSchema, String>> = OnceLock::new();
static VERSION: OnceLock<Result<JSONSchema, String>> = OnceLock::new();

fn compile(source: &str) -> Result<JSONSchema, String> {
    let schema: Value = serde_json::from_str(source).map_err(|e| e.to_string())?;
    JSONSchema::compile(&schema).map_err(|e| e.to_string())
}

fn format_pointer(pointer: &JSONPointer) -> String {
    let text = pointer.to_string();
    if text.is_empty() {
        "/".into()
    } else {
        text
    }
}

fn check(
    cell: &'static OnceLock<Result<JSONSchema, String>>,
    source: &str,
    instance: &Value,
) -> Result<(), DocumentError> {
    let compiled = cell
        .get_or_init(|| compile(source))
        .as_ref()
        .map_err(|e| DocumentError::SchemaUnavailable(e.clone()))?;

    if let Err(errors) = compiled.validate(instance) {
        let messages: Vec<String> = errors
            .map(|e| format!("{}: {}", format_pointer(&e.instance_path), e))
            .collect();
        return Err(DocumentError::Schema(messages.join("; ")));
    }
    Ok(())
}

/// Check a full definition body (patch entries are checked separately)
pub fn check_definition(instance: &Value) -> Result<(), DocumentError> {
    check(&DEFINITION, DEFINITION_SCHEMA, instance)
}

/// Check a single patch entry
pub fn check_version(instance: &Value) -> Result<(), DocumentError> {
    check(&VERSION, VERSION_SCHEMA, instance)
}
