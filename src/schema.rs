//! Reply validation against declared JSON-Schema contracts

use jsonschema::JSONSchema;
use serde_json::Value;

/// Validate an instance against a schema document
///
/// Returns the first violation rendered as a string. A schema that fails
/// to compile is reported the same way; capability authors own their
/// schema documents, so a bad one surfaces on first use.
pub(crate) fn validate(schema: &Value, instance: &Value) -> Result<(), String> {
    let compiled = JSONSchema::compile(schema).map_err(|e| e.to_string())?;
    let result = match compiled.validate(instance) {
        Ok(()) => Ok(()),
        Err(mut errors) => {
            let detail = errors
                .next()
                .map(|e| e.to_string())
                .unwrap_or_else(|| "unspecified violation".into());
            Err(detail)
        }
    };
    result
}
