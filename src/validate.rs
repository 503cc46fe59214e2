//! Boundary shape validation of documents against their metadata.
//!
//! Documents cross from the remote access layer into application state as
//! loosely typed bags. A JSON Schema generated from the [`DocTypeMeta`] checks
//! that declared fields carry plausible value types. The check is advisory:
//! violations are reported (and logged by the resource layer), never used to
//! reject a document. Backends attach standard fields beyond the meta, and
//! the server remains the authority on validity.

use serde_json::{json, Map, Value};

use crate::error::ShapeViolation;
use crate::types::{DocTypeMeta, Document, FieldType};

/// Generate a JSON Schema describing the value shape of a meta's fields.
///
/// Every declared type is nullable (absent and null are how the backend
/// encodes "no value"), Check fields are restricted to 0/1, and additional
/// properties are allowed.
pub fn meta_schema(meta: &DocTypeMeta) -> Value {
    let mut properties = Map::new();
    for field in &meta.fields {
        if field.fieldtype.is_layout() {
            continue;
        }
        properties.insert(field.fieldname.clone(), field_schema(field.fieldtype));
    }

    json!({
        "type": "object",
        "properties": properties,
    })
}

fn field_schema(fieldtype: FieldType) -> Value {
    match fieldtype {
        FieldType::Check => json!({ "enum": [0, 1, null] }),
        FieldType::Int => json!({ "type": ["integer", "null"] }),
        FieldType::Float | FieldType::Currency => json!({ "type": ["number", "null"] }),
        // Data, Select, Link, Date, Text variants and unknown types are all
        // string-valued on the wire.
        _ => json!({ "type": ["string", "null"] }),
    }
}

/// Check a document's shape against its metadata.
///
/// Returns one violation per mismatched field, empty when the document
/// conforms. Never fails: an unbuildable schema is reported as a single
/// violation at the document root.
pub fn validate_document(meta: &DocTypeMeta, doc: &Document) -> Vec<ShapeViolation> {
    let schema = meta_schema(meta);
    let validator = match jsonschema::validator_for(&schema) {
        Ok(v) => v,
        Err(e) => {
            return vec![ShapeViolation {
                path: String::new(),
                message: format!("cannot build shape schema: {}", e),
            }]
        }
    };

    validator
        .iter_errors(&doc.to_json())
        .map(|e| ShapeViolation {
            path: e.instance_path.to_string(),
            message: e.to_string(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FieldValue;

    fn sample_meta() -> DocTypeMeta {
        serde_json::from_value(json!({
            "name": "Project Info",
            "fields": [
                { "fieldname": "project_name", "fieldtype": "Data" },
                { "fieldname": "credits", "fieldtype": "Int" },
                { "fieldname": "rate", "fieldtype": "Currency" },
                { "fieldname": "approved", "fieldtype": "Check" },
                { "fieldname": "sec", "fieldtype": "Section Break" }
            ]
        }))
        .unwrap()
    }

    fn doc(entries: &[(&str, FieldValue)]) -> Document {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn conforming_document_passes() {
        let d = doc(&[
            ("project_name", "Alpha".into()),
            ("credits", FieldValue::Int(10)),
            ("rate", FieldValue::Float(1.5)),
            ("approved", FieldValue::check(true)),
        ]);
        assert!(validate_document(&sample_meta(), &d).is_empty());
    }

    #[test]
    fn null_and_absent_fields_pass() {
        let d = doc(&[("credits", FieldValue::Null)]);
        assert!(validate_document(&sample_meta(), &d).is_empty());
    }

    #[test]
    fn type_mismatch_is_flagged_with_path() {
        let d = doc(&[("credits", FieldValue::Str("many".into()))]);
        let violations = validate_document(&sample_meta(), &d);
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].path, "/credits");
    }

    #[test]
    fn check_outside_zero_one_is_flagged() {
        let d = doc(&[("approved", FieldValue::Int(2))]);
        let violations = validate_document(&sample_meta(), &d);
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].path, "/approved");
    }

    #[test]
    fn undeclared_fields_are_allowed() {
        let d = doc(&[
            ("modified", "2024-01-01 00:00:00".into()),
            ("owner", "admin@example.com".into()),
        ]);
        assert!(validate_document(&sample_meta(), &d).is_empty());
    }

    #[test]
    fn layout_fields_do_not_constrain() {
        let schema = meta_schema(&sample_meta());
        assert!(schema["properties"].get("sec").is_none());
        assert!(schema["properties"].get("credits").is_some());
    }
}
