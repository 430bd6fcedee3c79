//! Declarative schema file format (YAML).
//!
//! ```yaml
//! version: 1
//! schema:
//!   properties:
//!     address:
//!       bsonType: [string, object]
//!       nullable: true
//!       presence: 0.87
//!       properties:
//!         city:
//!           bsonType: string
//! ```
//!
//! Parsing and emission hand-walk `serde_yaml::Value` so that errors
//! can name the offending path and the emitted field order is exactly
//! the canonical order of the tree. Unknown keys are tolerated on
//! parse and not re-emitted. `bsonType: mixed` is rejected outright.

use std::path::Path;

use serde_yaml::{Mapping, Value};

use crate::errors::{Error, Result};
use crate::path::FieldPath;
use crate::schema::{FieldEntry, SchemaDoc, SchemaNode, SCHEMA_FILE_VERSION};
use crate::types::{BsonType, TypeSet};

/// Load a schema document from a YAML file.
pub fn load_schema(path: &Path) -> Result<SchemaDoc> {
    let text = std::fs::read_to_string(path)
        .map_err(|err| Error::schema_format(path.display().to_string(), err.to_string()))?;
    parse_str(&text)
        .map_err(|err| match err {
            Error::SchemaFormat { path: p, message } => Error::SchemaFormat {
                path: format!("{}: {p}", path.display()),
                message,
            },
            other => other,
        })
}

/// Write a schema document to a YAML file.
pub fn save_schema(path: &Path, schema: &SchemaDoc) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|err| Error::schema_format(path.display().to_string(), err.to_string()))?;
    }
    let text = emit_string(schema)?;
    std::fs::write(path, text)
        .map_err(|err| Error::schema_format(path.display().to_string(), err.to_string()))
}

/// Parse the declarative form.
pub fn parse_str(text: &str) -> Result<SchemaDoc> {
    let value: Value = serde_yaml::from_str(text)
        .map_err(|err| Error::schema_format("<root>", err.to_string()))?;
    let top = value
        .as_mapping()
        .ok_or_else(|| Error::schema_format("<root>", "expected a mapping"))?;

    if let Some(version) = top.get("version") {
        let version = version
            .as_u64()
            .ok_or_else(|| Error::schema_format("version", "expected an integer"))?;
        if version != u64::from(SCHEMA_FILE_VERSION) {
            return Err(Error::schema_format(
                "version",
                format!("unsupported schema file version {version}"),
            ));
        }
    }

    let block = top
        .get("schema")
        .and_then(Value::as_mapping)
        .ok_or_else(|| Error::schema_format("schema", "missing 'schema' mapping"))?;

    let properties = block
        .get("properties")
        .and_then(Value::as_mapping);

    let fields = match properties {
        Some(props) => parse_properties(props, &FieldPath::root())?,
        None => Vec::new(),
    };

    Ok(SchemaDoc::new(SchemaNode::object(fields)))
}

/// Emit the declarative form.
pub fn emit_string(schema: &SchemaDoc) -> Result<String> {
    let mut canonical = schema.clone();
    canonical.root.sort_canonical();

    let mut top = Mapping::new();
    top.insert(Value::from("version"), Value::from(canonical.version));

    let mut block = Mapping::new();
    block.insert(
        Value::from("properties"),
        emit_properties(&canonical.root.fields),
    );
    top.insert(Value::from("schema"), Value::Mapping(block));

    serde_yaml::to_string(&Value::Mapping(top))
        .map_err(|err| Error::schema_format("<root>", err.to_string()))
}

fn parse_properties(props: &Mapping, prefix: &FieldPath) -> Result<Vec<FieldEntry>> {
    let mut fields = Vec::new();
    for (key, value) in props {
        let name = key
            .as_str()
            .ok_or_else(|| Error::schema_format(prefix.dotted(), "field names must be strings"))?;
        let path = prefix.child(name);
        let mapping = value
            .as_mapping()
            .ok_or_else(|| Error::schema_format(path.dotted(), "expected a field mapping"))?;
        fields.push(FieldEntry {
            name: name.to_string(),
            node: parse_node(mapping, &path)?,
        });
    }
    Ok(fields)
}

fn parse_node(mapping: &Mapping, path: &FieldPath) -> Result<SchemaNode> {
    let mut tags = parse_bson_type(
        mapping
            .get("bsonType")
            .ok_or_else(|| Error::schema_format(path.dotted(), "missing 'bsonType'"))?,
        path,
    )?;

    if let Some(nullable) = mapping.get("nullable") {
        let nullable = nullable
            .as_bool()
            .ok_or_else(|| Error::schema_format(path.dotted(), "'nullable' must be a bool"))?;
        if nullable && !tags.contains(&BsonType::Null) {
            tags.push(BsonType::Null);
        }
    }

    let types = TypeSet::from_tags(tags)
        .ok_or_else(|| Error::schema_format(path.dotted(), "empty type list"))?;

    let presence = match mapping.get("presence") {
        Some(value) => value
            .as_f64()
            .filter(|p| (0.0..=1.0).contains(p))
            .ok_or_else(|| {
                Error::schema_format(path.dotted(), "'presence' must be a number in [0, 1]")
            })?,
        None => 1.0,
    };

    let fields = if types.contains(BsonType::Object) {
        let props = mapping
            .get("properties")
            .and_then(Value::as_mapping)
            .ok_or_else(|| {
                Error::schema_format(path.dotted(), "object type requires 'properties'")
            })?;
        parse_properties(props, path)?
    } else {
        Vec::new()
    };

    let items = if types.contains(BsonType::Array) {
        let item_mapping = mapping
            .get("items")
            .and_then(Value::as_mapping)
            .ok_or_else(|| Error::schema_format(path.dotted(), "array type requires 'items'"))?;
        Some(Box::new(parse_node(item_mapping, &path.child("items"))?))
    } else {
        None
    };

    // The nullable marker stands in for the unrecorded null rate; a
    // positive rate keeps the derived required flag honest.
    let null_rate = if types.is_nullable() { 0.01 } else { 0.0 };

    Ok(SchemaNode {
        types,
        presence,
        null_rate,
        sample_count: 0,
        fields,
        items,
    })
}

fn parse_bson_type(value: &Value, path: &FieldPath) -> Result<Vec<BsonType>> {
    match value {
        Value::String(name) => {
            let tag: BsonType = name
                .parse()
                .map_err(|err| Error::schema_format(path.dotted(), err))?;
            Ok(vec![tag])
        }
        Value::Sequence(names) => {
            let mut tags = Vec::new();
            for name in names {
                let name = name.as_str().ok_or_else(|| {
                    Error::schema_format(path.dotted(), "type names must be strings")
                })?;
                let tag: BsonType = name
                    .parse()
                    .map_err(|err| Error::schema_format(path.dotted(), err))?;
                if !tags.contains(&tag) {
                    tags.push(tag);
                }
            }
            if tags.is_empty() {
                return Err(Error::schema_format(path.dotted(), "empty type list"));
            }
            Ok(tags)
        }
        _ => Err(Error::schema_format(
            path.dotted(),
            "'bsonType' must be a type name or a list of type names",
        )),
    }
}

fn emit_properties(fields: &[FieldEntry]) -> Value {
    let mut props = Mapping::new();
    for entry in fields {
        props.insert(Value::from(entry.name.as_str()), emit_node(&entry.node));
    }
    Value::Mapping(props)
}

fn emit_node(node: &SchemaNode) -> Value {
    let mut mapping = Mapping::new();

    // The nullable marker is carried by the dedicated flag, not the
    // type list.
    let visible: Vec<&str> = node
        .types
        .tags()
        .iter()
        .filter(|t| **t != BsonType::Null)
        .map(|t| t.as_str())
        .collect();

    let bson_type = match visible.len() {
        0 => Value::from("null"),
        1 => Value::from(visible[0]),
        _ => Value::Sequence(visible.iter().map(|n| Value::from(*n)).collect()),
    };
    mapping.insert(Value::from("bsonType"), bson_type);

    if node.types.is_nullable() && !visible.is_empty() {
        mapping.insert(Value::from("nullable"), Value::from(true));
    }

    mapping.insert(
        Value::from("presence"),
        Value::from(emit_presence(node.presence)),
    );

    if node.is_array() {
        if let Some(items) = node.items.as_deref() {
            mapping.insert(Value::from("items"), emit_node(items));
        }
    }
    if node.is_object() {
        mapping.insert(Value::from("properties"), emit_properties(&node.fields));
    }

    Value::Mapping(mapping)
}

// Two-decimal round-trip, without letting a sub-threshold presence
// round up to 1.00 and flip the derived required flag.
fn emit_presence(presence: f64) -> f64 {
    let rounded = (presence * 100.0).round() / 100.0;
    if rounded >= 1.0 && presence < crate::schema::REQUIRED_PRESENCE {
        0.99
    } else {
        rounded
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(tag: BsonType) -> SchemaNode {
        SchemaNode::leaf(TypeSet::singleton(tag))
    }

    fn entry(name: &str, node: SchemaNode) -> FieldEntry {
        FieldEntry {
            name: name.to_string(),
            node,
        }
    }

    #[test]
    fn test_parse_minimal() {
        let doc = parse_str(
            "version: 1\nschema:\n  properties:\n    name:\n      bsonType: string\n",
        )
        .unwrap();
        let node = doc.node_at(&FieldPath::from("name")).unwrap();
        assert_eq!(node.types, TypeSet::singleton(BsonType::String));
        assert!(node.required());
    }

    #[test]
    fn test_parse_union_and_nullable() {
        let text = r#"
version: 1
schema:
  properties:
    address:
      bsonType: [string, object]
      nullable: true
      properties:
        city:
          bsonType: string
"#;
        let doc = parse_str(text).unwrap();
        let node = doc.node_at(&FieldPath::from("address")).unwrap();
        assert!(node.types.is_nullable());
        assert!(node.types.contains(BsonType::Object));
        assert!(!node.required());
        assert!(doc.node_at(&FieldPath::from("address.city")).is_some());
    }

    #[test]
    fn test_mixed_rejected_with_path() {
        let err = parse_str(
            "version: 1\nschema:\n  properties:\n    blob:\n      bsonType: mixed\n",
        )
        .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("blob"), "{message}");
        assert!(message.contains("array of type names"), "{message}");
    }

    #[test]
    fn test_array_requires_items() {
        let err = parse_str(
            "version: 1\nschema:\n  properties:\n    tags:\n      bsonType: array\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("tags"));
    }

    #[test]
    fn test_unsupported_version() {
        let err = parse_str("version: 2\nschema:\n  properties: {}\n").unwrap_err();
        assert!(err.to_string().contains("version"));
    }

    #[test]
    fn test_unknown_keys_tolerated() {
        let text = r#"
version: 1
schema:
  properties:
    name:
      bsonType: string
      x-comment: free text
"#;
        let doc = parse_str(text).unwrap();
        assert!(doc.node_at(&FieldPath::from("name")).is_some());
    }

    #[test]
    fn test_roundtrip_structural() {
        let mut nullable_leaf = leaf(BsonType::Int32);
        nullable_leaf.types = TypeSet::from_tags([BsonType::Int32, BsonType::Null]).unwrap();
        nullable_leaf.null_rate = 0.2;

        let mut sparse = leaf(BsonType::String);
        sparse.presence = 0.43;

        let address = SchemaNode::object(vec![entry("city", leaf(BsonType::String))]);
        let tags = SchemaNode::array(leaf(BsonType::String));

        let doc = SchemaDoc::new(SchemaNode::object(vec![
            entry("name", leaf(BsonType::String)),
            entry("age", nullable_leaf),
            entry("bio", sparse),
            entry("address", address),
            entry("tags", tags),
        ]));

        let text = emit_string(&doc).unwrap();
        let parsed = parse_str(&text).unwrap();
        assert!(doc.structural_eq(&parsed), "round-trip changed structure:\n{text}");

        // Presence is advisory but round-trips at two decimals.
        let bio = parsed.node_at(&FieldPath::from("bio")).unwrap();
        assert!((bio.presence - 0.43).abs() < 1e-9);
    }

    #[test]
    fn test_presence_rounds_to_two_decimals() {
        let mut sparse = leaf(BsonType::String);
        sparse.presence = 0.876543;
        let doc = SchemaDoc::new(SchemaNode::object(vec![entry("bio", sparse)]));

        let parsed = parse_str(&emit_string(&doc).unwrap()).unwrap();
        let bio = parsed.node_at(&FieldPath::from("bio")).unwrap();
        assert!((bio.presence - 0.88).abs() < 1e-9);
    }

    #[test]
    fn test_emit_orders_fields_canonically() {
        let mut low = leaf(BsonType::String);
        low.presence = 0.2;
        let doc = SchemaDoc::new(SchemaNode::object(vec![
            entry("rare", low),
            entry("zeta", leaf(BsonType::String)),
            entry("alpha", leaf(BsonType::String)),
        ]));

        let text = emit_string(&doc).unwrap();
        let alpha = text.find("alpha").unwrap();
        let zeta = text.find("zeta").unwrap();
        let rare = text.find("rare").unwrap();
        assert!(alpha < zeta && zeta < rare, "{text}");
    }
}
