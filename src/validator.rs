//! Projection to the engine's `$jsonSchema` validator and back.
//!
//! [`build_validator`] is a pure function from a schema tree to the
//! validator document; [`parse_validator`] inverts it for the subset
//! the projection emits (round-trip property). Sampled document
//! validation against a schema also lives here.

use bson::{doc, Bson, Document};
use chrono::{DateTime, Utc};

use crate::adapter::{render_key, DatabaseAdapter, ValidationAction, ValidationLevel};
use crate::errors::{Error, Result};
use crate::path::FieldPath;
use crate::schema::{FieldEntry, SchemaDoc, SchemaNode};
use crate::types::{BsonType, TypeSet};

/// Project a schema to the engine-native validator document.
pub fn build_validator(schema: &SchemaDoc) -> Document {
    let mut canonical = schema.clone();
    canonical.root.sort_canonical();
    doc! { "$jsonSchema": node_to_validator(&canonical.root) }
}

fn node_to_validator(node: &SchemaNode) -> Document {
    let mut out = Document::new();

    let tags = node.types.tags();
    if tags.len() == 1 {
        out.insert("bsonType", tags[0].as_str());
    } else {
        let names: Vec<Bson> = tags.iter().map(|t| Bson::String(t.as_str().to_string())).collect();
        out.insert("bsonType", Bson::Array(names));
    }

    if node.is_object() {
        let required: Vec<Bson> = node
            .fields
            .iter()
            .filter(|entry| entry.node.required())
            .map(|entry| Bson::String(entry.name.clone()))
            .collect();
        if !required.is_empty() {
            out.insert("required", Bson::Array(required));
        }

        let mut properties = Document::new();
        for entry in &node.fields {
            properties.insert(entry.name.clone(), node_to_validator(&entry.node));
        }
        out.insert("properties", properties);
    }

    if node.is_array() {
        if let Some(items) = node.items.as_deref() {
            out.insert("items", node_to_validator(items));
        }
    }

    out
}

/// Parse a validator document produced by [`build_validator`] back
/// into a schema. Restricted to the emitted subset; structural shape
/// and required flags round-trip, statistics do not.
pub fn parse_validator(validator: &Document) -> Result<SchemaDoc> {
    let json_schema = validator
        .get_document("$jsonSchema")
        .map_err(|_| Error::schema_format("$jsonSchema", "missing '$jsonSchema' document"))?;
    let root = validator_to_node(json_schema, &FieldPath::root(), true)?;
    Ok(SchemaDoc::new(root))
}

fn validator_to_node(definition: &Document, path: &FieldPath, required: bool) -> Result<SchemaNode> {
    let types = match definition.get("bsonType") {
        Some(Bson::String(name)) => {
            let tag: BsonType = name
                .parse()
                .map_err(|err| Error::schema_format(path.dotted(), err))?;
            TypeSet::singleton(tag)
        }
        Some(Bson::Array(names)) => {
            let mut tags = Vec::new();
            for name in names {
                let name = name.as_str().ok_or_else(|| {
                    Error::schema_format(path.dotted(), "type names must be strings")
                })?;
                tags.push(
                    name.parse::<BsonType>()
                        .map_err(|err| Error::schema_format(path.dotted(), err))?,
                );
            }
            TypeSet::from_tags(tags)
                .ok_or_else(|| Error::schema_format(path.dotted(), "empty type list"))?
        }
        _ => {
            return Err(Error::schema_format(path.dotted(), "missing 'bsonType'"));
        }
    };

    let required_children: Vec<String> = match definition.get_array("required") {
        Ok(names) => names
            .iter()
            .filter_map(|n| n.as_str().map(str::to_string))
            .collect(),
        Err(_) => Vec::new(),
    };

    let fields = if types.contains(BsonType::Object) {
        let properties = definition.get_document("properties").map_err(|_| {
            Error::schema_format(path.dotted(), "object type requires 'properties'")
        })?;
        let mut fields = Vec::new();
        for (name, value) in properties {
            let child_definition = value.as_document().ok_or_else(|| {
                Error::schema_format(path.child(name).dotted(), "expected a document")
            })?;
            let child_required = required_children.iter().any(|r| r == name);
            fields.push(FieldEntry {
                name: name.clone(),
                node: validator_to_node(child_definition, &path.child(name), child_required)?,
            });
        }
        fields
    } else {
        Vec::new()
    };

    let items = if types.contains(BsonType::Array) {
        let item_definition = definition
            .get_document("items")
            .map_err(|_| Error::schema_format(path.dotted(), "array type requires 'items'"))?;
        Some(Box::new(validator_to_node(item_definition, path, true)?))
    } else {
        None
    };

    // Statistics are not carried by validators; reconstruct the
    // minimum that keeps the derived required flag faithful.
    let (presence, null_rate) = if types.is_nullable() {
        (if required { 1.0 } else { 0.0 }, 0.01)
    } else {
        (if required { 1.0 } else { 0.0 }, 0.0)
    };

    Ok(SchemaNode {
        types,
        presence,
        null_rate,
        sample_count: 0,
        fields,
        items,
    })
}

/// Issues found in one sampled document.
#[derive(Debug, Clone)]
pub struct DocumentIssues {
    pub key: String,
    pub issues: Vec<String>,
}

/// Outcome of sampled validation.
#[derive(Debug, Clone)]
pub struct ValidationOutcome {
    pub collection: String,
    pub total_documents: u64,
    pub sampled_documents: u64,
    pub valid: u64,
    pub invalid: u64,
    pub errors: Vec<DocumentIssues>,
    pub validated_at: DateTime<Utc>,
}

/// Sample the collection and check each document against the schema.
pub async fn validate_collection(
    adapter: &dyn DatabaseAdapter,
    collection: &str,
    schema: &SchemaDoc,
    sample_size: u64,
    max_errors: usize,
) -> Result<ValidationOutcome> {
    let total = adapter.count(collection).await?;
    let target = sample_size.min(total);
    let docs = if target == 0 {
        Vec::new()
    } else {
        adapter.sample(collection, target).await?
    };

    let mut valid = 0u64;
    let mut invalid = 0u64;
    let mut errors = Vec::new();

    for doc in &docs {
        let issues = validate_document(doc, &schema.root, &FieldPath::root());
        if issues.is_empty() {
            valid += 1;
        } else {
            invalid += 1;
            if errors.len() < max_errors {
                let key = doc
                    .get("_id")
                    .map(render_key)
                    .unwrap_or_else(|| "<no _id>".to_string());
                errors.push(DocumentIssues { key, issues });
            }
        }
    }

    Ok(ValidationOutcome {
        collection: collection.to_string(),
        total_documents: total,
        sampled_documents: docs.len() as u64,
        valid,
        invalid,
        errors,
        validated_at: Utc::now(),
    })
}

/// Apply the validator projection to the live collection.
pub async fn apply_validator(
    adapter: &dyn DatabaseAdapter,
    collection: &str,
    schema: &SchemaDoc,
    level: ValidationLevel,
    action: ValidationAction,
) -> Result<()> {
    let validator = build_validator(schema);
    adapter
        .set_validator(collection, validator, level, action)
        .await?;
    Ok(())
}

fn validate_document(doc: &Document, node: &SchemaNode, prefix: &FieldPath) -> Vec<String> {
    let mut issues = Vec::new();

    for entry in &node.fields {
        let path = prefix.child(&entry.name);
        match doc.get(&entry.name) {
            None | Some(Bson::Null) => {
                if entry.node.required() {
                    issues.push(format!("Missing required field: {path}"));
                }
            }
            Some(value) => validate_value(value, &entry.node, &path, &mut issues),
        }
    }

    issues
}

fn validate_value(value: &Bson, node: &SchemaNode, path: &FieldPath, issues: &mut Vec<String>) {
    let tag = BsonType::of(value);
    if !tag_matches(tag, &node.types) {
        issues.push(format!(
            "Type mismatch for {path}: expected {}, found {tag}",
            node.types
        ));
        return;
    }

    match value {
        Bson::Document(sub) if node.is_object() => {
            issues.extend(validate_document(sub, node, path));
        }
        Bson::Array(elements) => {
            if let Some(items) = node.items.as_deref() {
                for element in elements {
                    if !matches!(element, Bson::Null) {
                        validate_value(element, items, path, issues);
                    }
                }
            }
        }
        _ => {}
    }
}

/// Tag membership with the numeric leniency the engine itself applies:
/// an int is acceptable where a wider numeric is declared.
fn tag_matches(tag: BsonType, declared: &TypeSet) -> bool {
    if declared.contains(tag) {
        return true;
    }
    match tag {
        BsonType::Int32 => {
            declared.contains(BsonType::Int64)
                || declared.contains(BsonType::Double)
                || declared.contains(BsonType::Decimal)
        }
        BsonType::Int64 => {
            declared.contains(BsonType::Double) || declared.contains(BsonType::Decimal)
        }
        _ => false,
    }
}
