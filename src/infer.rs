//! Sampling-based schema inference.
//!
//! Walks a uniform sample of documents, accumulating per-path
//! observation counts, null counts, and value-tag histograms, then
//! normalises the accumulators into a canonical [`SchemaDoc`]. Rare
//! type variants are never dropped — the anomaly reporter surfaces
//! them instead. Two samples of the same collection produce
//! structurally identical schemas up to sampling noise.

use std::collections::BTreeMap;

use bson::{Bson, Document};
use chrono::{DateTime, Utc};
use log::debug;
use serde::Serialize;
use serde_json::json;

use crate::adapter::DatabaseAdapter;
use crate::errors::Result;
use crate::path::FieldPath;
use crate::schema::{FieldEntry, SchemaDoc, SchemaNode};
use crate::types::{BsonType, TypeSet};

/// Default sample size; overridable per call and via configuration.
pub const DEFAULT_SAMPLE_SIZE: u64 = 10_000;

/// Nesting depth beyond which sub-documents are typed but not walked.
const MAX_DEPTH: usize = 8;

/// Presence below which a field is reported as sparse.
const LOW_PRESENCE_THRESHOLD: f64 = 0.9;

/// Null rate above which a field is reported.
const HIGH_NULL_RATE_THRESHOLD: f64 = 0.1;

/// Non-fatal observation attached to an analysis.
#[derive(Debug, Clone, Serialize)]
pub struct Anomaly {
    #[serde(rename = "type")]
    pub kind: AnomalyKind,
    pub field: FieldPath,
    pub details: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AnomalyKind {
    MultipleTypes,
    LowPresence,
    HighNullRate,
    MixedArrayItems,
    RareType,
}

impl AnomalyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnomalyKind::MultipleTypes => "MULTIPLE_TYPES",
            AnomalyKind::LowPresence => "LOW_PRESENCE",
            AnomalyKind::HighNullRate => "HIGH_NULL_RATE",
            AnomalyKind::MixedArrayItems => "MIXED_ARRAY_ITEMS",
            AnomalyKind::RareType => "RARE_TYPE",
        }
    }
}

/// Outcome of inferring over an in-memory sample.
#[derive(Debug, Clone)]
pub struct InferenceResult {
    pub schema: SchemaDoc,
    pub anomalies: Vec<Anomaly>,
    pub confidence: f64,
}

/// Full analysis of a live collection.
#[derive(Debug, Clone)]
pub struct Analysis {
    pub collection: String,
    pub total_documents: u64,
    pub sampled_documents: u64,
    pub sample_size: u64,
    pub schema: SchemaDoc,
    pub anomalies: Vec<Anomaly>,
    pub confidence: f64,
    pub analyzed_at: DateTime<Utc>,
}

/// Draw a sample through the adapter and infer its schema.
pub async fn analyze_collection(
    adapter: &dyn DatabaseAdapter,
    collection: &str,
    sample_size: u64,
) -> Result<Analysis> {
    let total = adapter.count(collection).await?;
    let target = sample_size.min(total);

    let docs = if target == 0 {
        Vec::new()
    } else {
        adapter.sample(collection, target).await?
    };
    debug!(
        "sampled {} of {} documents from '{}'",
        docs.len(),
        total,
        collection
    );

    let result = infer_from_documents(&docs);
    Ok(Analysis {
        collection: collection.to_string(),
        total_documents: total,
        sampled_documents: docs.len() as u64,
        sample_size,
        schema: result.schema,
        anomalies: result.anomalies,
        confidence: result.confidence,
        analyzed_at: Utc::now(),
    })
}

/// Infer a schema from an already-drawn sample. Pure.
pub fn infer_from_documents(docs: &[Document]) -> InferenceResult {
    let mut children: BTreeMap<String, FieldAcc> = BTreeMap::new();
    for doc in docs {
        observe_document(doc, &mut children, 0, true);
    }

    let total = docs.len() as u64;
    let mut anomalies = Vec::new();
    let mut scores = Vec::new();

    let mut fields = Vec::with_capacity(children.len());
    for (name, acc) in &children {
        let path = FieldPath::field(name.clone());
        fields.push(FieldEntry {
            name: name.clone(),
            node: finalize(acc, total, &path, &mut anomalies, &mut scores),
        });
    }

    let mut root = SchemaNode::object(fields);
    root.sample_count = total;
    root.sort_canonical();

    anomalies.sort_by(|a, b| a.field.cmp(&b.field));

    let confidence = if scores.is_empty() {
        0.0
    } else {
        let mean = scores.iter().sum::<f64>() / scores.len() as f64;
        (mean * 1000.0).round() / 1000.0
    };

    InferenceResult {
        schema: SchemaDoc::new(root),
        anomalies,
        confidence,
    }
}

/// Per-path accumulator.
#[derive(Debug, Default)]
struct FieldAcc {
    /// Times the field was present in its parent container.
    observed: u64,
    /// Observations whose value was null.
    nulls: u64,
    /// Value-tag histogram; null counts as a tag.
    tags: BTreeMap<BsonType, u64>,
    /// Times the value was an object (denominator for children).
    object_count: u64,
    children: BTreeMap<String, FieldAcc>,
    /// Element accumulator for array values.
    element: Option<Box<FieldAcc>>,
}

fn observe_document(
    doc: &Document,
    children: &mut BTreeMap<String, FieldAcc>,
    depth: usize,
    at_root: bool,
) {
    for (key, value) in doc {
        if at_root && key == "_id" {
            continue;
        }
        let acc = children.entry(key.clone()).or_default();
        acc.observed += 1;
        observe_value(acc, value, depth);
    }
}

fn observe_value(acc: &mut FieldAcc, value: &Bson, depth: usize) {
    let tag = BsonType::of(value);
    *acc.tags.entry(tag).or_insert(0) += 1;

    match value {
        Bson::Null | Bson::Undefined => {
            acc.nulls += 1;
        }
        Bson::Document(doc) => {
            acc.object_count += 1;
            if depth < MAX_DEPTH {
                observe_document(doc, &mut acc.children, depth + 1, false);
            }
        }
        Bson::Array(elements) => {
            for element in elements {
                let elem = acc.element.get_or_insert_with(Default::default);
                elem.observed += 1;
                if depth < MAX_DEPTH {
                    observe_value(elem, element, depth + 1);
                } else {
                    *elem.tags.entry(BsonType::of(element)).or_insert(0) += 1;
                }
            }
        }
        _ => {}
    }
}

fn finalize(
    acc: &FieldAcc,
    parent_total: u64,
    path: &FieldPath,
    anomalies: &mut Vec<Anomaly>,
    scores: &mut Vec<f64>,
) -> SchemaNode {
    let presence = if parent_total > 0 {
        acc.observed as f64 / parent_total as f64
    } else {
        0.0
    };
    let null_rate = if acc.observed > 0 {
        acc.nulls as f64 / acc.observed as f64
    } else {
        0.0
    };

    // Every accumulator exists because at least one value was seen, so
    // the histogram is never empty.
    let types = TypeSet::from_counts(acc.tags.iter())
        .unwrap_or_else(|| TypeSet::singleton(BsonType::Null));

    let fields = if types.contains(BsonType::Object) {
        acc.children
            .iter()
            .map(|(name, child)| FieldEntry {
                name: name.clone(),
                node: finalize(child, acc.object_count, &path.child(name), anomalies, scores),
            })
            .collect()
    } else {
        Vec::new()
    };

    let items = if types.contains(BsonType::Array) {
        let node = match &acc.element {
            Some(elem) => finalize(elem, elem.observed, path, anomalies, scores),
            // Only empty arrays were seen; the mandatory items child
            // carries the null tag until data shows up.
            None => SchemaNode::leaf(TypeSet::singleton(BsonType::Null)),
        };
        if node.types.is_union() {
            anomalies.push(Anomaly {
                kind: AnomalyKind::MixedArrayItems,
                field: path.clone(),
                details: json!({ "item_types": node.types.render() }),
            });
        }
        Some(Box::new(node))
    } else {
        None
    };

    report_field_anomalies(acc, path, presence, null_rate, anomalies);
    push_confidence_scores(acc, presence, scores);

    SchemaNode {
        types,
        presence,
        null_rate,
        sample_count: acc.observed,
        fields,
        items,
    }
}

fn report_field_anomalies(
    acc: &FieldAcc,
    path: &FieldPath,
    presence: f64,
    null_rate: f64,
    anomalies: &mut Vec<Anomaly>,
) {
    let non_null_tags = acc.tags.keys().filter(|t| **t != BsonType::Null).count();
    if non_null_tags > 1 {
        let histogram: BTreeMap<&str, u64> = acc
            .tags
            .iter()
            .map(|(tag, count)| (tag.as_str(), *count))
            .collect();
        anomalies.push(Anomaly {
            kind: AnomalyKind::MultipleTypes,
            field: path.clone(),
            details: json!(histogram),
        });
    }

    // Rare variants are retained in the type set; surface them here.
    let floor = 1f64.max(acc.observed as f64 / 1000.0);
    for (tag, count) in &acc.tags {
        if (*count as f64) < floor {
            anomalies.push(Anomaly {
                kind: AnomalyKind::RareType,
                field: path.clone(),
                details: json!({ "bsonType": tag.as_str(), "count": count, "observations": acc.observed }),
            });
        }
    }

    if presence > 0.0 && presence < LOW_PRESENCE_THRESHOLD {
        anomalies.push(Anomaly {
            kind: AnomalyKind::LowPresence,
            field: path.clone(),
            details: json!({ "presence": round4(presence) }),
        });
    }

    if null_rate > HIGH_NULL_RATE_THRESHOLD {
        anomalies.push(Anomaly {
            kind: AnomalyKind::HighNullRate,
            field: path.clone(),
            details: json!({ "null_rate": round4(null_rate) }),
        });
    }
}

fn push_confidence_scores(acc: &FieldAcc, presence: f64, scores: &mut Vec<f64>) {
    if let Some(max_count) = acc.tags.values().max() {
        if acc.observed > 0 {
            scores.push(*max_count as f64 / acc.observed as f64);
        }
    }
    let certainty = if presence < 0.05 || presence > 0.95 {
        1.0
    } else {
        presence.min(1.0 - presence) * 2.0
    };
    scores.push(certainty);
}

fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}
