//! Advisory index recommendations.
//!
//! Not a core algorithm: this only cross-references schema presence
//! statistics with the indexes that already exist and suggests
//! candidates. Nothing here mutates the database.

use serde::Serialize;

use crate::adapter::IndexInfo;
use crate::schema::SchemaDoc;

/// Presence at or above which an unindexed top-level field is worth
/// flagging.
const RECOMMEND_PRESENCE: f64 = 0.8;

#[derive(Debug, Clone, Serialize)]
pub struct IndexRecommendation {
    pub field: String,
    pub reason: String,
}

/// Suggest single-field indexes for high-presence top-level fields
/// that no existing index covers.
pub fn recommend_indexes(schema: &SchemaDoc, existing: &[IndexInfo]) -> Vec<IndexRecommendation> {
    let mut indexed: Vec<&str> = Vec::new();
    for index in existing {
        for (field, _direction) in &index.keys {
            indexed.push(field.as_str());
        }
    }

    let mut recommendations: Vec<IndexRecommendation> = schema
        .root
        .fields
        .iter()
        .filter(|entry| entry.node.presence >= RECOMMEND_PRESENCE)
        .filter(|entry| !indexed.contains(&entry.name.as_str()))
        .map(|entry| IndexRecommendation {
            field: entry.name.clone(),
            reason: format!(
                "present in {:.0}% of documents and not covered by any index",
                entry.node.presence * 100.0
            ),
        })
        .collect();
    recommendations.sort_by(|a, b| a.field.cmp(&b.field));
    recommendations
}
