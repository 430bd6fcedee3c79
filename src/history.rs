//! Durable analysis history.
//!
//! A stored analyze run leaves two records in the database itself: a
//! schema snapshot in `schema_snapshots` and a run summary in
//! `analysis_runs`, linked by the snapshot key. This gives a
//! queryable history of how a collection's shape evolved, independent
//! of the schema files checked into a repository.

use bson::{doc, Bson};
use log::debug;

use crate::adapter::DatabaseAdapter;
use crate::errors::Result;
use crate::infer::Analysis;
use crate::schema_io;
use crate::validator::build_validator;

/// Collection holding one record per stored schema snapshot.
pub const SNAPSHOT_COLLECTION: &str = "schema_snapshots";

/// Collection holding one record per stored analyze run.
pub const RUN_COLLECTION: &str = "analysis_runs";

/// Keys of the two records written by [`record_analysis`].
#[derive(Debug, Clone)]
pub struct HistoryKeys {
    pub snapshot_key: String,
    pub run_key: String,
}

/// Persist an analysis: the schema snapshot first, then the run
/// summary referencing it.
///
/// The snapshot stores the schema both in its declarative YAML form
/// and as the validator projection, so history entries are queryable
/// with the engine's own operators.
pub async fn record_analysis(
    adapter: &dyn DatabaseAdapter,
    analysis: &Analysis,
) -> Result<HistoryKeys> {
    let created_at = bson::DateTime::from_chrono(analysis.analyzed_at);

    let snapshot = doc! {
        "collection": &analysis.collection,
        "schema_yaml": schema_io::emit_string(&analysis.schema)?,
        "validator": build_validator(&analysis.schema),
        "confidence": analysis.confidence,
        "created_at": created_at,
    };
    let snapshot_key = adapter.insert_one(SNAPSHOT_COLLECTION, snapshot).await?;

    let anomalies = serde_json::to_value(&analysis.anomalies)
        .ok()
        .and_then(|value| Bson::try_from(value).ok())
        .unwrap_or_else(|| Bson::Array(Vec::new()));

    let run = doc! {
        "collection": &analysis.collection,
        "sample_size": analysis.sample_size as i64,
        "total_documents": analysis.total_documents as i64,
        "sampled_documents": analysis.sampled_documents as i64,
        "confidence": analysis.confidence,
        "anomalies": anomalies,
        "schema_snapshot_id": &snapshot_key,
        "created_at": created_at,
    };
    let run_key = adapter.insert_one(RUN_COLLECTION, run).await?;

    debug!(
        "stored analysis of '{}' (snapshot {snapshot_key}, run {run_key})",
        analysis.collection
    );
    Ok(HistoryKeys {
        snapshot_key,
        run_key,
    })
}
