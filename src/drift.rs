//! Schema-to-live drift detection.
//!
//! Infers a schema from a fresh sample and diffs it against the
//! declared one, with one asymmetry: live data carrying a *narrower*
//! type set than declared is not drift and is suppressed. Every
//! surviving change is classified with a severity and folded into a
//! scalar drift score.

use std::fmt;

use serde_json::{json, Value};

use crate::adapter::DatabaseAdapter;
use crate::diff::{diff_schemas, Change, ChangeSet};
use crate::errors::Result;
use crate::infer::analyze_collection;
use crate::path::FieldPath;
use crate::schema::SchemaDoc;

/// Score weight per critical item.
pub const CRITICAL_WEIGHT: f64 = 0.5;
/// Score weight per warning item.
pub const WARNING_WEIGHT: f64 = 0.2;
/// Score weight per info item.
pub const INFO_WEIGHT: f64 = 0.05;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One classified drift finding.
#[derive(Debug, Clone)]
pub struct SeverityItem {
    pub level: Severity,
    pub field: FieldPath,
    pub message: String,
}

/// Drift detection outcome: the (suppression-filtered) change set plus
/// severity classification and score.
#[derive(Debug, Clone)]
pub struct DriftReport {
    pub changes: ChangeSet,
    pub severity: Vec<SeverityItem>,
    pub drift_score: f64,
    pub has_drift: bool,
}

impl DriftReport {
    pub fn count(&self, level: Severity) -> usize {
        self.severity.iter().filter(|item| item.level == level).count()
    }

    /// Change-set JSON extended with the drift fields; this is also
    /// the webhook payload, posted verbatim.
    pub fn to_json(&self) -> Value {
        let mut json = self.changes.to_json();
        let severity: Vec<Value> = self
            .severity
            .iter()
            .map(|item| {
                json!({
                    "level": item.level.as_str(),
                    "field": item.field.dotted(),
                    "message": item.message,
                })
            })
            .collect();
        json["severity"] = Value::Array(severity);
        json["drift_score"] = json!(self.drift_score);
        json["has_drift"] = json!(self.has_drift);
        json["critical_count"] = json!(self.count(Severity::Critical));
        json["warning_count"] = json!(self.count(Severity::Warning));
        json["info_count"] = json!(self.count(Severity::Info));
        json
    }
}

/// Sample the collection through the adapter and report drift against
/// the declared schema.
pub async fn detect_collection_drift(
    adapter: &dyn DatabaseAdapter,
    collection: &str,
    expected: &SchemaDoc,
    sample_size: u64,
) -> Result<DriftReport> {
    let analysis = analyze_collection(adapter, collection, sample_size).await?;
    Ok(detect_drift(expected, &analysis.schema))
}

/// Classify drift between a declared schema and an observed one.
pub fn detect_drift(expected: &SchemaDoc, observed: &SchemaDoc) -> DriftReport {
    let mut changes = diff_schemas(expected, observed);

    // Live data narrower than declared is within contract.
    changes.retain(|change| match change {
        Change::TypeChanged { from, to, .. } => !to.is_strict_subset_of(from),
        Change::ItemsChanged { from, to, .. } => !to.is_strict_subset_of(from),
        _ => true,
    });

    let severity: Vec<SeverityItem> = changes.changes().iter().map(classify).collect();

    let raw: f64 = severity
        .iter()
        .map(|item| match item.level {
            Severity::Critical => CRITICAL_WEIGHT,
            Severity::Warning => WARNING_WEIGHT,
            Severity::Info => INFO_WEIGHT,
        })
        .sum();
    let denominator = expected.field_count().max(1) as f64;
    let drift_score = round2(raw.min(1.0) / denominator);

    let has_drift = severity.iter().any(|item| item.level >= Severity::Warning);

    DriftReport {
        changes,
        severity,
        drift_score,
        has_drift,
    }
}

fn classify(change: &Change) -> SeverityItem {
    match change {
        Change::Added { path, types } => SeverityItem {
            level: Severity::Info,
            field: path.clone(),
            message: format!("New field '{path}' ({types}) detected in live data"),
        },
        Change::Removed { path, .. } => SeverityItem {
            level: Severity::Warning,
            field: path.clone(),
            message: format!("Field '{path}' declared but missing from live data"),
        },
        Change::TypeChanged { path, from, to } => SeverityItem {
            level: Severity::Critical,
            field: path.clone(),
            message: format!("Type changed for '{path}': {from} -> {to}"),
        },
        Change::ItemsChanged { path, from, to } => SeverityItem {
            level: Severity::Critical,
            field: path.clone(),
            message: format!("Array item type changed for '{path}': {from} -> {to}"),
        },
        Change::PresenceChanged { path, from, to } => SeverityItem {
            level: Severity::Warning,
            field: path.clone(),
            message: format!(
                "Required flag changed for '{path}' (presence {:.2} -> {:.2})",
                from, to
            ),
        },
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
