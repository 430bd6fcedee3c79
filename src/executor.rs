//! Migration executor.
//!
//! Streams a collection through a plan in rate-limited batches. The
//! per-document mutation computation is pure; the batch loop suspends
//! only on the adapter, which keeps resumability testable without a
//! live database. Per-document failures are counted and logged, never
//! raised; batch-level failures abort with the last processed key as
//! the new resume point.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bson::{Bson, Document};
use futures::TryStreamExt;
use log::{debug, warn};
use serde::Serialize;

use crate::adapter::{DatabaseAdapter, MutationSet, ValidationAction, ValidationLevel};
use crate::errors::{Error, Result};
use crate::path::FieldPath;
use crate::plan::{Plan, PlanOp};
use crate::schema::SchemaDoc;
use crate::types::{convert_value, BsonType};
use crate::validator::build_validator;

/// Why a document was skipped rather than mutated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The engine conversion primitive cannot represent the value.
    ConvertFailed,
    /// Unwrap of an array with more than one element.
    MultiElementUnwrap,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::ConvertFailed => "convert_failed",
            SkipReason::MultiElementUnwrap => "multi_element_unwrap",
        }
    }
}

/// Execution options.
#[derive(Clone)]
pub struct ExecOptions {
    pub dry_run: bool,
    /// Documents per batch; clamped to at least 1.
    pub batch_size: usize,
    /// Minimum milliseconds between batches.
    pub rate_limit_ms: u64,
    /// Resume strictly after this key.
    pub resume_from: Option<String>,
    /// Apply the target schema's validator on successful completion.
    pub apply_validator: bool,
    pub validation_level: ValidationLevel,
    pub validation_action: ValidationAction,
    /// Operator-supplied defaults for `add_field` operations that
    /// require input.
    pub overrides: BTreeMap<FieldPath, Bson>,
    /// Checked at batch boundaries.
    pub cancel: Option<Arc<AtomicBool>>,
}

impl Default for ExecOptions {
    fn default() -> Self {
        ExecOptions {
            dry_run: false,
            batch_size: 1000,
            rate_limit_ms: 0,
            resume_from: None,
            apply_validator: false,
            validation_level: ValidationLevel::Moderate,
            validation_action: ValidationAction::Warn,
            overrides: BTreeMap::new(),
            cancel: None,
        }
    }
}

/// Per-batch progress record.
#[derive(Debug, Clone, Serialize)]
pub struct Progress {
    pub processed: u64,
    pub matched: u64,
    pub modified: u64,
    pub skipped: u64,
    pub last_key: Option<String>,
}

/// Abstract writer for progress records; the CLI is one consumer.
pub trait ProgressSink: Send {
    fn emit(&mut self, progress: &Progress);
}

/// Sink that discards progress.
pub struct NullSink;

impl ProgressSink for NullSink {
    fn emit(&mut self, _progress: &Progress) {}
}

/// Final outcome of an executor run.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionReport {
    pub processed: u64,
    pub matched: u64,
    pub modified: u64,
    pub skipped: u64,
    pub skip_reasons: BTreeMap<String, u64>,
    pub failed: u64,
    /// Documents a dry run would have modified.
    pub planned: u64,
    pub last_key: Option<String>,
    pub dry_run: bool,
    pub cancelled: bool,
    pub validator_applied: bool,
}

impl ExecutionReport {
    fn new(dry_run: bool) -> Self {
        ExecutionReport {
            processed: 0,
            matched: 0,
            modified: 0,
            skipped: 0,
            skip_reasons: BTreeMap::new(),
            failed: 0,
            planned: 0,
            last_key: None,
            dry_run,
            cancelled: false,
            validator_applied: false,
        }
    }
}

/// Run a plan against a collection.
///
/// The target schema is used only for operation defaults and the
/// optional validator refresh on success. Re-running with the same
/// plan is a no-op: every mutation set comes out empty.
pub async fn execute_plan(
    adapter: &dyn DatabaseAdapter,
    collection: &str,
    plan: &Plan,
    target: &SchemaDoc,
    opts: &ExecOptions,
    sink: &mut dyn ProgressSink,
) -> Result<ExecutionReport> {
    // Refuse up front rather than halfway through the collection.
    for op in &plan.ops {
        if op.requires_input() && !opts.overrides.contains_key(op.path()) {
            return Err(Error::PlanRequiresInput {
                path: op.path().clone(),
            });
        }
    }

    let batch_size = opts.batch_size.max(1);
    let mut report = ExecutionReport::new(opts.dry_run);
    report.last_key = opts.resume_from.clone();

    let mut stream = adapter.iterate(collection, opts.resume_from.as_deref()).await?;

    'run: loop {
        let mut batch = Vec::with_capacity(batch_size);
        while batch.len() < batch_size {
            match stream.try_next().await {
                Ok(Some(pair)) => batch.push(pair),
                Ok(None) => break,
                Err(err) => {
                    return Err(Error::ExecutionAborted {
                        last_key: report.last_key.clone(),
                        source: err,
                    })
                }
            }
        }
        if batch.is_empty() {
            break;
        }

        for (key, doc) in &batch {
            report.processed += 1;
            report.matched += 1;

            let (mutation, skips) = mutation_for(doc, plan, &opts.overrides);

            if !skips.is_empty() {
                report.skipped += 1;
                for (path, reason) in &skips {
                    debug!("skipping '{key}' at {path}: {}", reason.as_str());
                    *report
                        .skip_reasons
                        .entry(reason.as_str().to_string())
                        .or_insert(0) += 1;
                }
            }

            if opts.dry_run {
                if !mutation.is_empty() {
                    report.planned += 1;
                    debug!(
                        "dry run: '{key}' would receive {} set(s), {} unset(s)",
                        mutation.set.len(),
                        mutation.unset.len()
                    );
                }
            } else if !mutation.is_empty() {
                match adapter.update_one(collection, key, &mutation).await {
                    Ok(outcome) => {
                        report.modified += outcome.modified;
                    }
                    Err(err) if err.is_document_level() => {
                        report.failed += 1;
                        warn!("update failed for '{key}': {err}");
                    }
                    Err(err) => {
                        return Err(Error::ExecutionAborted {
                            last_key: report.last_key.clone(),
                            source: err,
                        })
                    }
                }
            }

            report.last_key = Some(key.clone());
        }

        sink.emit(&Progress {
            processed: report.processed,
            matched: report.matched,
            modified: report.modified,
            skipped: report.skipped,
            last_key: report.last_key.clone(),
        });

        if is_cancelled(&opts.cancel) {
            report.cancelled = true;
            break 'run;
        }

        if opts.rate_limit_ms > 0 {
            tokio::time::sleep(Duration::from_millis(opts.rate_limit_ms)).await;
        }
    }

    if opts.apply_validator && !opts.dry_run && !report.cancelled {
        let validator = build_validator(target);
        adapter
            .set_validator(collection, validator, opts.validation_level, opts.validation_action)
            .await?;
        report.validator_applied = true;
    }

    Ok(report)
}

fn is_cancelled(cancel: &Option<Arc<AtomicBool>>) -> bool {
    cancel
        .as_ref()
        .map(|flag| flag.load(Ordering::Relaxed))
        .unwrap_or(false)
}

/// Compute the mutation set for one document: the subset of plan
/// operations that actually change it. Pure.
pub fn mutation_for(
    doc: &Document,
    plan: &Plan,
    overrides: &BTreeMap<FieldPath, Bson>,
) -> (MutationSet, Vec<(FieldPath, SkipReason)>) {
    let mut mutation = MutationSet::default();
    let mut skips = Vec::new();

    for op in &plan.ops {
        match op {
            PlanOp::AddField { path, default, .. } => {
                if lookup(doc, path).is_none() {
                    let value = overrides
                        .get(path)
                        .cloned()
                        .or_else(|| {
                            default
                                .as_ref()
                                .and_then(|v| Bson::try_from(v.clone()).ok())
                        })
                        .unwrap_or(Bson::Null);
                    mutation.set.insert(path.dotted(), value);
                }
            }
            PlanOp::RemoveField { path } => {
                if lookup(doc, path).is_some() {
                    mutation.unset.push(path.dotted());
                }
            }
            PlanOp::Convert { path, to } => {
                if let Some(value) = lookup(doc, path) {
                    let tag = BsonType::of(value);
                    if tag == BsonType::Null || tag == *to {
                        continue;
                    }
                    match convert_value(value, *to) {
                        Some(converted) => {
                            mutation.set.insert(path.dotted(), converted);
                        }
                        None => skips.push((path.clone(), SkipReason::ConvertFailed)),
                    }
                }
            }
            PlanOp::WrapArray { path, .. } => {
                if let Some(value) = lookup(doc, path) {
                    let tag = BsonType::of(value);
                    if tag != BsonType::Array && tag != BsonType::Null {
                        mutation
                            .set
                            .insert(path.dotted(), Bson::Array(vec![value.clone()]));
                    }
                }
            }
            PlanOp::UnwrapArray { path } => {
                if let Some(Bson::Array(elements)) = lookup(doc, path) {
                    match elements.len() {
                        0 => {
                            mutation.set.insert(path.dotted(), Bson::Null);
                        }
                        1 => {
                            mutation.set.insert(path.dotted(), elements[0].clone());
                        }
                        _ => skips.push((path.clone(), SkipReason::MultiElementUnwrap)),
                    }
                }
            }
            PlanOp::ConvertItems { path, to_item_type } => {
                if let Some(Bson::Array(elements)) = lookup(doc, path) {
                    let mut converted = Vec::with_capacity(elements.len());
                    let mut failed = false;
                    let mut changed = false;
                    for element in elements {
                        if matches!(element, Bson::Null) {
                            converted.push(Bson::Null);
                            continue;
                        }
                        match convert_value(element, *to_item_type) {
                            Some(value) => {
                                if &value != element {
                                    changed = true;
                                }
                                converted.push(value);
                            }
                            None => {
                                failed = true;
                                break;
                            }
                        }
                    }
                    if failed {
                        skips.push((path.clone(), SkipReason::ConvertFailed));
                    } else if changed {
                        mutation.set.insert(path.dotted(), Bson::Array(converted));
                    }
                }
            }
        }
    }

    (mutation, skips)
}

fn lookup<'a>(doc: &'a Document, path: &FieldPath) -> Option<&'a Bson> {
    let mut segments = path.segments().iter();
    let first = segments.next()?;
    let mut current = doc.get(first)?;
    for segment in segments {
        match current {
            Bson::Document(sub) => current = sub.get(segment)?,
            _ => return None,
        }
    }
    Some(current)
}
