//! Fixed-interval drift monitoring.
//!
//! One monitor drives one collection: sample, detect drift, hand the
//! report to a sink, sleep, repeat. The sink is the extension point —
//! the CLI prints the payload, a notifier could post it. Cancellation
//! is honoured between iterations.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::info;

use crate::adapter::DatabaseAdapter;
use crate::drift::{detect_collection_drift, DriftReport};
use crate::errors::Result;
use crate::schema::SchemaDoc;

/// Consumer of drift reports.
pub trait DriftSink: Send {
    fn emit(&mut self, report: &DriftReport);
}

#[derive(Clone)]
pub struct MonitorOptions {
    pub interval: Duration,
    pub sample_size: u64,
    /// Run a single iteration and return.
    pub once: bool,
    /// Checked between iterations.
    pub cancel: Option<Arc<AtomicBool>>,
}

/// Monitor a collection until cancelled (or once). Returns the last
/// report produced.
pub async fn run_monitor(
    adapter: &dyn DatabaseAdapter,
    collection: &str,
    expected: &SchemaDoc,
    opts: &MonitorOptions,
    sink: &mut dyn DriftSink,
) -> Result<Option<DriftReport>> {
    let mut last = None;

    loop {
        let report = detect_collection_drift(adapter, collection, expected, opts.sample_size).await?;
        info!(
            "drift check on '{}': score {:.2}, {} finding(s)",
            collection,
            report.drift_score,
            report.severity.len()
        );
        sink.emit(&report);
        last = Some(report);

        if opts.once || is_cancelled(&opts.cancel) {
            return Ok(last);
        }
        tokio::time::sleep(opts.interval).await;
        if is_cancelled(&opts.cancel) {
            return Ok(last);
        }
    }
}

fn is_cancelled(cancel: &Option<Arc<AtomicBool>>) -> bool {
    cancel
        .as_ref()
        .map(|flag| flag.load(Ordering::Relaxed))
        .unwrap_or(false)
}
