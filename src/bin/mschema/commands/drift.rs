use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Subcommand;

use mschema::drift::{detect_collection_drift, DriftReport};
use mschema::monitor::{run_monitor, DriftSink, MonitorOptions};
use mschema::schema_io::load_schema;

use super::{resolve_context, ConnectionArgs};
use crate::output::OutputManager;

#[derive(Subcommand)]
pub enum DriftCommands {
    /// One-shot drift check; exits 1 when drift is found
    #[command(name = "detect")]
    Detect {
        #[command(flatten)]
        conn: ConnectionArgs,

        /// Expected schema file
        #[arg(long)]
        schema: PathBuf,

        /// Collection to sample
        #[arg(long)]
        collection: String,

        /// Sample size (defaults to the configured value)
        #[arg(long)]
        sample: Option<u64>,
    },

    /// Re-check on a fixed interval until interrupted
    #[command(name = "monitor")]
    Monitor {
        #[command(flatten)]
        conn: ConnectionArgs,

        /// Expected schema file
        #[arg(long)]
        schema: PathBuf,

        /// Collection to sample
        #[arg(long)]
        collection: String,

        /// Sample size (defaults to the configured value)
        #[arg(long)]
        sample: Option<u64>,

        /// Seconds between checks
        #[arg(long, default_value_t = 300)]
        interval: u64,

        /// Run one iteration and exit
        #[arg(long)]
        once: bool,
    },
}

pub async fn handle_drift_commands(command: DriftCommands, output: &OutputManager) -> Result<()> {
    match command {
        DriftCommands::Detect {
            conn,
            schema,
            collection,
            sample,
        } => {
            let expected = load_schema(&schema).context("failed to load expected schema")?;
            let ctx = resolve_context(&conn, output).await?;
            let sample_size = sample.unwrap_or(ctx.config.sample_size);

            output.heading(&format!("Drift: {collection}"));
            output.progress("Sampling collection");
            let report =
                detect_collection_drift(&ctx.adapter, &collection, &expected, sample_size)
                    .await
                    .with_context(|| format!("drift detection failed for '{collection}'"))?;
            output.clear_line();

            render_report(&report, output);
            output.payload(&report.to_json());

            if report.has_drift {
                // CI contract: drift is a failing check.
                std::process::exit(1);
            }
            Ok(())
        }
        DriftCommands::Monitor {
            conn,
            schema,
            collection,
            sample,
            interval,
            once,
        } => {
            let expected = load_schema(&schema).context("failed to load expected schema")?;
            let ctx = resolve_context(&conn, output).await?;
            let sample_size = sample.unwrap_or(ctx.config.sample_size);

            let cancel = Arc::new(AtomicBool::new(false));
            spawn_ctrl_c_handler(cancel.clone());

            let opts = MonitorOptions {
                interval: Duration::from_secs(interval),
                sample_size,
                once,
                cancel: Some(cancel),
            };

            output.heading(&format!("Monitoring: {collection} (every {interval}s)"));
            let mut sink = PrintSink { output };
            run_monitor(&ctx.adapter, &collection, &expected, &opts, &mut sink)
                .await
                .with_context(|| format!("drift monitor failed for '{collection}'"))?;
            output.info("monitor stopped");
            Ok(())
        }
    }
}

fn spawn_ctrl_c_handler(cancel: Arc<AtomicBool>) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.store(true, Ordering::Relaxed);
        }
    });
}

struct PrintSink<'a> {
    output: &'a OutputManager,
}

impl DriftSink for PrintSink<'_> {
    fn emit(&mut self, report: &DriftReport) {
        render_report(report, self.output);
        self.output.payload(&report.to_json());
    }
}

fn render_report(report: &DriftReport, output: &OutputManager) {
    if report.severity.is_empty() {
        output.success("no drift detected");
        return;
    }

    let mut table = output.create_table(vec!["Level", "Field", "Message"]);
    for item in &report.severity {
        table.add_row(vec![
            item.level.as_str().to_string(),
            item.field.dotted(),
            item.message.clone(),
        ]);
    }
    output.print_table(table);

    let line = format!("drift score {:.2}", report.drift_score);
    if report.has_drift {
        output.warning(&line);
    } else {
        output.info(&line);
    }
}
