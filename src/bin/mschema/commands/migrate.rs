use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Subcommand;

use mschema::executor::{execute_plan, ExecOptions, Progress, ProgressSink};
use mschema::plan::{compile_plan, Plan};
use mschema::schema_io::load_schema;
use mschema::{Bson, FieldPath};

use super::{resolve_context, ConnectionArgs};
use crate::output::OutputManager;

#[derive(Subcommand)]
pub enum MigrateCommands {
    /// Compile a migration plan from two schema files
    #[command(name = "plan")]
    Plan {
        /// Source schema file (current data shape)
        #[arg(long = "from")]
        from: PathBuf,

        /// Target schema file (desired data shape)
        #[arg(long = "to")]
        to: PathBuf,

        /// Write the plan to a JSON file instead of stdout
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Apply a plan file to a live collection
    #[command(name = "apply")]
    Apply {
        #[command(flatten)]
        conn: ConnectionArgs,

        /// Plan JSON file
        #[arg(long)]
        plan: PathBuf,

        /// Target schema file (for defaults and the validator)
        #[arg(long = "to")]
        to: PathBuf,

        /// Collection to migrate
        #[arg(long)]
        collection: String,

        /// Compute mutations without writing
        #[arg(long)]
        dry_run: bool,

        /// Documents per batch
        #[arg(long)]
        batch_size: Option<usize>,

        /// Minimum milliseconds between batches
        #[arg(long)]
        rate_limit_ms: Option<u64>,

        /// Resume strictly after this document key
        #[arg(long)]
        resume_from: Option<String>,

        /// Apply the target schema's validator on success
        #[arg(long)]
        apply_validator: bool,

        /// Operator default for a non-nullable added field, as
        /// path=JSON (repeatable)
        #[arg(long = "default", value_name = "PATH=JSON")]
        defaults: Vec<String>,
    },
}

pub async fn handle_migrate_commands(
    command: MigrateCommands,
    output: &OutputManager,
) -> Result<()> {
    match command {
        MigrateCommands::Plan { from, to, out } => handle_plan(&from, &to, out.as_deref(), output),
        MigrateCommands::Apply {
            conn,
            plan,
            to,
            collection,
            dry_run,
            batch_size,
            rate_limit_ms,
            resume_from,
            apply_validator,
            defaults,
        } => {
            handle_apply(
                &conn,
                &plan,
                &to,
                &collection,
                dry_run,
                batch_size,
                rate_limit_ms,
                resume_from,
                apply_validator,
                &defaults,
                output,
            )
            .await
        }
    }
}

fn handle_plan(from: &Path, to: &Path, out: Option<&Path>, output: &OutputManager) -> Result<()> {
    let from_schema = load_schema(from).context("failed to load source schema")?;
    let to_schema = load_schema(to).context("failed to load target schema")?;

    let plan = compile_plan(&from_schema, &to_schema);

    output.heading("Migration Plan");
    if plan.is_empty() {
        output.success("no operations required");
    } else {
        output.info(&format!("{} operation(s)", plan.len()));
        for path in plan.inputs_required() {
            output.warning(&format!(
                "'{path}' is non-nullable with no default; apply will need --default {path}=<json>"
            ));
        }
    }

    match out {
        Some(path) => {
            plan.save(path).context("failed to write plan file")?;
            output.success(&format!("plan saved to {}", path.display()));
        }
        None => {
            let ops: serde_json::Value =
                serde_json::from_str(&plan.to_json_string()?).unwrap_or_default();
            output.payload(&ops);
        }
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn handle_apply(
    conn: &ConnectionArgs,
    plan_path: &Path,
    to: &Path,
    collection: &str,
    dry_run: bool,
    batch_size: Option<usize>,
    rate_limit_ms: Option<u64>,
    resume_from: Option<String>,
    apply_validator: bool,
    defaults: &[String],
    output: &OutputManager,
) -> Result<()> {
    let plan = Plan::load(plan_path).context("failed to load plan file")?;
    let target = load_schema(to).context("failed to load target schema")?;
    let overrides = parse_overrides(defaults)?;

    let ctx = resolve_context(conn, output).await?;

    let cancel = Arc::new(AtomicBool::new(false));
    spawn_ctrl_c_handler(cancel.clone());

    let opts = ExecOptions {
        dry_run,
        batch_size: batch_size.unwrap_or(ctx.config.batch_size),
        rate_limit_ms: rate_limit_ms.unwrap_or(ctx.config.rate_limit_ms),
        resume_from,
        apply_validator,
        overrides,
        cancel: Some(cancel),
        ..Default::default()
    };

    output.heading(&format!("Migrate: {collection}"));
    if dry_run {
        output.warning("dry run: no writes will be issued");
    }

    let mut sink = BatchSink { output };
    let report = execute_plan(&ctx.adapter, collection, &plan, &target, &opts, &mut sink)
        .await
        .with_context(|| format!("migration failed for '{collection}'"))?;

    if report.cancelled {
        output.warning(&format!(
            "cancelled; resume with --resume-from {}",
            report.last_key.as_deref().unwrap_or("<none>")
        ));
    } else {
        output.success(&format!(
            "processed {}, modified {}, skipped {}, failed {}",
            report.processed, report.modified, report.skipped, report.failed
        ));
    }

    output.payload(&serde_json::to_value(&report).unwrap_or_default());
    Ok(())
}

fn parse_overrides(defaults: &[String]) -> Result<BTreeMap<FieldPath, Bson>> {
    let mut overrides = BTreeMap::new();
    for entry in defaults {
        let (path, raw) = entry
            .split_once('=')
            .with_context(|| format!("--default '{entry}' is not of the form path=JSON"))?;
        let value: serde_json::Value = serde_json::from_str(raw)
            .with_context(|| format!("--default '{entry}' carries invalid JSON"))?;
        let value = Bson::try_from(value)
            .with_context(|| format!("--default '{entry}' is not representable"))?;
        overrides.insert(FieldPath::from(path), value);
    }
    Ok(overrides)
}

fn spawn_ctrl_c_handler(cancel: Arc<AtomicBool>) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.store(true, Ordering::Relaxed);
        }
    });
}

struct BatchSink<'a> {
    output: &'a OutputManager,
}

impl ProgressSink for BatchSink<'_> {
    fn emit(&mut self, progress: &Progress) {
        self.output.bullet(&format!(
            "processed {} (modified {}, skipped {}) up to {}",
            progress.processed,
            progress.modified,
            progress.skipped,
            progress.last_key.as_deref().unwrap_or("-")
        ));
    }
}
