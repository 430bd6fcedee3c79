use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use serde_json::json;

use mschema::history::record_analysis;
use mschema::infer::analyze_collection;
use mschema::schema_io;
use mschema::{FieldPath, SchemaNode};

use super::{resolve_context, ConnectionArgs};
use crate::output::OutputManager;

#[derive(Args)]
pub struct AnalyzeArgs {
    #[command(flatten)]
    pub conn: ConnectionArgs,

    /// Collection to analyze
    #[arg(long)]
    pub collection: String,

    /// Sample size (defaults to the configured value)
    #[arg(long)]
    pub sample: Option<u64>,

    /// Save the inferred schema to a YAML file
    #[arg(long)]
    pub save: Option<PathBuf>,

    /// Store the analysis as a snapshot and run record in the
    /// database
    #[arg(long)]
    pub store: bool,
}

pub async fn handle_analyze(args: AnalyzeArgs, output: &OutputManager) -> Result<()> {
    let ctx = resolve_context(&args.conn, output).await?;
    let sample_size = args.sample.unwrap_or(ctx.config.sample_size);

    output.heading(&format!("Analyze: {}", args.collection));
    output.progress("Sampling collection");
    let analysis = analyze_collection(&ctx.adapter, &args.collection, sample_size)
        .await
        .with_context(|| format!("failed to analyze '{}'", args.collection))?;
    output.clear_line();

    output.key_value("Documents", &analysis.total_documents.to_string());
    output.key_value("Sampled", &analysis.sampled_documents.to_string());
    output.key_value("Confidence", &format!("{:.3}", analysis.confidence));

    // Flat field listing for both the table and the JSON payload.
    let mut fields = Vec::new();
    analysis
        .schema
        .root
        .walk(&FieldPath::root(), &mut |path: &FieldPath, node: &SchemaNode| {
            fields.push(json!({
                "field": path.dotted(),
                "bsonType": node.types,
                "presence": (node.presence * 100.0).round() / 100.0,
                "null_rate": (node.null_rate * 100.0).round() / 100.0,
                "required": node.required(),
            }));
        });

    let mut table = output.create_table(vec!["Field", "Type", "Presence", "Null rate", "Required"]);
    for field in &fields {
        table.add_row(vec![
            field["field"].as_str().unwrap_or_default().to_string(),
            render_types(&field["bsonType"]),
            format!("{}", field["presence"]),
            format!("{}", field["null_rate"]),
            field["required"].to_string(),
        ]);
    }
    output.print_table(table);

    if !analysis.anomalies.is_empty() {
        output.heading("Anomalies");
        for anomaly in &analysis.anomalies {
            output.bullet(&format!("{}: {}", anomaly.field, anomaly.kind.as_str()));
        }
    }

    output.payload(&json!({
        "collection": analysis.collection,
        "total_documents": analysis.total_documents,
        "sampled_documents": analysis.sampled_documents,
        "sample_size": analysis.sample_size,
        "confidence": analysis.confidence,
        "analyzed_at": analysis.analyzed_at.to_rfc3339(),
        "fields": fields,
        "anomalies": analysis.anomalies,
    }));

    if let Some(path) = &args.save {
        schema_io::save_schema(path, &analysis.schema)
            .with_context(|| format!("failed to save schema to {}", path.display()))?;
        output.success(&format!("schema saved to {}", path.display()));
    }

    if args.store {
        let keys = record_analysis(&ctx.adapter, &analysis)
            .await
            .context("failed to store analysis history")?;
        output.success(&format!(
            "analysis stored (snapshot {}, run {})",
            keys.snapshot_key, keys.run_key
        ));
    }

    Ok(())
}

fn render_types(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Array(items) => items
            .iter()
            .filter_map(|v| v.as_str())
            .collect::<Vec<_>>()
            .join(", "),
        other => other.to_string(),
    }
}
