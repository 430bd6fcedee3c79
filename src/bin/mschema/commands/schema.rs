use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Subcommand;
use serde_json::json;

use mschema::diff::diff_schemas;
use mschema::indexes::recommend_indexes;
use mschema::schema_io::load_schema;

use super::{resolve_context, ConnectionArgs};
use crate::output::OutputManager;

#[derive(Subcommand)]
pub enum SchemaCommands {
    /// Compare two schema files and print the change set
    #[command(name = "diff")]
    Diff {
        /// Source schema file
        #[arg(long = "from")]
        from: PathBuf,

        /// Target schema file
        #[arg(long = "to")]
        to: PathBuf,
    },

    /// Suggest indexes for high-presence fields
    #[command(name = "recommend-indexes")]
    RecommendIndexes {
        #[command(flatten)]
        conn: ConnectionArgs,

        /// Schema file
        #[arg(long)]
        schema: PathBuf,

        /// Collection whose existing indexes are consulted
        #[arg(long)]
        collection: String,
    },
}

pub async fn handle_schema_commands(
    command: SchemaCommands,
    output: &OutputManager,
) -> Result<()> {
    match command {
        SchemaCommands::Diff { from, to } => handle_diff(&from, &to, output),
        SchemaCommands::RecommendIndexes {
            conn,
            schema,
            collection,
        } => handle_recommend_indexes(&conn, &schema, &collection, output).await,
    }
}

fn handle_diff(from: &Path, to: &Path, output: &OutputManager) -> Result<()> {
    let from_schema = load_schema(from).context("failed to load source schema")?;
    let to_schema = load_schema(to).context("failed to load target schema")?;

    let diff = diff_schemas(&from_schema, &to_schema);
    let summary = diff.summary();

    output.heading("Schema Diff");
    if diff.is_empty() {
        output.success("schemas are structurally identical");
    } else {
        output.bullet(&format!("{} added", summary.added));
        output.bullet(&format!("{} removed", summary.removed));
        output.bullet(&format!("{} changed", summary.changed));
    }

    output.payload(&diff.to_json());
    Ok(())
}

async fn handle_recommend_indexes(
    conn: &ConnectionArgs,
    schema_path: &Path,
    collection: &str,
    output: &OutputManager,
) -> Result<()> {
    let schema = load_schema(schema_path).context("failed to load schema")?;
    let ctx = resolve_context(conn, output).await?;

    output.progress("Listing indexes");
    let indexes = ctx
        .adapter
        .list_indexes(collection)
        .await
        .with_context(|| format!("failed to list indexes on '{collection}'"))?;
    output.clear_line();

    let recommendations = recommend_indexes(&schema, &indexes);

    output.heading(&format!("Index Advice: {collection}"));
    if recommendations.is_empty() {
        output.success("no additional indexes suggested");
    } else {
        for rec in &recommendations {
            output.bullet(&format!("{}: {}", rec.field, rec.reason));
        }
    }

    let existing: Vec<_> = indexes
        .iter()
        .map(|index| {
            json!({
                "name": index.name,
                "keys": index.keys.iter().map(|(k, d)| json!([k, d])).collect::<Vec<_>>(),
                "unique": index.unique,
            })
        })
        .collect();
    output.payload(&json!({
        "indexes": existing,
        "recommendations": recommendations,
    }));
    Ok(())
}
