use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Subcommand, ValueEnum};
use serde_json::json;

use mschema::schema_io::load_schema;
use mschema::validator::{apply_validator, validate_collection};
use mschema::{ValidationAction, ValidationLevel};

use super::{resolve_context, ConnectionArgs};
use crate::output::OutputManager;

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum LevelArg {
    Off,
    Moderate,
    Strict,
}

impl From<LevelArg> for ValidationLevel {
    fn from(level: LevelArg) -> Self {
        match level {
            LevelArg::Off => ValidationLevel::Off,
            LevelArg::Moderate => ValidationLevel::Moderate,
            LevelArg::Strict => ValidationLevel::Strict,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum ActionArg {
    Warn,
    Error,
}

impl From<ActionArg> for ValidationAction {
    fn from(action: ActionArg) -> Self {
        match action {
            ActionArg::Warn => ValidationAction::Warn,
            ActionArg::Error => ValidationAction::Error,
        }
    }
}

#[derive(Subcommand)]
pub enum ValidateCommands {
    /// Check a sample of live documents against a schema file
    #[command(name = "test")]
    Test {
        #[command(flatten)]
        conn: ConnectionArgs,

        /// Schema file
        #[arg(long)]
        schema: PathBuf,

        /// Collection to sample
        #[arg(long)]
        collection: String,

        /// Sample size (defaults to the configured value)
        #[arg(long)]
        sample: Option<u64>,

        /// Maximum per-document error records to keep
        #[arg(long, default_value_t = 100)]
        max_errors: usize,
    },

    /// Install the schema's validator on the collection
    #[command(name = "apply")]
    Apply {
        #[command(flatten)]
        conn: ConnectionArgs,

        /// Schema file
        #[arg(long)]
        schema: PathBuf,

        /// Collection to modify
        #[arg(long)]
        collection: String,

        /// Enforcement level
        #[arg(long, value_enum, default_value = "moderate")]
        level: LevelArg,

        /// Action on violation
        #[arg(long, value_enum, default_value = "error")]
        action: ActionArg,
    },
}

pub async fn handle_validate_commands(
    command: ValidateCommands,
    output: &OutputManager,
) -> Result<()> {
    match command {
        ValidateCommands::Test {
            conn,
            schema,
            collection,
            sample,
            max_errors,
        } => {
            let schema_doc = load_schema(&schema).context("failed to load schema")?;
            let ctx = resolve_context(&conn, output).await?;
            let sample_size = sample.unwrap_or(ctx.config.sample_size);

            output.heading(&format!("Validate: {collection}"));
            output.progress("Sampling collection");
            let outcome = validate_collection(
                &ctx.adapter,
                &collection,
                &schema_doc,
                sample_size,
                max_errors,
            )
            .await
            .with_context(|| format!("validation failed for '{collection}'"))?;
            output.clear_line();

            if outcome.invalid == 0 {
                output.success(&format!(
                    "all {} sampled document(s) conform",
                    outcome.sampled_documents
                ));
            } else {
                output.warning(&format!(
                    "{} of {} sampled document(s) do not conform",
                    outcome.invalid, outcome.sampled_documents
                ));
                let mut table = output.create_table(vec!["Document", "Issue"]);
                for record in &outcome.errors {
                    for issue in &record.issues {
                        table.add_row(vec![record.key.clone(), issue.clone()]);
                    }
                }
                output.print_table(table);
            }

            let errors: Vec<_> = outcome
                .errors
                .iter()
                .map(|record| json!({ "_id": record.key, "issues": record.issues }))
                .collect();
            output.payload(&json!({
                "collection": outcome.collection,
                "total_documents": outcome.total_documents,
                "sampled_documents": outcome.sampled_documents,
                "valid": outcome.valid,
                "invalid": outcome.invalid,
                "errors": errors,
                "validated_at": outcome.validated_at.to_rfc3339(),
            }));
            Ok(())
        }
        ValidateCommands::Apply {
            conn,
            schema,
            collection,
            level,
            action,
        } => {
            let schema_doc = load_schema(&schema).context("failed to load schema")?;
            let ctx = resolve_context(&conn, output).await?;

            apply_validator(
                &ctx.adapter,
                &collection,
                &schema_doc,
                level.into(),
                action.into(),
            )
            .await
            .with_context(|| format!("failed to set validator on '{collection}'"))?;

            output.success(&format!("validator applied to '{collection}'"));
            output.payload(&json!({ "status": "applied", "collection": collection }));
            Ok(())
        }
    }
}
