pub mod analyze;
pub mod drift;
pub mod init;
pub mod migrate;
pub mod schema;
pub mod validate;

use anyhow::{Context, Result};
use clap::Args;

use mschema::config::{self, RuntimeConfig};
use mschema::MongoAdapter;

use crate::output::OutputManager;

/// Connection flags shared by every command that touches the
/// database. Flags beat configuration; configuration is resolved from
/// the working directory (env > local file > project file).
#[derive(Args, Debug)]
pub struct ConnectionArgs {
    /// MongoDB connection string (overrides configuration)
    #[arg(long)]
    pub uri: Option<String>,

    /// Database name (overrides configuration)
    #[arg(long)]
    pub db: Option<String>,
}

pub struct CommandContext {
    pub adapter: MongoAdapter,
    pub config: RuntimeConfig,
}

/// Resolve configuration and connect.
pub async fn resolve_context(
    args: &ConnectionArgs,
    output: &OutputManager,
) -> Result<CommandContext> {
    let cwd = std::env::current_dir().context("failed to determine working directory")?;

    let mut config = match config::load_runtime_config(&cwd) {
        Ok(config) => config,
        Err(err) => {
            // Explicit flags can stand in for a missing config file.
            if let (Some(uri), Some(db)) = (&args.uri, &args.db) {
                RuntimeConfig {
                    mongodb_uri: uri.clone(),
                    default_db: db.clone(),
                    sample_size: mschema::infer::DEFAULT_SAMPLE_SIZE,
                    batch_size: config::DEFAULT_BATCH_SIZE,
                    rate_limit_ms: 0,
                    ai_api_key: None,
                }
            } else {
                return Err(err).context("run 'mschema init' or pass --uri and --db");
            }
        }
    };

    if let Some(uri) = &args.uri {
        config.mongodb_uri = uri.clone();
    }
    if let Some(db) = &args.db {
        config.default_db = db.clone();
    }

    output.progress("Connecting to MongoDB");
    let adapter = MongoAdapter::connect(&config.mongodb_uri, &config.default_db)
        .await
        .context("failed to connect to MongoDB")?;
    output.clear_line();
    output.verbose(&format!("connected to {}", config.default_db));

    Ok(CommandContext { adapter, config })
}
