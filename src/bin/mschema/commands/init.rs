use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;

use mschema::config;

use crate::output::OutputManager;

#[derive(Args)]
pub struct InitArgs {
    /// Directory to place the config file in (defaults to the current
    /// directory)
    #[arg(long)]
    pub path: Option<PathBuf>,
}

pub fn handle_init(args: InitArgs, output: &OutputManager) -> Result<()> {
    let dir = match args.path {
        Some(path) => path,
        None => std::env::current_dir().context("failed to determine working directory")?,
    };

    let existed = dir.join(config::PROJECT_CONFIG_FILE).exists();
    let path = config::write_default_config(&dir).context("failed to write config file")?;

    if existed {
        output.warning(&format!("{} already exists, left untouched", path.display()));
    } else {
        output.success(&format!("wrote {}", path.display()));
        output.info("edit mongodb_uri and default_db, then run 'mschema analyze'");
    }
    Ok(())
}
