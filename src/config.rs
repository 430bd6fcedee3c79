//! Configuration resolution.
//!
//! Recognised options come from three layers, highest precedence
//! first: process environment (`MSCHEMA_*`), the per-user local file
//! `.mschema.local.yml`, and the project file `.mschema.yml`. The
//! connection string and database name are required; everything else
//! has operational defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::errors::{Error, Result};
use crate::infer::DEFAULT_SAMPLE_SIZE;

pub const PROJECT_CONFIG_FILE: &str = ".mschema.yml";
pub const LOCAL_CONFIG_FILE: &str = ".mschema.local.yml";

const ENV_URI: &str = "MSCHEMA_MONGODB_URI";
const ENV_DB: &str = "MSCHEMA_DEFAULT_DB";
const ENV_AI_KEY: &str = "MSCHEMA_AI_API_KEY";

pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// One configuration file layer; every key optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub mongodb_uri: Option<String>,
    #[serde(default)]
    pub default_db: Option<String>,
    #[serde(default)]
    pub sample_size: Option<u64>,
    #[serde(default)]
    pub batch_size: Option<usize>,
    #[serde(default)]
    pub rate_limit_ms: Option<u64>,
    #[serde(default)]
    pub ai_api_key: Option<String>,
}

impl FileConfig {
    fn load(path: &Path) -> Result<FileConfig> {
        if !path.exists() {
            return Ok(FileConfig::default());
        }
        let text = std::fs::read_to_string(path)
            .map_err(|err| Error::Config(format!("{}: {err}", path.display())))?;
        serde_yaml::from_str(&text)
            .map_err(|err| Error::Config(format!("{}: {err}", path.display())))
    }
}

/// Fully resolved configuration.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub mongodb_uri: String,
    pub default_db: String,
    pub sample_size: u64,
    pub batch_size: usize,
    pub rate_limit_ms: u64,
    /// Advisory only; the core ignores it.
    pub ai_api_key: Option<String>,
}

/// Resolve configuration rooted at the given directory.
pub fn load_runtime_config(dir: &Path) -> Result<RuntimeConfig> {
    let project = FileConfig::load(&dir.join(PROJECT_CONFIG_FILE))?;
    let local = FileConfig::load(&dir.join(LOCAL_CONFIG_FILE))?;

    let mongodb_uri = env_var(ENV_URI)
        .or(local.mongodb_uri)
        .or(project.mongodb_uri)
        .ok_or_else(|| {
            Error::Config(format!(
                "missing MongoDB URI; set {ENV_URI}, or 'mongodb_uri' in {LOCAL_CONFIG_FILE} or {PROJECT_CONFIG_FILE}"
            ))
        })?;
    let default_db = env_var(ENV_DB)
        .or(local.default_db)
        .or(project.default_db)
        .ok_or_else(|| {
            Error::Config(format!(
                "missing database name; set {ENV_DB}, or 'default_db' in {LOCAL_CONFIG_FILE} or {PROJECT_CONFIG_FILE}"
            ))
        })?;

    Ok(RuntimeConfig {
        mongodb_uri,
        default_db,
        sample_size: local
            .sample_size
            .or(project.sample_size)
            .unwrap_or(DEFAULT_SAMPLE_SIZE),
        batch_size: local
            .batch_size
            .or(project.batch_size)
            .unwrap_or(DEFAULT_BATCH_SIZE),
        rate_limit_ms: local.rate_limit_ms.or(project.rate_limit_ms).unwrap_or(0),
        ai_api_key: env_var(ENV_AI_KEY).or(local.ai_api_key).or(project.ai_api_key),
    })
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

/// Write a starter project config; leaves an existing file untouched.
pub fn write_default_config(dir: &Path) -> Result<PathBuf> {
    let path = dir.join(PROJECT_CONFIG_FILE);
    if path.exists() {
        return Ok(path);
    }
    let starter = FileConfig {
        mongodb_uri: Some("mongodb://localhost:27017".to_string()),
        default_db: Some("myapp".to_string()),
        sample_size: Some(DEFAULT_SAMPLE_SIZE),
        batch_size: Some(DEFAULT_BATCH_SIZE),
        rate_limit_ms: Some(0),
        ai_api_key: None,
    };
    let text = serde_yaml::to_string(&starter)
        .map_err(|err| Error::Config(err.to_string()))?;
    std::fs::write(&path, text)
        .map_err(|err| Error::Config(format!("{}: {err}", path.display())))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_uri_is_config_error() {
        let dir = TempDir::new().unwrap();
        let err = load_runtime_config(dir.path()).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(err.to_string().contains("MongoDB URI"));
    }

    #[test]
    fn test_project_file_provides_values() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join(PROJECT_CONFIG_FILE),
            "mongodb_uri: mongodb://db:27017\ndefault_db: shop\nsample_size: 500\n",
        )
        .unwrap();

        let config = load_runtime_config(dir.path()).unwrap();
        assert_eq!(config.mongodb_uri, "mongodb://db:27017");
        assert_eq!(config.default_db, "shop");
        assert_eq!(config.sample_size, 500);
        assert_eq!(config.batch_size, DEFAULT_BATCH_SIZE);
    }

    #[test]
    fn test_local_file_overrides_project() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join(PROJECT_CONFIG_FILE),
            "mongodb_uri: mongodb://shared:27017\ndefault_db: shop\n",
        )
        .unwrap();
        std::fs::write(
            dir.path().join(LOCAL_CONFIG_FILE),
            "mongodb_uri: mongodb://localhost:27017\n",
        )
        .unwrap();

        let config = load_runtime_config(dir.path()).unwrap();
        assert_eq!(config.mongodb_uri, "mongodb://localhost:27017");
        assert_eq!(config.default_db, "shop");
    }

    #[test]
    fn test_invalid_yaml_names_file() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(PROJECT_CONFIG_FILE), "mongodb_uri: [oops\n").unwrap();
        let err = load_runtime_config(dir.path()).unwrap_err();
        assert!(err.to_string().contains(PROJECT_CONFIG_FILE));
    }

    #[test]
    fn test_write_default_config_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let first = write_default_config(dir.path()).unwrap();
        std::fs::write(&first, "mongodb_uri: mongodb://kept:27017\ndefault_db: kept\n").unwrap();
        write_default_config(dir.path()).unwrap();

        let config = load_runtime_config(dir.path()).unwrap();
        assert_eq!(config.default_db, "kept");
    }
}
