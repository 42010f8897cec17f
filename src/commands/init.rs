//! Init command implementation

use crate::config::Config;
use crate::error::{Error, Result};
use crate::meta::MetaDb;
use serde::Serialize;
use std::path::PathBuf;
use tracing::info;

/// Where init put things
#[derive(Debug, Clone, Serialize)]
pub struct InitReport {
    pub config_path: PathBuf,
    pub db_path: PathBuf,
    pub overwritten: bool,
}

/// Write a default config and create the database schema
pub async fn cmd_init(base_dir: Option<PathBuf>, force: bool) -> Result<InitReport> {
    let mut config = Config::default();
    config.init_paths(base_dir);

    let existed = config.paths.config_file.exists();
    if existed && !force {
        return Err(Error::AlreadyInitialized(
            config.paths.config_file.display().to_string(),
        ));
    }

    std::fs::create_dir_all(&config.paths.base_dir)?;
    config.save()?;

    let db = MetaDb::connect(&config).await?;
    if !db.is_initialized().await? {
        db.init_schema().await?;
    }
    info!("Initialized sourceintel at {:?}", config.paths.base_dir);

    Ok(InitReport {
        config_path: config.paths.config_file,
        db_path: config.paths.db_file,
        overwritten: existed,
    })
}
