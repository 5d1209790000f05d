//! Subcommand implementations.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;

use aptitude_store::config::{create_repository, load_config_from, AptitudeConfig};
use aptitude_store::CachingRepository;

pub mod audit;
pub mod batch;
pub mod catalog;
pub mod compare;
pub mod init;
pub mod score;
pub mod summarize;

/// Load configuration and build the shared cached repository.
pub(crate) fn open_repository(
    config_path: Option<PathBuf>,
) -> Result<(AptitudeConfig, Arc<CachingRepository>)> {
    let config = load_config_from(config_path.as_deref())?;
    let repo = create_repository(&config)?;
    Ok((config, repo))
}

/// Split a comma-separated id list, dropping blanks.
pub(crate) fn parse_ids(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
