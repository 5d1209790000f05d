//! Raw-result file loading.
//!
//! Accepts JSON (an array, or an object with a `results` array) and TOML
//! (`[[results]]` tables). Legacy field names are normalized by the
//! [`RawResult`] deserializer. TOML timestamps must be quoted RFC 3339
//! strings.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::model::RawResult;

/// On-disk encoding of a results file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultFormat {
    Json,
    Toml,
}

impl ResultFormat {
    /// Detect the format from a file extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension()?.to_str()?.to_ascii_lowercase().as_str() {
            "json" => Some(ResultFormat::Json),
            "toml" => Some(ResultFormat::Toml),
            _ => None,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum JsonResultsFile {
    Bare(Vec<RawResult>),
    Wrapped { results: Vec<RawResult> },
}

#[derive(Debug, Deserialize)]
struct TomlResultsFile {
    #[serde(default)]
    results: Vec<RawResult>,
}

/// Parse a single results file.
pub fn parse_results(path: &Path) -> Result<Vec<RawResult>> {
    let format = ResultFormat::from_path(path)
        .with_context(|| format!("unsupported results file: {}", path.display()))?;
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read results file: {}", path.display()))?;

    parse_results_str(&content, format, path)
}

/// Parse results from a string.
pub fn parse_results_str(
    content: &str,
    format: ResultFormat,
    source_path: &Path,
) -> Result<Vec<RawResult>> {
    match format {
        ResultFormat::Json => {
            let parsed: JsonResultsFile = serde_json::from_str(content)
                .with_context(|| format!("failed to parse JSON: {}", source_path.display()))?;
            Ok(match parsed {
                JsonResultsFile::Bare(results) => results,
                JsonResultsFile::Wrapped { results } => results,
            })
        }
        ResultFormat::Toml => {
            let parsed: TomlResultsFile = toml::from_str(content)
                .with_context(|| format!("failed to parse TOML: {}", source_path.display()))?;
            Ok(parsed.results)
        }
    }
}

/// Load results from a file, or recursively from every `.json` / `.toml`
/// file under a directory. Unparseable files in a directory are skipped.
pub fn load_results(path: &Path) -> Result<Vec<RawResult>> {
    if !path.is_dir() {
        return parse_results(path);
    }

    let mut results = Vec::new();
    let mut entries: Vec<_> = std::fs::read_dir(path)
        .with_context(|| format!("failed to read directory: {}", path.display()))?
        .collect::<std::io::Result<_>>()?;
    entries.sort_by_key(|e| e.path());

    for entry in entries {
        let path = entry.path();

        if path.is_dir() {
            results.extend(load_results(&path)?);
        } else if ResultFormat::from_path(&path).is_some() {
            match parse_results(&path) {
                Ok(parsed) => results.extend(parsed),
                Err(e) => {
                    tracing::warn!("skipping {}: {:#}", path.display(), e);
                }
            }
        }
    }

    Ok(results)
}
