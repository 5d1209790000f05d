//! The `aptitude batch` command.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;

use aptitude_core::batch::{BatchReportGenerator, CancellationToken};
use aptitude_core::catalog::AptitudeCatalog;
use aptitude_core::records;
use aptitude_core::traits::ReportSink;
use aptitude_report::DirectoryReportSink;
use aptitude_store::{TableInterpretations, TableReportSink};

use crate::console::ConsoleReporter;

pub async fn execute(
    subjects: Option<String>,
    output: Option<PathBuf>,
    delay_ms: Option<u64>,
    config: Option<PathBuf>,
) -> Result<()> {
    let (config, repo) = super::open_repository(config)?;

    let ids = match subjects {
        Some(list) => super::parse_ids(&list),
        None => records::fetch_subjects(repo.as_ref())
            .await?
            .into_iter()
            .map(|s| s.id)
            .collect(),
    };
    anyhow::ensure!(!ids.is_empty(), "no subjects selected");

    let sink: Arc<dyn ReportSink> = match &output {
        Some(dir) => Arc::new(DirectoryReportSink::new(dir)),
        None => Arc::new(TableReportSink::new(repo.clone())),
    };

    let mut options = config.batch.to_options();
    if let Some(ms) = delay_ms {
        options.delay = Duration::from_millis(ms);
    }
    let cancel = CancellationToken::new();
    options.cancel = Some(cancel.clone());
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });

    let generator = BatchReportGenerator::new(
        repo.clone(),
        Arc::new(TableInterpretations::new(repo.clone())),
        sink,
        Arc::new(AptitudeCatalog::default()),
    );

    eprintln!("Generating reports for {} subjects", ids.len());
    let result = generator
        .generate(&ids, &ConsoleReporter, &options)
        .await?;

    if let Some(dir) = &output {
        eprintln!("Reports written to: {}", dir.display());
    }
    let stats = repo.stats().await;
    tracing::debug!(hits = stats.hits, misses = stats.misses, "cache usage");

    if result.successful.is_empty() && !result.failed.is_empty() {
        anyhow::bail!("no report could be generated");
    }
    Ok(())
}
