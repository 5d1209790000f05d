//! The `aptitude summarize` command.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;

use aptitude_core::aggregate::IndexAggregator;
use aptitude_core::catalog::AptitudeCatalog;
use aptitude_core::records;
use aptitude_core::scoring::ScoreProcessor;

use crate::console::summary_tables;

pub async fn execute(subject_id: String, format: String, config: Option<PathBuf>) -> Result<()> {
    let (_, repo) = super::open_repository(config)?;

    let subject = records::fetch_subject(repo.as_ref(), &subject_id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("subject not found: {subject_id}"))?;
    let raws = records::fetch_results(repo.as_ref(), &subject_id).await?;

    let catalog = Arc::new(AptitudeCatalog::default());
    let batch = ScoreProcessor::new(Arc::clone(&catalog)).process_many(&raws);
    let summary = IndexAggregator::new(catalog).summarize(&subject_id, &batch.valid_results);

    if format == "json" {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!("{} ({})", subject.full_name(), subject.id);
    if !summary.has_results {
        println!("No valid results.");
        return Ok(());
    }
    println!(
        "Average percentile {} ({}), {} aptitudes, {} invalid results ignored",
        summary.avg_percentile,
        summary.overall_band.map(|b| b.label()).unwrap_or("-"),
        summary.result_count,
        batch.invalid_count
    );

    let (scores, indices) = summary_tables(&summary);
    println!("\n{scores}\n\n{indices}");
    Ok(())
}
