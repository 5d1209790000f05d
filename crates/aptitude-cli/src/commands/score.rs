//! The `aptitude score` command.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use comfy_table::{Cell, Table};

use aptitude_core::catalog::AptitudeCatalog;
use aptitude_core::parser;
use aptitude_core::scoring::{validate_consistency, NormalizedResult, ScoreProcessor};

use crate::console::{band_cell, fmt_opt};

pub fn execute(input: PathBuf, format: String) -> Result<()> {
    let raws = parser::load_results(&input)?;
    anyhow::ensure!(!raws.is_empty(), "no results found in {}", input.display());

    let processor = ScoreProcessor::new(Arc::new(AptitudeCatalog::default()));
    let batch = processor.process_many(&raws);

    if format == "json" {
        println!("{}", serde_json::to_string_pretty(&batch)?);
        return Ok(());
    }

    let mut table = Table::new();
    table.set_header(vec![
        "Subject", "Aptitude", "PD", "PC", "Band", "Accuracy", "Issues",
    ]);
    for r in batch.valid_results.iter().chain(&batch.invalid_results) {
        let issues = r
            .validation_errors
            .iter()
            .map(|i| i.to_string())
            .collect::<Vec<_>>()
            .join("; ");
        table.add_row(vec![
            Cell::new(r.subject_id()),
            Cell::new(format!("{} ({})", r.display_name(), r.aptitude_code)),
            Cell::new(fmt_opt(r.raw.raw_score)),
            Cell::new(fmt_opt(r.percentile().map(|p| format!("{p:.0}")))),
            band_cell(r.percentile_band),
            Cell::new(format!("{}%", r.metrics.accuracy_pct)),
            Cell::new(if issues.is_empty() { "-".into() } else { issues }),
        ]);
    }
    println!("{table}");
    println!(
        "\n{} processed: {} valid, {} invalid",
        batch.total_processed, batch.valid_count, batch.invalid_count
    );

    let mut by_subject: BTreeMap<&str, Vec<NormalizedResult>> = BTreeMap::new();
    for r in &batch.valid_results {
        by_subject.entry(r.subject_id()).or_default().push(r.clone());
    }
    for (subject, results) in by_subject {
        let consistency = validate_consistency(&results);
        for w in &consistency.warnings {
            println!("  warning [{subject}]: {w}");
        }
        for e in &consistency.errors {
            println!("  error [{subject}]: {e}");
        }
    }

    Ok(())
}
