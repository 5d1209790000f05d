//! The `aptitude compare` command.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use comfy_table::Table;

use aptitude_core::batch::BatchReportGenerator;
use aptitude_core::catalog::{AptitudeCatalog, CompositeIndex};
use aptitude_core::comparative::GroupingKey;
use aptitude_report::write_comparison_html;
use aptitude_store::{TableInterpretations, TableReportSink};

pub async fn execute(
    subjects: String,
    grouping: GroupingKey,
    format: String,
    html: Option<PathBuf>,
    config: Option<PathBuf>,
) -> Result<()> {
    let ids = super::parse_ids(&subjects);
    anyhow::ensure!(ids.len() >= 2, "compare needs at least two subjects");

    let (_, repo) = super::open_repository(config)?;
    let generator = BatchReportGenerator::new(
        repo.clone(),
        Arc::new(TableInterpretations::new(repo.clone())),
        Arc::new(TableReportSink::new(repo)),
        Arc::new(AptitudeCatalog::default()),
    );

    let analysis = generator
        .compare(&ids, grouping, chrono::Utc::now().date_naive())
        .await?;

    if let Some(path) = &html {
        write_comparison_html(&analysis, path)?;
        eprintln!("HTML comparison: {}", path.display());
    }

    match format.as_str() {
        "markdown" | "md" => println!("{}", analysis.to_markdown()),
        "json" => println!("{}", serde_json::to_string_pretty(&analysis)?),
        _ => {
            let mut table = Table::new();
            let mut header = vec!["Group".to_string(), "Subjects".into(), "Avg PC".into()];
            header.extend(CompositeIndex::ALL.iter().map(|i| i.to_string()));
            table.set_header(header);
            for g in &analysis.groups {
                let mut row = vec![
                    g.group.clone(),
                    g.subject_count.to_string(),
                    format!("{:.1}", g.avg_percentile),
                ];
                row.extend(CompositeIndex::ALL.iter().map(|i| {
                    format!("{:.1}", g.composite_indices.get(i).copied().unwrap_or(0.0))
                }));
                table.add_row(row);
            }
            println!("Comparison by {}\n{table}", analysis.grouping);

            if analysis.significant_differences.is_empty()
                && analysis.significant_composites.is_empty()
            {
                println!("\nNo significant differences.");
            } else {
                println!("\nSignificant differences:");
                for d in &analysis.significant_differences {
                    println!(
                        "  {} spread {:.1} ({} > {})",
                        d.aptitude_code, d.spread, d.highest_group, d.lowest_group
                    );
                }
                for d in &analysis.significant_composites {
                    println!(
                        "  {} index spread {:.1} ({} > {})",
                        d.index.label(),
                        d.spread,
                        d.highest_group,
                        d.lowest_group
                    );
                }
            }
            if !analysis.excluded_subjects.is_empty() {
                println!(
                    "\nExcluded (no valid results): {}",
                    analysis.excluded_subjects.join(", ")
                );
            }
        }
    }

    Ok(())
}
