//! The `aptitude audit` command.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;

use aptitude_core::catalog::AptitudeCatalog;
use aptitude_core::integrity::IntegrityChecker;
use aptitude_store::TableInterpretations;

pub async fn execute(
    subject_id: String,
    format: String,
    fail_on_invalid: bool,
    config: Option<PathBuf>,
) -> Result<()> {
    let (_, repo) = super::open_repository(config)?;
    let checker = IntegrityChecker::new(
        repo.clone(),
        Arc::new(TableInterpretations::new(repo)),
        Arc::new(AptitudeCatalog::default()),
    );

    let report = checker.audit_subject(&subject_id).await?;

    if format == "json" {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!(
            "Audit of {}: {}",
            report.subject_id,
            if report.is_valid { "VALID" } else { "INVALID" }
        );
        for (stage, stage_report) in report.stages.iter() {
            println!(
                "  {:<15} {}",
                stage.to_string(),
                if stage_report.valid { "OK" } else { "FAIL" }
            );
            for error in &stage_report.errors {
                println!("      - {error}");
            }
        }
        println!("\nRecommendations:");
        for rec in &report.recommendations {
            println!("  {rec}");
        }
    }

    if fail_on_invalid && !report.is_valid {
        std::process::exit(1);
    }

    Ok(())
}
