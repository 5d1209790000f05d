//! Console progress reporting and table rendering.

use comfy_table::{Cell, Color, Table};

use aptitude_core::aggregate::SubjectSummary;
use aptitude_core::batch::{BatchProgress, BatchStatus, ProgressReporter};
use aptitude_core::catalog::{CompositeIndex, PercentileBand};

/// Console progress reporter. Writes to stderr so stdout stays parseable.
pub struct ConsoleReporter;

impl ProgressReporter for ConsoleReporter {
    fn on_subject_start(&self, subject_id: &str, current: usize, total: usize) {
        eprintln!("  [{current}/{total}] {subject_id}");
    }

    fn on_progress(&self, progress: &BatchProgress) {
        match (&progress.status, &progress.result) {
            (BatchStatus::Completed | BatchStatus::Cancelled, Some(result)) => {
                eprintln!(
                    "\n{}: {}/{} succeeded, {} failed, {} skipped ({:.1}s)",
                    if result.cancelled {
                        "Cancelled"
                    } else {
                        "Complete"
                    },
                    result.successful.len(),
                    result.total,
                    result.failed.len(),
                    result.skipped.len(),
                    result.duration().num_milliseconds() as f64 / 1000.0,
                );
                for failure in &result.failed {
                    eprintln!("  FAIL {}: {}", failure.subject_id, failure.error);
                }
            }
            (status, _) => eprintln!(
                "        {} ({}%)",
                match status {
                    BatchStatus::Success => "OK",
                    BatchStatus::Failed => "FAIL",
                    _ => "-",
                },
                progress.percentage
            ),
        }
    }
}

pub fn band_cell(band: Option<PercentileBand>) -> Cell {
    match band {
        Some(b) => Cell::new(b.label()).fg(band_color(b)),
        None => Cell::new("-"),
    }
}

fn band_color(band: PercentileBand) -> Color {
    match band {
        PercentileBand::VeryLow => Color::Red,
        PercentileBand::Low => Color::DarkYellow,
        PercentileBand::MediumLow => Color::Yellow,
        PercentileBand::Medium => Color::Grey,
        PercentileBand::MediumHigh => Color::DarkGreen,
        PercentileBand::High => Color::Green,
        PercentileBand::VeryHigh => Color::Blue,
    }
}

pub fn fmt_opt<T: ToString>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_else(|| "-".into())
}

pub fn summary_tables(summary: &SubjectSummary) -> (Table, Table) {
    let mut scores = Table::new();
    scores.set_header(vec!["Aptitude", "PD", "PC", "Band"]);
    for score in &summary.scores {
        scores.add_row(vec![
            Cell::new(&score.code),
            Cell::new(fmt_opt(score.raw_score)),
            Cell::new(fmt_opt(score.percentile.map(|p| format!("{p:.0}")))),
            band_cell(score.band),
        ]);
    }

    let mut indices = Table::new();
    indices.set_header(vec!["Index", "PC"]);
    for index in CompositeIndex::ALL {
        indices.add_row(vec![
            Cell::new(index.label()),
            Cell::new(summary.composite_indices.get(index)),
        ]);
    }
    (scores, indices)
}
