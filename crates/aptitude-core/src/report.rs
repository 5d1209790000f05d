//! Subject report types with JSON persistence and markdown rendering.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::aggregate::SubjectSummary;
use crate::catalog::{CompositeIndex, PercentileBand};
use crate::model::Subject;
use crate::scoring::{ConsistencyReport, NormalizedResult};

/// One line of the per-aptitude results table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportLine {
    pub aptitude_code: String,
    pub aptitude_name: String,
    pub raw_score: Option<i64>,
    pub percentile: Option<f64>,
    pub band: Option<PercentileBand>,
    pub accuracy_pct: i64,
    pub time_per_item: f64,
    pub efficiency_score: i64,
}

impl From<&NormalizedResult> for ReportLine {
    fn from(r: &NormalizedResult) -> Self {
        Self {
            aptitude_code: r.aptitude_code.clone(),
            aptitude_name: r.display_name().to_string(),
            raw_score: r.raw.raw_score,
            percentile: r.percentile(),
            band: r.percentile_band,
            accuracy_pct: r.metrics.accuracy_pct,
            time_per_item: r.metrics.time_per_item,
            efficiency_score: r.metrics.efficiency_score,
        }
    }
}

/// A complete report for one subject.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubjectReport {
    /// Unique report identifier.
    pub id: Uuid,
    pub title: String,
    pub generated_at: DateTime<Utc>,
    pub subject: Subject,
    pub summary: SubjectSummary,
    pub lines: Vec<ReportLine>,
    /// Interpretation text keyed by aptitude code.
    #[serde(default)]
    pub interpretations: BTreeMap<String, String>,
    /// Aptitudes tested that have no interpretation available.
    #[serde(default)]
    pub missing_interpretations: Vec<String>,
    pub consistency: ConsistencyReport,
}

impl SubjectReport {
    /// Save the report as JSON to a file.
    pub fn save_json(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self).context("failed to serialize report")?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, json)
            .with_context(|| format!("failed to write report to {}", path.display()))?;
        Ok(())
    }

    /// Load a report from a JSON file.
    pub fn load_json(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read report from {}", path.display()))?;
        let report: SubjectReport =
            serde_json::from_str(&content).context("failed to parse report JSON")?;
        Ok(report)
    }

    /// Render the report as markdown.
    pub fn to_markdown(&self) -> String {
        let mut md = String::new();
        let s = &self.summary;

        md.push_str(&format!("# {}\n\n", self.title));
        md.push_str(&format!(
            "**Subject:** {} ({})  \n**Generated:** {}\n\n",
            self.subject.full_name(),
            self.subject.external_id.as_deref().unwrap_or("no external id"),
            self.generated_at.format("%Y-%m-%d %H:%M UTC")
        ));

        md.push_str(&format!(
            "**Summary:** average percentile {} ({}), {} high / {} medium / {} low\n\n",
            s.avg_percentile,
            s.overall_band.map(|b| b.label()).unwrap_or("n/a"),
            s.band_counts.high,
            s.band_counts.medium,
            s.band_counts.low
        ));

        md.push_str("| Aptitude | PD | PC | Band | Accuracy |\n");
        md.push_str("|----------|----|----|------|----------|\n");
        for line in &self.lines {
            md.push_str(&format!(
                "| {} ({}) | {} | {} | {} | {}% |\n",
                line.aptitude_name,
                line.aptitude_code,
                line.raw_score.map(|v| v.to_string()).unwrap_or_else(|| "-".into()),
                line.percentile.map(|v| format!("{v:.0}")).unwrap_or_else(|| "-".into()),
                line.band.map(|b| b.label()).unwrap_or("-"),
                line.accuracy_pct
            ));
        }
        md.push('\n');

        md.push_str("### Composite indices\n\n");
        md.push_str("| Index | PC |\n|-------|----|\n");
        for index in CompositeIndex::ALL {
            md.push_str(&format!(
                "| {} | {} |\n",
                index.label(),
                s.composite_indices.get(index)
            ));
        }
        md.push('\n');

        if !self.interpretations.is_empty() {
            md.push_str("### Interpretation\n\n");
            for (code, text) in &self.interpretations {
                md.push_str(&format!("- **{code}:** {text}\n"));
            }
            md.push('\n');
        }

        if !self.consistency.warnings.is_empty() {
            md.push_str("### Warnings\n\n");
            for w in &self.consistency.warnings {
                md.push_str(&format!("- {w}\n"));
            }
        }

        md
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::aggregate::IndexAggregator;
    use crate::catalog::AptitudeCatalog;
    use crate::model::RawResult;
    use crate::scoring::{validate_consistency, ScoreProcessor};
    use std::sync::Arc;

    pub(crate) fn make_report() -> SubjectReport {
        let catalog = Arc::new(AptitudeCatalog::default());
        let processor = ScoreProcessor::new(Arc::clone(&catalog));
        let batch = processor.process_many(&[
            RawResult::new("s1", "V")
                .with_raw_score(30)
                .with_percentile(90.0)
                .with_counts(30, 2, 0)
                .with_elapsed(600.0),
            RawResult::new("s1", "N")
                .with_raw_score(15)
                .with_percentile(40.0)
                .with_counts(15, 3, 0)
                .with_elapsed(300.0),
        ]);
        let summary = IndexAggregator::new(catalog).summarize("s1", &batch.valid_results);
        SubjectReport {
            id: Uuid::nil(),
            title: "Aptitude report".into(),
            generated_at: Utc::now(),
            subject: Subject {
                id: "s1".into(),
                name: "Ana".into(),
                surname: "Ruiz".into(),
                external_id: Some("12345678".into()),
                gender: None,
                birth_date: None,
                institution: None,
            },
            lines: batch.valid_results.iter().map(ReportLine::from).collect(),
            consistency: validate_consistency(&batch.valid_results),
            summary,
            interpretations: BTreeMap::from([("V".to_string(), "Strong verbal reasoning.".to_string())]),
            missing_interpretations: vec!["N".into()],
        }
    }

    #[test]
    fn json_roundtrip() {
        let report = make_report();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("report.json");

        report.save_json(&path).unwrap();
        let loaded = SubjectReport::load_json(&path).unwrap();

        assert_eq!(loaded.subject.id, "s1");
        assert_eq!(loaded.lines.len(), 2);
        assert_eq!(loaded.summary, report.summary);
    }

    #[test]
    fn markdown_output() {
        let md = make_report().to_markdown();
        assert!(md.contains("Ana Ruiz"));
        assert!(md.contains("| Verbal (V) | 30 | 90 | High | 94% |"));
        assert!(md.contains("Fluid intelligence"));
        assert!(md.contains("Strong verbal reasoning."));
    }

    #[test]
    fn load_missing_file_fails() {
        let err = SubjectReport::load_json(Path::new("/nonexistent/report.json")).unwrap_err();
        assert!(err.to_string().contains("failed to read report"));
    }
}
