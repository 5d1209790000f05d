//! Report persistence into the `reports` collection.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::{json, Value};

use aptitude_core::report::SubjectReport;
use aptitude_core::traits::{tables, DataService, ReportSink, Row};

/// Stores each report as a row holding the full report document.
pub struct TableReportSink {
    data: Arc<dyn DataService>,
}

impl TableReportSink {
    pub fn new(data: Arc<dyn DataService>) -> Self {
        Self { data }
    }
}

fn report_row(report: &SubjectReport) -> Result<Row> {
    let document = serde_json::to_value(report).context("failed to serialize report")?;
    let mut row = Row::new();
    row.insert("id".into(), json!(report.id.to_string()));
    row.insert("subject_id".into(), json!(report.subject.id));
    row.insert("title".into(), json!(report.title));
    row.insert("generated_at".into(), json!(report.generated_at.to_rfc3339()));
    row.insert("avg_percentile".into(), json!(report.summary.avg_percentile));
    row.insert("document".into(), document);
    Ok(row)
}

#[async_trait]
impl ReportSink for TableReportSink {
    async fn persist(&self, report: &SubjectReport) -> Result<String> {
        let stored = self
            .data
            .insert(tables::REPORTS, vec![report_row(report)?])
            .await?;
        let id = stored
            .first()
            .and_then(|row| row.get("id"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| report.id.to_string());
        tracing::debug!(subject = %report.subject.id, report = %id, "report stored");
        Ok(id)
    }
}
