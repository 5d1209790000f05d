//! Directory-backed report sink.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;

use aptitude_core::report::SubjectReport;
use aptitude_core::traits::ReportSink;

use crate::html::generate_html;

/// Writes each report as `<subject>-<report id>.json` plus a matching
/// `.html` file into an output directory.
pub struct DirectoryReportSink {
    dir: PathBuf,
    html: bool,
}

impl DirectoryReportSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            html: true,
        }
    }

    /// Skip the HTML rendering and only write JSON.
    pub fn json_only(mut self) -> Self {
        self.html = false;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn stem(report: &SubjectReport) -> String {
        let subject: String = report
            .subject
            .id
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        format!("{subject}-{}", report.id)
    }
}

#[async_trait]
impl ReportSink for DirectoryReportSink {
    async fn persist(&self, report: &SubjectReport) -> Result<String> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("failed to create {}", self.dir.display()))?;

        let stem = Self::stem(report);
        let json_path = self.dir.join(format!("{stem}.json"));
        let json = serde_json::to_string_pretty(report).context("failed to serialize report")?;
        tokio::fs::write(&json_path, json)
            .await
            .with_context(|| format!("failed to write {}", json_path.display()))?;

        if self.html {
            let html_path = self.dir.join(format!("{stem}.html"));
            tokio::fs::write(&html_path, generate_html(report))
                .await
                .with_context(|| format!("failed to write {}", html_path.display()))?;
        }

        tracing::debug!(path = %json_path.display(), "report written");
        Ok(report.id.to_string())
    }
}
