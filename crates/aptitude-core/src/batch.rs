//! Batch report generation across many subjects.
//!
//! Subjects are processed one at a time. A per-subject failure is recorded
//! and the run moves on; a systemic data-service failure aborts the run.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::aggregate::IndexAggregator;
use crate::catalog::AptitudeCatalog;
use crate::comparative::{compare_groups, ComparativeAnalysis, GroupingKey};
use crate::error::{is_systemic_error, SubjectError};
use crate::records;
use crate::report::{ReportLine, SubjectReport};
use crate::scoring::{latest_per_aptitude, validate_consistency, ScoreProcessor};
use crate::traits::{DataService, InterpretationSource, ReportSink};

/// Cooperative cancellation flag, checked between subjects.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Options for a batch run.
#[derive(Debug, Clone)]
pub struct BatchOptions {
    /// Pause between consecutive subjects.
    pub delay: Duration,
    /// Look up qualitative interpretations for each tested aptitude.
    pub include_interpretations: bool,
    /// Title stamped on every generated report.
    pub title: String,
    pub cancel: Option<CancellationToken>,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            delay: Duration::from_millis(100),
            include_interpretations: true,
            title: "Aptitude report".to_string(),
            cancel: None,
        }
    }
}

impl BatchOptions {
    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(CancellationToken::is_cancelled)
    }
}

/// Status carried by a progress event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchStatus {
    Success,
    Failed,
    Completed,
    Cancelled,
}

/// A progress event emitted after each subject and once at the end.
#[derive(Debug, Clone, Serialize)]
pub struct BatchProgress {
    pub current: usize,
    pub total: usize,
    pub percentage: u8,
    pub current_subject_id: Option<String>,
    pub status: BatchStatus,
    /// The finished run, on the final event only.
    pub result: Option<BatchRunResult>,
}

fn percentage(current: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    ((current as f64 / total as f64) * 100.0).round() as u8
}

/// Progress hook for batch runs.
pub trait ProgressReporter: Send + Sync {
    /// Called before a subject is processed.
    fn on_subject_start(&self, _subject_id: &str, _current: usize, _total: usize) {}

    /// Called after each subject and once more when the run ends.
    fn on_progress(&self, progress: &BatchProgress);
}

/// No-op progress reporter.
pub struct NoopReporter;

impl ProgressReporter for NoopReporter {
    fn on_progress(&self, _: &BatchProgress) {}
}

impl<F> ProgressReporter for F
where
    F: Fn(&BatchProgress) + Send + Sync,
{
    fn on_progress(&self, progress: &BatchProgress) {
        self(progress)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchSuccess {
    pub subject_id: String,
    pub report_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchFailure {
    pub subject_id: String,
    pub error: String,
}

/// Outcome of one subject within a run.
#[derive(Debug, Clone, PartialEq)]
pub enum SubjectOutcome {
    Success(BatchSuccess),
    Failure(BatchFailure),
}

/// The result of a batch run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchRunResult {
    pub successful: Vec<BatchSuccess>,
    pub failed: Vec<BatchFailure>,
    /// Subjects not processed because the run was cancelled.
    #[serde(default)]
    pub skipped: Vec<String>,
    #[serde(default)]
    pub cancelled: bool,
    pub total: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl BatchRunResult {
    /// Fold per-subject outcomes into a finished run.
    pub fn from_outcomes(
        outcomes: Vec<SubjectOutcome>,
        skipped: Vec<String>,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
    ) -> Self {
        let total = outcomes.len() + skipped.len();
        let (successful, failed) = outcomes.into_iter().fold(
            (Vec::new(), Vec::new()),
            |(mut ok, mut err), outcome| {
                match outcome {
                    SubjectOutcome::Success(s) => ok.push(s),
                    SubjectOutcome::Failure(f) => err.push(f),
                }
                (ok, err)
            },
        );
        Self {
            successful,
            failed,
            cancelled: !skipped.is_empty(),
            skipped,
            total,
            started_at,
            finished_at,
        }
    }

    pub fn duration(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }
}

/// Generates and persists one report per subject.
pub struct BatchReportGenerator {
    data: Arc<dyn DataService>,
    interpretations: Arc<dyn InterpretationSource>,
    sink: Arc<dyn ReportSink>,
    processor: ScoreProcessor,
    aggregator: IndexAggregator,
}

impl BatchReportGenerator {
    pub fn new(
        data: Arc<dyn DataService>,
        interpretations: Arc<dyn InterpretationSource>,
        sink: Arc<dyn ReportSink>,
        catalog: Arc<AptitudeCatalog>,
    ) -> Self {
        Self {
            data,
            interpretations,
            sink,
            processor: ScoreProcessor::new(Arc::clone(&catalog)),
            aggregator: IndexAggregator::new(catalog),
        }
    }

    /// Generate reports for `subject_ids` in order.
    pub async fn generate(
        &self,
        subject_ids: &[String],
        progress: &dyn ProgressReporter,
        options: &BatchOptions,
    ) -> Result<BatchRunResult> {
        let started_at = Utc::now();
        let total = subject_ids.len();
        let mut outcomes = Vec::with_capacity(total);
        let mut skipped = Vec::new();

        for (i, subject_id) in subject_ids.iter().enumerate() {
            if i > 0 && !options.delay.is_zero() {
                tokio::time::sleep(options.delay).await;
            }
            if options.is_cancelled() {
                tracing::info!(remaining = total - i, "batch cancelled");
                skipped = subject_ids[i..].to_vec();
                break;
            }

            progress.on_subject_start(subject_id, i + 1, total);

            let outcome = match self.generate_one(subject_id, options).await {
                Ok(report_id) => {
                    tracing::info!(subject = %subject_id, report = %report_id, "report generated");
                    SubjectOutcome::Success(BatchSuccess {
                        subject_id: subject_id.clone(),
                        report_id,
                    })
                }
                Err(e) if is_systemic_error(&e) => {
                    tracing::error!(subject = %subject_id, "batch aborted: {e:#}");
                    return Err(e.context(format!("batch aborted at subject {subject_id}")));
                }
                Err(e) => {
                    tracing::warn!(subject = %subject_id, "report failed: {e:#}");
                    SubjectOutcome::Failure(BatchFailure {
                        subject_id: subject_id.clone(),
                        error: format!("{e:#}"),
                    })
                }
            };

            let status = match outcome {
                SubjectOutcome::Success(_) => BatchStatus::Success,
                SubjectOutcome::Failure(_) => BatchStatus::Failed,
            };
            outcomes.push(outcome);
            progress.on_progress(&BatchProgress {
                current: i + 1,
                total,
                percentage: percentage(i + 1, total),
                current_subject_id: Some(subject_id.clone()),
                status,
                result: None,
            });
        }

        let processed = outcomes.len();
        let result = BatchRunResult::from_outcomes(outcomes, skipped, started_at, Utc::now());
        progress.on_progress(&BatchProgress {
            current: processed,
            total,
            percentage: percentage(processed, total),
            current_subject_id: None,
            status: if result.cancelled {
                BatchStatus::Cancelled
            } else {
                BatchStatus::Completed
            },
            result: Some(result.clone()),
        });

        tracing::info!(
            total,
            successful = result.successful.len(),
            failed = result.failed.len(),
            skipped = result.skipped.len(),
            "batch finished"
        );
        Ok(result)
    }

    /// Build and persist one subject's report, returning the stored id.
    pub async fn generate_one(&self, subject_id: &str, options: &BatchOptions) -> Result<String> {
        let report = self.build_report(subject_id, options).await?;
        match self.sink.persist(&report).await {
            Ok(id) => Ok(id),
            Err(e) if is_systemic_error(&e) => Err(e),
            Err(e) => Err(SubjectError::Persist {
                subject_id: subject_id.to_string(),
                message: format!("{e:#}"),
            }
            .into()),
        }
    }

    /// Assemble a subject's report without persisting it.
    pub async fn build_report(
        &self,
        subject_id: &str,
        options: &BatchOptions,
    ) -> Result<SubjectReport> {
        let subject = records::fetch_subject(self.data.as_ref(), subject_id)
            .await?
            .ok_or_else(|| SubjectError::SubjectNotFound(subject_id.to_string()))?;

        let missing: Vec<&str> = [("name", &subject.name), ("surname", &subject.surname)]
            .into_iter()
            .filter(|(_, v)| v.trim().is_empty())
            .map(|(field, _)| field)
            .collect();
        if !missing.is_empty() {
            return Err(SubjectError::IncompleteIdentity {
                subject_id: subject_id.to_string(),
                missing: missing.join(", "),
            }
            .into());
        }

        let raws = records::fetch_results(self.data.as_ref(), subject_id).await?;
        if raws.is_empty() {
            return Err(SubjectError::NoResults(subject_id.to_string()).into());
        }

        let batch = self.processor.process_many(&raws);
        if batch.valid_results.is_empty() {
            return Err(SubjectError::NoValidResults {
                subject_id: subject_id.to_string(),
                invalid: batch.invalid_count,
            }
            .into());
        }

        let summary = self.aggregator.summarize(subject_id, &batch.valid_results);
        let consistency = validate_consistency(&batch.valid_results);
        let lines: Vec<ReportLine> = latest_per_aptitude(&batch.valid_results)
            .into_iter()
            .map(ReportLine::from)
            .collect();

        let mut interpretations = BTreeMap::new();
        let mut missing_interpretations = Vec::new();
        if options.include_interpretations {
            for code in &summary.aptitudes_tested {
                match self.interpretations.interpretation(code).await? {
                    Some(text) if !text.trim().is_empty() => {
                        interpretations.insert(code.clone(), text);
                    }
                    _ => missing_interpretations.push(code.clone()),
                }
            }
        }

        Ok(SubjectReport {
            id: Uuid::new_v4(),
            title: options.title.clone(),
            generated_at: Utc::now(),
            subject,
            summary,
            lines,
            interpretations,
            missing_interpretations,
            consistency,
        })
    }

    /// Compare composite indices across groups of subjects.
    ///
    /// Unknown subjects are skipped; subjects without valid results are
    /// listed as excluded.
    pub async fn compare(
        &self,
        subject_ids: &[String],
        grouping: GroupingKey,
        as_of: NaiveDate,
    ) -> Result<ComparativeAnalysis> {
        let mut entries = Vec::with_capacity(subject_ids.len());
        for subject_id in subject_ids {
            let Some(subject) = records::fetch_subject(self.data.as_ref(), subject_id).await?
            else {
                tracing::warn!(subject = %subject_id, "subject not found, skipping");
                continue;
            };
            let raws = records::fetch_results(self.data.as_ref(), subject_id).await?;
            let batch = self.processor.process_many(&raws);
            let summary = self.aggregator.summarize(subject_id, &batch.valid_results);
            entries.push((subject, summary));
        }
        Ok(compare_groups(&entries, grouping, as_of))
    }
}
