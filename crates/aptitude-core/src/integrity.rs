//! Six-stage data-flow integrity audit for one subject.
//!
//! Every stage is evaluated on every audit, even when earlier stages fail,
//! so the report is always complete. Reports are built fresh on each call
//! and never cached.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::aggregate::IndexAggregator;
use crate::catalog::{normalize_code, AptitudeCatalog};
use crate::error::is_systemic_error;
use crate::model::{RawResult, Subject};
use crate::records;
use crate::scoring::{answered_items, ScoreProcessor};
use crate::traits::{DataService, InterpretationSource};

/// Minimum length of a well-formed external identifier.
const MIN_EXTERNAL_ID_LEN: usize = 4;

/// Audit stages in evaluation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Identity,
    Administration,
    Storage,
    Scoring,
    Visualization,
    Reporting,
}

impl Stage {
    pub const ALL: [Stage; 6] = [
        Stage::Identity,
        Stage::Administration,
        Stage::Storage,
        Stage::Scoring,
        Stage::Visualization,
        Stage::Reporting,
    ];

    /// Remediation for a failing stage.
    pub fn recommendation(&self) -> &'static str {
        match self {
            Stage::Identity => {
                "Complete the subject record: name, surname and a valid external ID are required."
            }
            Stage::Administration => {
                "Complete or re-administer the affected tests and remove duplicate administrations."
            }
            Stage::Storage => {
                "Correct or soft-delete stored results with negative or impossible answer counts."
            }
            Stage::Scoring => "Recompute the invalid results against the normative tables.",
            Stage::Visualization => {
                "Record at least one valid result with a percentile before charting."
            }
            Stage::Reporting => "Add qualitative interpretations for the listed aptitudes.",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Identity => "identity",
            Stage::Administration => "administration",
            Stage::Storage => "storage",
            Stage::Scoring => "scoring",
            Stage::Visualization => "visualization",
            Stage::Reporting => "reporting",
        };
        f.write_str(name)
    }
}

/// Recommendation emitted when every stage passes.
pub const CONSISTENT_RECOMMENDATION: &str =
    "Data flow is consistent end to end; no action required.";

/// Outcome of one stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageReport {
    pub valid: bool,
    pub data: Value,
    pub errors: Vec<String>,
}

impl StageReport {
    fn new(data: Value, errors: Vec<String>) -> Self {
        Self {
            valid: errors.is_empty(),
            data,
            errors,
        }
    }
}

/// All six stage outcomes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntegrityStages {
    pub identity: StageReport,
    pub administration: StageReport,
    pub storage: StageReport,
    pub scoring: StageReport,
    pub visualization: StageReport,
    pub reporting: StageReport,
}

impl IntegrityStages {
    pub fn get(&self, stage: Stage) -> &StageReport {
        match stage {
            Stage::Identity => &self.identity,
            Stage::Administration => &self.administration,
            Stage::Storage => &self.storage,
            Stage::Scoring => &self.scoring,
            Stage::Visualization => &self.visualization,
            Stage::Reporting => &self.reporting,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (Stage, &StageReport)> {
        Stage::ALL.into_iter().map(move |s| (s, self.get(s)))
    }
}

/// Structured audit outcome for one subject.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntegrityReport {
    pub subject_id: String,
    pub is_valid: bool,
    pub stages: IntegrityStages,
    pub recommendations: Vec<String>,
    pub audited_at: DateTime<Utc>,
}

impl IntegrityReport {
    pub fn failing_stages(&self) -> Vec<Stage> {
        self.stages
            .iter()
            .filter(|(_, r)| !r.valid)
            .map(|(s, _)| s)
            .collect()
    }
}

/// Everything the audit reads, fetched up front.
#[derive(Debug, Clone, Default)]
pub struct SubjectSnapshot {
    pub subject_id: String,
    pub subject: Option<Subject>,
    /// External id resolved through the server-side lookup.
    pub resolved_external_id: Option<String>,
    pub results: Vec<RawResult>,
    /// Interpretation per distinct aptitude code; `None` when absent.
    pub interpretations: BTreeMap<String, Option<String>>,
    /// Non-systemic fetch failures, attributed to the stage that needed the data.
    pub fetch_errors: Vec<(Stage, String)>,
}

impl SubjectSnapshot {
    fn errors_for(&self, stage: Stage) -> Vec<String> {
        self.fetch_errors
            .iter()
            .filter(|(s, _)| *s == stage)
            .map(|(_, e)| e.clone())
            .collect()
    }
}

/// Audits a subject's data from identity through report readiness.
pub struct IntegrityChecker {
    data: Arc<dyn DataService>,
    interpretations: Arc<dyn InterpretationSource>,
    processor: ScoreProcessor,
    aggregator: IndexAggregator,
}

impl IntegrityChecker {
    pub fn new(
        data: Arc<dyn DataService>,
        interpretations: Arc<dyn InterpretationSource>,
        catalog: Arc<AptitudeCatalog>,
    ) -> Self {
        Self {
            data,
            interpretations,
            processor: ScoreProcessor::new(Arc::clone(&catalog)),
            aggregator: IndexAggregator::new(catalog),
        }
    }

    /// Audit one subject against live data.
    ///
    /// Systemic data-service errors abort the audit; any other fetch
    /// failure is reported on the stage that needed the data.
    pub async fn audit_subject(&self, subject_id: &str) -> Result<IntegrityReport> {
        let snapshot = self.load_snapshot(subject_id).await?;
        let report = self.audit_snapshot(&snapshot);
        if report.is_valid {
            tracing::info!(subject = subject_id, "integrity audit passed");
        } else {
            tracing::warn!(
                subject = subject_id,
                failing = ?report.failing_stages(),
                "integrity audit found problems"
            );
        }
        Ok(report)
    }

    /// Fetch everything the audit needs.
    pub async fn load_snapshot(&self, subject_id: &str) -> Result<SubjectSnapshot> {
        let mut snapshot = SubjectSnapshot {
            subject_id: subject_id.to_string(),
            ..Default::default()
        };

        snapshot.subject = soften(
            records::fetch_subject(self.data.as_ref(), subject_id).await,
            Stage::Identity,
            &mut snapshot.fetch_errors,
        )?
        .flatten();

        let needs_lookup = snapshot
            .subject
            .as_ref()
            .is_some_and(|s| blank(s.external_id.as_deref()));
        if needs_lookup {
            snapshot.resolved_external_id = soften(
                records::lookup_external_id(self.data.as_ref(), subject_id).await,
                Stage::Identity,
                &mut snapshot.fetch_errors,
            )?
            .flatten();
        }

        snapshot.results = soften(
            records::fetch_results(self.data.as_ref(), subject_id).await,
            Stage::Administration,
            &mut snapshot.fetch_errors,
        )?
        .unwrap_or_default();

        let codes: BTreeSet<String> = snapshot
            .results
            .iter()
            .map(|r| normalize_code(&r.aptitude_code))
            .collect();
        for code in codes {
            let text = soften(
                self.interpretations.interpretation(&code).await,
                Stage::Reporting,
                &mut snapshot.fetch_errors,
            )?
            .flatten();
            snapshot.interpretations.insert(code, text);
        }

        Ok(snapshot)
    }

    /// Evaluate all six stages over an already-fetched snapshot.
    pub fn audit_snapshot(&self, snapshot: &SubjectSnapshot) -> IntegrityReport {
        let stages = IntegrityStages {
            identity: check_identity(snapshot),
            administration: check_administration(snapshot),
            storage: check_storage(snapshot),
            scoring: self.check_scoring(snapshot),
            visualization: self.check_visualization(snapshot),
            reporting: check_reporting(snapshot),
        };

        let failing: Vec<Stage> = stages
            .iter()
            .filter(|(_, r)| !r.valid)
            .map(|(s, _)| s)
            .collect();
        let recommendations = if failing.is_empty() {
            vec![CONSISTENT_RECOMMENDATION.to_string()]
        } else {
            failing
                .iter()
                .map(|s| format!("{s}: {}", s.recommendation()))
                .collect()
        };

        IntegrityReport {
            subject_id: snapshot.subject_id.clone(),
            is_valid: failing.is_empty(),
            stages,
            recommendations,
            audited_at: Utc::now(),
        }
    }

    fn check_scoring(&self, snapshot: &SubjectSnapshot) -> StageReport {
        let batch = self.processor.process_many(&snapshot.results);
        let mut errors = Vec::new();

        for invalid in &batch.invalid_results {
            let issues: Vec<String> = invalid
                .validation_errors
                .iter()
                .map(|i| i.to_string())
                .collect();
            errors.push(format!(
                "aptitude {}: {}",
                invalid.aptitude_code,
                issues.join("; ")
            ));
        }
        for r in snapshot.results.iter().filter(|r| r.percentile.is_none()) {
            errors.push(format!(
                "aptitude {} has no percentile",
                normalize_code(&r.aptitude_code)
            ));
        }

        StageReport::new(
            json!({
                "total_processed": batch.total_processed,
                "valid_count": batch.valid_count,
                "invalid_count": batch.invalid_count,
            }),
            errors,
        )
    }

    fn check_visualization(&self, snapshot: &SubjectSnapshot) -> StageReport {
        let batch = self.processor.process_many(&snapshot.results);
        let summary = self
            .aggregator
            .summarize(&snapshot.subject_id, &batch.valid_results);
        let mut errors = Vec::new();

        if !summary.has_results {
            errors.push("no valid results to summarize".to_string());
        } else {
            if summary.overall_band.is_none() {
                errors.push("average percentile cannot be classified".to_string());
            }
            for score in summary.scores.iter().filter(|s| s.band.is_none()) {
                errors.push(format!("aptitude {} cannot be charted without a band", score.code));
            }
        }

        StageReport::new(
            json!({
                "has_results": summary.has_results,
                "avg_percentile": summary.avg_percentile,
                "overall_band": summary.overall_band,
                "composite_indices": summary.composite_indices,
                "aptitudes_tested": summary.aptitudes_tested,
            }),
            errors,
        )
    }
}

/// Propagate systemic errors; record anything else against `stage`.
fn soften<T>(
    result: Result<T>,
    stage: Stage,
    errors: &mut Vec<(Stage, String)>,
) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if is_systemic_error(&e) => Err(e),
        Err(e) => {
            tracing::debug!(%stage, "non-systemic fetch failure: {e:#}");
            errors.push((stage, format!("{e:#}")));
            Ok(None)
        }
    }
}

fn blank(value: Option<&str>) -> bool {
    value.map(str::trim).is_none_or(str::is_empty)
}

fn well_formed_name(value: &str) -> bool {
    value.chars().any(char::is_alphabetic)
        && value
            .chars()
            .all(|c| c.is_alphabetic() || c == ' ' || c == '-' || c == '\'' || c == '.')
}

fn well_formed_external_id(value: &str) -> bool {
    let value = value.trim();
    value.len() >= MIN_EXTERNAL_ID_LEN
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.')
}

fn check_identity(snapshot: &SubjectSnapshot) -> StageReport {
    let mut errors = snapshot.errors_for(Stage::Identity);

    let Some(subject) = &snapshot.subject else {
        if errors.is_empty() {
            errors.push(format!("subject {} not found", snapshot.subject_id));
        }
        return StageReport::new(json!({ "subject_found": false }), errors);
    };

    for (field, value) in [("name", &subject.name), ("surname", &subject.surname)] {
        if value.trim().is_empty() {
            errors.push(format!("{field} is missing"));
        } else if !well_formed_name(value.trim()) {
            errors.push(format!("{field} '{value}' is malformed"));
        }
    }

    let (external_id, source) = match (&subject.external_id, &snapshot.resolved_external_id) {
        (Some(id), _) if !id.trim().is_empty() => (Some(id.clone()), Some("record")),
        (_, Some(id)) => (Some(id.clone()), Some("lookup")),
        _ => (None, None),
    };
    match &external_id {
        None => errors.push("external ID is missing".to_string()),
        Some(id) if !well_formed_external_id(id) => {
            errors.push(format!("external ID '{id}' is malformed"))
        }
        Some(_) => {}
    }

    StageReport::new(
        json!({
            "subject_found": true,
            "full_name": subject.full_name(),
            "external_id": external_id,
            "external_id_source": source,
        }),
        errors,
    )
}

fn check_administration(snapshot: &SubjectSnapshot) -> StageReport {
    let mut errors = snapshot.errors_for(Stage::Administration);
    let results = &snapshot.results;

    if results.is_empty() && errors.is_empty() {
        errors.push("no test results recorded".to_string());
    }

    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    for r in results {
        let code = normalize_code(&r.aptitude_code);
        if r.elapsed_seconds.is_none() {
            errors.push(format!("result for aptitude {code} is missing timing data"));
        }
        if r.correct_count.is_none() || r.incorrect_count.is_none() {
            errors.push(format!("result for aptitude {code} is missing answer counts"));
        }
        *counts.entry(code).or_default() += 1;
    }
    for (code, n) in counts.iter().filter(|(_, n)| **n > 1) {
        errors.push(format!("aptitude {code} was administered {n} times"));
    }

    StageReport::new(
        json!({
            "result_count": results.len(),
            "aptitudes": counts.keys().collect::<Vec<_>>(),
        }),
        errors,
    )
}

fn check_storage(snapshot: &SubjectSnapshot) -> StageReport {
    let mut errors = Vec::new();

    for r in &snapshot.results {
        let code = normalize_code(&r.aptitude_code);
        for (field, value) in [
            ("raw_score", r.raw_score),
            ("correct_count", r.correct_count),
            ("incorrect_count", r.incorrect_count),
            ("omitted_count", r.omitted_count),
        ] {
            if let Some(v) = value.filter(|v| *v < 0) {
                errors.push(format!("result for aptitude {code} has negative {field} ({v})"));
            }
        }
        if let Some(v) = r.elapsed_seconds.filter(|v| *v < 0.0) {
            errors.push(format!("result for aptitude {code} has negative elapsed time ({v})"));
        }

        match answered_items(r) {
            None => errors.push(format!("result for aptitude {code} has overflowing answer counts")),
            Some(0) if r.raw_score.is_some_and(|s| s > 0) => errors.push(format!(
                "result for aptitude {code} has a positive raw score with no answered items"
            )),
            Some(_) => {}
        }
    }

    StageReport::new(json!({ "checked": snapshot.results.len() }), errors)
}

fn check_reporting(snapshot: &SubjectSnapshot) -> StageReport {
    let mut errors = snapshot.errors_for(Stage::Reporting);

    if snapshot.results.is_empty() {
        errors.push("no results to report on".to_string());
    }

    let missing: Vec<&String> = snapshot
        .interpretations
        .iter()
        .filter(|(_, text)| text.as_deref().is_none_or(|t| t.trim().is_empty()))
        .map(|(code, _)| code)
        .collect();
    for code in &missing {
        errors.push(format!("missing interpretation for aptitude {code}"));
    }

    StageReport::new(
        json!({
            "aptitudes": snapshot.interpretations.keys().collect::<Vec<_>>(),
            "missing_interpretations": missing,
        }),
        errors,
    )
}
