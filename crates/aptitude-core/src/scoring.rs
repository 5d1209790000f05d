//! Score normalization, classification, and cross-result consistency checks.
//!
//! Validation failures are data, not errors: every raw result produces
//! exactly one [`NormalizedResult`], valid or not, so batch processing
//! always continues past bad records.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::catalog::{normalize_code, AptitudeCatalog, AptitudeDefinition, PercentileBand};
use crate::model::RawResult;

/// Percentile spread across one subject's results above which a warning is raised.
pub const MAX_PERCENTILE_SPREAD: f64 = 80.0;

/// A data-validity problem found on a single raw result.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ValidationIssue {
    #[error("unknown aptitude code '{code}'")]
    UnknownAptitude { code: String },

    #[error("raw score is missing")]
    MissingRawScore,

    #[error("raw score must be non-negative, got {value}")]
    NegativeRawScore { value: i64 },

    #[error("percentile must be within [0, 100], got {value}")]
    PercentileOutOfRange { value: f64 },

    #[error("{field} must be non-negative, got {value}")]
    NegativeCount { field: String, value: i64 },

    #[error("elapsed time must be non-negative, got {value}s")]
    NegativeElapsed { value: f64 },

    #[error("answer counts overflow: {correct} correct + {incorrect} incorrect")]
    CountOverflow { correct: i64, incorrect: i64 },
}

/// Metrics derived from answer counts and timing.
///
/// All values are finite and non-negative; a zero item count yields zeros.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct DerivedMetrics {
    pub total_items: i64,
    pub accuracy_pct: i64,
    pub time_per_item: f64,
    pub efficiency_score: i64,
}

/// Non-negative correct plus incorrect counts, or `None` when the sum
/// does not fit in an `i64`.
pub fn answered_items(raw: &RawResult) -> Option<i64> {
    let correct = raw.correct_count.unwrap_or(0).max(0);
    let incorrect = raw.incorrect_count.unwrap_or(0).max(0);
    correct.checked_add(incorrect)
}

impl DerivedMetrics {
    /// Metrics for one result. Overflowing counts yield zeros.
    pub fn compute(raw: &RawResult) -> Self {
        let correct = raw.correct_count.unwrap_or(0).max(0);
        let elapsed = raw
            .elapsed_seconds
            .filter(|s| s.is_finite() && *s > 0.0)
            .unwrap_or(0.0);
        let total_items = match answered_items(raw) {
            Some(0) | None => return Self::default(),
            Some(n) => n,
        };

        let accuracy_pct = (correct as f64 / total_items as f64 * 100.0).round() as i64;
        let time_per_item = elapsed / total_items as f64;
        let efficiency_score = if accuracy_pct > 0 && time_per_item > 0.0 {
            (accuracy_pct as f64 / time_per_item * 1000.0).round() as i64
        } else {
            0
        };

        Self {
            total_items,
            accuracy_pct,
            time_per_item,
            efficiency_score,
        }
    }
}

/// A raw result enriched with catalog metadata, band, and derived metrics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedResult {
    pub raw: RawResult,
    /// Canonical aptitude code.
    pub aptitude_code: String,
    pub aptitude: Option<AptitudeDefinition>,
    pub percentile_band: Option<PercentileBand>,
    pub metrics: DerivedMetrics,
    pub is_valid: bool,
    #[serde(default)]
    pub validation_errors: Vec<ValidationIssue>,
}

impl NormalizedResult {
    pub fn subject_id(&self) -> &str {
        &self.raw.subject_id
    }

    pub fn percentile(&self) -> Option<f64> {
        self.raw.percentile
    }

    pub fn display_name(&self) -> &str {
        self.aptitude
            .as_ref()
            .map(|a| a.display_name.as_str())
            .unwrap_or(self.aptitude_code.as_str())
    }
}

/// Outcome of processing many raw results.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessedBatch {
    pub valid_results: Vec<NormalizedResult>,
    pub invalid_results: Vec<NormalizedResult>,
    pub total_processed: usize,
    pub valid_count: usize,
    pub invalid_count: usize,
}

/// Outcome of a cross-result consistency check.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConsistencyReport {
    pub is_consistent: bool,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

/// Validates and enriches raw results against an aptitude catalog.
#[derive(Debug, Clone)]
pub struct ScoreProcessor {
    catalog: Arc<AptitudeCatalog>,
}

impl ScoreProcessor {
    pub fn new(catalog: Arc<AptitudeCatalog>) -> Self {
        Self { catalog }
    }

    pub fn catalog(&self) -> &AptitudeCatalog {
        &self.catalog
    }

    /// Normalize one raw result. Never fails; problems are recorded on the output.
    pub fn process_one(&self, raw: &RawResult) -> NormalizedResult {
        let code = normalize_code(&raw.aptitude_code);
        let aptitude = self.catalog.get(&code).cloned();
        let mut issues = Vec::new();

        if aptitude.is_none() {
            issues.push(ValidationIssue::UnknownAptitude { code: code.clone() });
        }

        match raw.raw_score {
            None => issues.push(ValidationIssue::MissingRawScore),
            Some(value) if value < 0 => issues.push(ValidationIssue::NegativeRawScore { value }),
            Some(_) => {}
        }

        let mut percentile_band = None;
        if let Some(value) = raw.percentile {
            match PercentileBand::from_percentile(value) {
                Some(band) => percentile_band = Some(band),
                None => issues.push(ValidationIssue::PercentileOutOfRange { value }),
            }
        }

        for (field, value) in [
            ("correct_count", raw.correct_count),
            ("incorrect_count", raw.incorrect_count),
            ("omitted_count", raw.omitted_count),
        ] {
            if let Some(value) = value.filter(|v| *v < 0) {
                issues.push(ValidationIssue::NegativeCount {
                    field: field.to_string(),
                    value,
                });
            }
        }

        if let Some(value) = raw.elapsed_seconds.filter(|s| *s < 0.0) {
            issues.push(ValidationIssue::NegativeElapsed { value });
        }

        if answered_items(raw).is_none() {
            issues.push(ValidationIssue::CountOverflow {
                correct: raw.correct_count.unwrap_or(0),
                incorrect: raw.incorrect_count.unwrap_or(0),
            });
        }

        NormalizedResult {
            raw: raw.clone(),
            aptitude_code: code,
            aptitude,
            percentile_band,
            metrics: DerivedMetrics::compute(raw),
            is_valid: issues.is_empty(),
            validation_errors: issues,
        }
    }

    /// Normalize every raw result independently.
    ///
    /// `valid_count + invalid_count == total_processed == raws.len()`.
    pub fn process_many(&self, raws: &[RawResult]) -> ProcessedBatch {
        let (valid_results, invalid_results): (Vec<_>, Vec<_>) = raws
            .iter()
            .map(|raw| self.process_one(raw))
            .partition(|r| r.is_valid);

        if !invalid_results.is_empty() {
            tracing::debug!(
                invalid = invalid_results.len(),
                total = raws.len(),
                "raw results failed validation"
            );
        }

        ProcessedBatch {
            valid_count: valid_results.len(),
            invalid_count: invalid_results.len(),
            total_processed: raws.len(),
            valid_results,
            invalid_results,
        }
    }
}

/// Check a set of results for duplicates, extreme spread, and unaggregatable records.
///
/// Duplicates and spread are warnings; a record with neither percentile nor
/// raw score is an error.
pub fn validate_consistency(results: &[NormalizedResult]) -> ConsistencyReport {
    let mut warnings = Vec::new();
    let mut errors = Vec::new();

    let mut by_subject: BTreeMap<&str, Vec<&NormalizedResult>> = BTreeMap::new();
    for r in results {
        by_subject.entry(r.subject_id()).or_default().push(r);
    }

    for (subject_id, subject_results) in &by_subject {
        let mut code_counts: BTreeMap<&str, usize> = BTreeMap::new();
        for r in subject_results {
            *code_counts.entry(r.aptitude_code.as_str()).or_default() += 1;
        }
        for (code, count) in code_counts.iter().filter(|(_, c)| **c > 1) {
            warnings.push(format!(
                "subject {subject_id} has {count} results for aptitude {code}; only the most recent is aggregated"
            ));
        }

        let percentiles: Vec<f64> = subject_results
            .iter()
            .filter_map(|r| r.percentile())
            .collect();
        if let (Some(min), Some(max)) = (
            percentiles.iter().copied().reduce(f64::min),
            percentiles.iter().copied().reduce(f64::max),
        ) {
            let spread = max - min;
            if spread > MAX_PERCENTILE_SPREAD {
                warnings.push(format!(
                    "subject {subject_id} has a percentile spread of {spread:.0} points; check administration conditions"
                ));
            }
        }

        for r in subject_results {
            if r.raw.percentile.is_none() && r.raw.raw_score.is_none() {
                errors.push(format!(
                    "subject {subject_id} result for aptitude {} has neither percentile nor raw score",
                    r.aptitude_code
                ));
            }
        }
    }

    ConsistencyReport {
        is_consistent: errors.is_empty(),
        warnings,
        errors,
    }
}

/// Keep only the most recent result per (subject, aptitude) pair.
///
/// Results without a timestamp lose to timestamped ones; among equals the
/// later position in the input wins. Output order follows first appearance.
pub fn latest_per_aptitude(results: &[NormalizedResult]) -> Vec<&NormalizedResult> {
    let mut order: Vec<(&str, &str)> = Vec::new();
    let mut latest: HashMap<(&str, &str), &NormalizedResult> = HashMap::new();

    for r in results {
        let key = (r.subject_id(), r.aptitude_code.as_str());
        match latest.get(&key) {
            Some(current) if current.raw.timestamp > r.raw.timestamp => {}
            Some(_) => {
                latest.insert(key, r);
            }
            None => {
                order.push(key);
                latest.insert(key, r);
            }
        }
    }

    order.iter().filter_map(|k| latest.get(k).copied()).collect()
}
