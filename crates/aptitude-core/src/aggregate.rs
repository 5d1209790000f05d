//! Subject-level aggregation and composite intelligence indices.
//!
//! Summaries are a pure function of the normalized results: the same
//! input always yields the same summary.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::catalog::{AptitudeCatalog, CompositeIndex, PercentileBand};
use crate::scoring::{latest_per_aptitude, NormalizedResult};

/// Percentile at or above which a result counts as high for triage.
pub const HIGH_THRESHOLD: f64 = 75.0;
/// Percentile below which a result counts as low for triage.
pub const LOW_THRESHOLD: f64 = 25.0;

/// Coarse triage partition of results (distinct from the seven display bands).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BandCounts {
    pub high: usize,
    pub medium: usize,
    pub low: usize,
}

impl BandCounts {
    fn record(&mut self, percentile: f64) {
        if percentile >= HIGH_THRESHOLD {
            self.high += 1;
        } else if percentile >= LOW_THRESHOLD {
            self.medium += 1;
        } else {
            self.low += 1;
        }
    }

    pub fn total(&self) -> usize {
        self.high + self.medium + self.low
    }
}

/// Composite indices, each a rounded mean percentile over a named aptitude subset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompositeIndices {
    pub general: i64,
    pub fluid: i64,
    pub crystallized: i64,
    pub processing: i64,
    pub quantitative: i64,
}

impl CompositeIndices {
    pub fn get(&self, index: CompositeIndex) -> i64 {
        match index {
            CompositeIndex::General => self.general,
            CompositeIndex::Fluid => self.fluid,
            CompositeIndex::Crystallized => self.crystallized,
            CompositeIndex::Processing => self.processing,
            CompositeIndex::Quantitative => self.quantitative,
        }
    }

    fn set(&mut self, index: CompositeIndex, value: i64) {
        match index {
            CompositeIndex::General => self.general = value,
            CompositeIndex::Fluid => self.fluid = value,
            CompositeIndex::Crystallized => self.crystallized = value,
            CompositeIndex::Processing => self.processing = value,
            CompositeIndex::Quantitative => self.quantitative = value,
        }
    }
}

/// Per-aptitude line of a summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AptitudeScore {
    pub code: String,
    pub percentile: Option<f64>,
    pub raw_score: Option<i64>,
    pub band: Option<PercentileBand>,
}

/// Aggregate view over one subject's normalized results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubjectSummary {
    pub subject_id: String,
    pub has_results: bool,
    pub result_count: usize,
    pub avg_percentile: i64,
    pub avg_raw_score: i64,
    pub band_counts: BandCounts,
    pub aptitudes_tested: Vec<String>,
    pub scores: Vec<AptitudeScore>,
    pub composite_indices: CompositeIndices,
    pub overall_band: Option<PercentileBand>,
    pub last_test_timestamp: Option<DateTime<Utc>>,
}

impl SubjectSummary {
    /// Zeroed summary for a subject with no usable results.
    pub fn empty(subject_id: &str) -> Self {
        Self {
            subject_id: subject_id.to_string(),
            has_results: false,
            result_count: 0,
            avg_percentile: 0,
            avg_raw_score: 0,
            band_counts: BandCounts::default(),
            aptitudes_tested: Vec::new(),
            scores: Vec::new(),
            composite_indices: CompositeIndices::default(),
            overall_band: None,
            last_test_timestamp: None,
        }
    }

    pub fn percentile_for(&self, code: &str) -> Option<f64> {
        self.scores
            .iter()
            .find(|s| s.code == code)
            .and_then(|s| s.percentile)
    }
}

/// Computes subject summaries using the catalog's composite grouping rules.
#[derive(Debug, Clone)]
pub struct IndexAggregator {
    catalog: Arc<AptitudeCatalog>,
}

impl IndexAggregator {
    pub fn new(catalog: Arc<AptitudeCatalog>) -> Self {
        Self { catalog }
    }

    /// Summarize a subject's results.
    ///
    /// Only valid results belonging to `subject_id` are used, and only the
    /// most recent result per aptitude. An empty input yields
    /// [`SubjectSummary::empty`].
    pub fn summarize(&self, subject_id: &str, results: &[NormalizedResult]) -> SubjectSummary {
        let owned: Vec<NormalizedResult> = results
            .iter()
            .filter(|r| r.is_valid && r.subject_id() == subject_id)
            .cloned()
            .collect();
        let latest = latest_per_aptitude(&owned);

        if latest.is_empty() {
            return SubjectSummary::empty(subject_id);
        }

        let percentiles: Vec<f64> = latest.iter().filter_map(|r| r.percentile()).collect();
        let raw_scores: Vec<i64> = latest.iter().filter_map(|r| r.raw.raw_score).collect();

        let avg_percentile = rounded_mean(&percentiles).unwrap_or(0);
        let avg_raw_score =
            rounded_mean(&raw_scores.iter().map(|v| *v as f64).collect::<Vec<_>>()).unwrap_or(0);

        let mut band_counts = BandCounts::default();
        for p in &percentiles {
            band_counts.record(*p);
        }

        let mut composite_indices = CompositeIndices::default();
        for index in CompositeIndex::ALL {
            let members = self.catalog.members(index);
            let member_percentiles: Vec<f64> = latest
                .iter()
                .filter(|r| members.contains(&r.aptitude_code.as_str()))
                .filter_map(|r| r.percentile())
                .collect();
            let value = rounded_mean(&member_percentiles).unwrap_or(avg_percentile);
            composite_indices.set(index, value);
        }

        let scores: Vec<AptitudeScore> = latest
            .iter()
            .map(|r| AptitudeScore {
                code: r.aptitude_code.clone(),
                percentile: r.percentile(),
                raw_score: r.raw.raw_score,
                band: r.percentile_band,
            })
            .collect();

        let last_test_timestamp = latest.iter().filter_map(|r| r.raw.timestamp).max();

        SubjectSummary {
            subject_id: subject_id.to_string(),
            has_results: true,
            result_count: latest.len(),
            avg_percentile,
            avg_raw_score,
            band_counts,
            aptitudes_tested: latest.iter().map(|r| r.aptitude_code.clone()).collect(),
            scores,
            composite_indices,
            overall_band: if percentiles.is_empty() {
                None
            } else {
                PercentileBand::from_percentile(avg_percentile as f64)
            },
            last_test_timestamp,
        }
    }
}

/// Arithmetic mean rounded half away from zero. `None` for an empty slice.
pub fn rounded_mean(values: &[f64]) -> Option<i64> {
    if values.is_empty() {
        return None;
    }
    Some((values.iter().sum::<f64>() / values.len() as f64).round() as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RawResult;
    use crate::scoring::ScoreProcessor;
    use chrono::TimeZone;

    fn normalized(scores: &[(&str, f64)]) -> Vec<NormalizedResult> {
        let processor = ScoreProcessor::new(Arc::new(AptitudeCatalog::default()));
        scores
            .iter()
            .map(|(code, pc)| {
                processor.process_one(
                    &RawResult::new("s1", code)
                        .with_raw_score((*pc / 4.0) as i64)
                        .with_percentile(*pc),
                )
            })
            .collect()
    }

    fn aggregator() -> IndexAggregator {
        IndexAggregator::new(Arc::new(AptitudeCatalog::default()))
    }

    #[test]
    fn empty_input_yields_zeroed_summary() {
        let summary = aggregator().summarize("s1", &[]);
        assert!(!summary.has_results);
        assert_eq!(summary.avg_percentile, 0);
        assert_eq!(summary.band_counts.total(), 0);
        assert_eq!(summary.composite_indices, CompositeIndices::default());
        assert!(summary.aptitudes_tested.is_empty());
        assert!(summary.overall_band.is_none());
    }

    #[test]
    fn fluid_index_example() {
        let results = normalized(&[("V", 90.0), ("E", 85.0), ("R", 30.0), ("N", 40.0)]);
        let summary = aggregator().summarize("s1", &results);

        assert!(summary.has_results);
        assert_eq!(summary.composite_indices.fluid, 58);
        assert_eq!(summary.avg_percentile, 61);
        assert_eq!(summary.overall_band, Some(PercentileBand::MediumHigh));
    }

    #[test]
    fn missing_subset_falls_back_to_average() {
        let results = normalized(&[("V", 90.0), ("E", 85.0), ("R", 30.0), ("N", 40.0)]);
        let summary = aggregator().summarize("s1", &results);
        // no A or CON results
        assert_eq!(summary.composite_indices.processing, summary.avg_percentile);
        // only V present for crystallized
        assert_eq!(summary.composite_indices.crystallized, 90);
        assert_eq!(summary.composite_indices.quantitative, 40);
    }

    #[test]
    fn band_counts_partition() {
        let results = normalized(&[("V", 75.0), ("E", 74.9), ("R", 25.0), ("N", 24.0), ("M", 10.0)]);
        let summary = aggregator().summarize("s1", &results);
        assert_eq!(
            summary.band_counts,
            BandCounts {
                high: 1,
                medium: 2,
                low: 2
            }
        );
        assert_eq!(summary.band_counts.total(), summary.result_count);
    }

    #[test]
    fn invalid_results_are_ignored() {
        let mut results = normalized(&[("V", 80.0)]);
        let processor = ScoreProcessor::new(Arc::new(AptitudeCatalog::default()));
        results.push(processor.process_one(&RawResult::new("s1", "E").with_raw_score(-5)));
        let summary = aggregator().summarize("s1", &results);
        assert_eq!(summary.result_count, 1);
        assert_eq!(summary.aptitudes_tested, vec!["V"]);
    }

    #[test]
    fn most_recent_duplicate_wins() {
        let processor = ScoreProcessor::new(Arc::new(AptitudeCatalog::default()));
        let t1 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let t2 = Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap();
        let results = vec![
            processor.process_one(
                &RawResult::new("s1", "V")
                    .with_raw_score(5)
                    .with_percentile(10.0)
                    .with_timestamp(t1),
            ),
            processor.process_one(
                &RawResult::new("s1", "V")
                    .with_raw_score(20)
                    .with_percentile(70.0)
                    .with_timestamp(t2),
            ),
        ];
        let summary = aggregator().summarize("s1", &results);
        assert_eq!(summary.result_count, 1);
        assert_eq!(summary.avg_percentile, 70);
        assert_eq!(summary.last_test_timestamp, Some(t2));
    }

    #[test]
    fn summarize_is_deterministic() {
        let results = normalized(&[("V", 33.0), ("O", 67.0), ("A", 12.0), ("CON", 88.0)]);
        let a = aggregator().summarize("s1", &results);
        let b = aggregator().summarize("s1", &results);
        assert_eq!(a, b);
    }

    #[test]
    fn rounded_mean_rounds_half_up() {
        assert_eq!(rounded_mean(&[85.0, 30.0]), Some(58));
        assert_eq!(rounded_mean(&[]), None);
    }
}
