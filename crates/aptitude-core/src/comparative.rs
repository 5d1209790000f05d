//! Descriptive comparison of subject groups.
//!
//! Subjects are partitioned by a grouping key and per-group means are
//! compared. No inferential statistics are computed.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::aggregate::SubjectSummary;
use crate::catalog::CompositeIndex;
use crate::model::Subject;

/// Spread in mean percentile points across groups that is flagged as significant.
pub const SIGNIFICANT_DIFFERENCE: f64 = 20.0;

/// Label used for subjects without a value for the grouping key.
pub const UNKNOWN_GROUP: &str = "unknown";

/// How subjects are partitioned for comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupingKey {
    Institution,
    Gender,
    AgeBracket,
}

impl GroupingKey {
    /// Group label for a subject, evaluated on `as_of` for age brackets.
    pub fn group_of(&self, subject: &Subject, as_of: NaiveDate) -> String {
        match self {
            GroupingKey::Institution => subject
                .institution
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .unwrap_or_else(|| UNKNOWN_GROUP.to_string()),
            GroupingKey::Gender => subject
                .gender
                .map(|g| g.to_string())
                .unwrap_or_else(|| UNKNOWN_GROUP.to_string()),
            GroupingKey::AgeBracket => subject
                .age_on(as_of)
                .map(age_bracket)
                .unwrap_or(UNKNOWN_GROUP)
                .to_string(),
        }
    }
}

impl fmt::Display for GroupingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GroupingKey::Institution => write!(f, "institution"),
            GroupingKey::Gender => write!(f, "gender"),
            GroupingKey::AgeBracket => write!(f, "age"),
        }
    }
}

impl FromStr for GroupingKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "institution" | "school" => Ok(GroupingKey::Institution),
            "gender" | "sex" => Ok(GroupingKey::Gender),
            "age" | "age-bracket" | "age_bracket" => Ok(GroupingKey::AgeBracket),
            other => Err(format!("unknown grouping key: {other}")),
        }
    }
}

fn age_bracket(age: u32) -> &'static str {
    match age {
        0..=12 => "12 and under",
        13..=15 => "13-15",
        16..=18 => "16-18",
        19..=25 => "19-25",
        _ => "26 and over",
    }
}

/// Means for one group of subjects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupAggregate {
    pub group: String,
    pub subject_count: usize,
    pub avg_percentile: f64,
    pub composite_indices: BTreeMap<CompositeIndex, f64>,
    pub aptitude_means: BTreeMap<String, f64>,
}

/// An aptitude whose group means differ by more than [`SIGNIFICANT_DIFFERENCE`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignificantDifference {
    pub aptitude_code: String,
    pub spread: f64,
    pub highest_group: String,
    pub lowest_group: String,
}

/// A composite index whose group means differ by more than
/// [`SIGNIFICANT_DIFFERENCE`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositeDifference {
    pub index: CompositeIndex,
    pub spread: f64,
    pub highest_group: String,
    pub lowest_group: String,
}

/// Result of a comparative analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparativeAnalysis {
    pub grouping: GroupingKey,
    pub groups: Vec<GroupAggregate>,
    /// Spread of each composite index across groups.
    pub composite_spread: BTreeMap<CompositeIndex, f64>,
    pub significant_differences: Vec<SignificantDifference>,
    #[serde(default)]
    pub significant_composites: Vec<CompositeDifference>,
    /// Subjects excluded because they had no results.
    pub excluded_subjects: Vec<String>,
}

/// Compare groups of subjects. Summaries without results are excluded.
pub fn compare_groups(
    entries: &[(Subject, SubjectSummary)],
    grouping: GroupingKey,
    as_of: NaiveDate,
) -> ComparativeAnalysis {
    let mut partitions: BTreeMap<String, Vec<&SubjectSummary>> = BTreeMap::new();
    let mut excluded_subjects = Vec::new();

    for (subject, summary) in entries {
        if !summary.has_results {
            excluded_subjects.push(subject.id.clone());
            continue;
        }
        partitions
            .entry(grouping.group_of(subject, as_of))
            .or_default()
            .push(summary);
    }

    let groups: Vec<GroupAggregate> = partitions
        .into_iter()
        .map(|(group, summaries)| aggregate_group(group, &summaries))
        .collect();

    let mut composite_spread = BTreeMap::new();
    let mut significant_composites = Vec::new();
    for index in CompositeIndex::ALL {
        let Some((delta, high, low)) =
            spread(groups.iter().map(|g| (g, g.composite_indices.get(&index).copied())))
        else {
            continue;
        };
        composite_spread.insert(index, delta);
        if delta > SIGNIFICANT_DIFFERENCE {
            significant_composites.push(CompositeDifference {
                index,
                spread: delta,
                highest_group: high.group.clone(),
                lowest_group: low.group.clone(),
            });
        }
    }

    let codes: std::collections::BTreeSet<&String> =
        groups.iter().flat_map(|g| g.aptitude_means.keys()).collect();
    let significant_differences = codes
        .into_iter()
        .filter_map(|code| {
            let (delta, high, low) =
                spread(groups.iter().map(|g| (g, g.aptitude_means.get(code).copied())))?;
            (delta > SIGNIFICANT_DIFFERENCE).then(|| SignificantDifference {
                aptitude_code: code.clone(),
                spread: delta,
                highest_group: high.group.clone(),
                lowest_group: low.group.clone(),
            })
        })
        .collect();

    ComparativeAnalysis {
        grouping,
        groups,
        composite_spread,
        significant_differences,
        significant_composites,
        excluded_subjects,
    }
}

fn aggregate_group(group: String, summaries: &[&SubjectSummary]) -> GroupAggregate {
    let n = summaries.len().max(1) as f64;
    let avg_percentile = summaries.iter().map(|s| s.avg_percentile as f64).sum::<f64>() / n;

    let composite_indices = CompositeIndex::ALL
        .iter()
        .map(|index| {
            let mean = summaries
                .iter()
                .map(|s| s.composite_indices.get(*index) as f64)
                .sum::<f64>()
                / n;
            (*index, mean)
        })
        .collect();

    let mut per_code: BTreeMap<String, Vec<f64>> = BTreeMap::new();
    for summary in summaries {
        for score in &summary.scores {
            if let Some(p) = score.percentile {
                per_code.entry(score.code.clone()).or_default().push(p);
            }
        }
    }
    let aptitude_means = per_code
        .into_iter()
        .map(|(code, values)| {
            let mean = values.iter().sum::<f64>() / values.len() as f64;
            (code, mean)
        })
        .collect();

    GroupAggregate {
        group,
        subject_count: summaries.len(),
        avg_percentile,
        composite_indices,
        aptitude_means,
    }
}

/// (max - min, group at max, group at min) over groups that have a value.
/// Needs at least two groups with values.
fn spread<'a>(
    values: impl Iterator<Item = (&'a GroupAggregate, Option<f64>)>,
) -> Option<(f64, &'a GroupAggregate, &'a GroupAggregate)> {
    let present: Vec<(&GroupAggregate, f64)> =
        values.filter_map(|(g, v)| v.map(|v| (g, v))).collect();
    if present.len() < 2 {
        return None;
    }
    let high = present
        .iter()
        .copied()
        .max_by(|a, b| a.1.total_cmp(&b.1))?;
    let low = present
        .iter()
        .copied()
        .min_by(|a, b| a.1.total_cmp(&b.1))?;
    Some((high.1 - low.1, high.0, low.0))
}

impl ComparativeAnalysis {
    /// Render the analysis as markdown.
    pub fn to_markdown(&self) -> String {
        let mut md = String::new();
        md.push_str(&format!(
            "**Comparison by {}:** {} groups, {} significant differences\n\n",
            self.grouping,
            self.groups.len(),
            self.significant_differences.len() + self.significant_composites.len()
        ));

        md.push_str("| Group | Subjects | Avg PC |");
        for index in CompositeIndex::ALL {
            md.push_str(&format!(" {index} |"));
        }
        md.push('\n');
        md.push_str("|-------|----------|--------|");
        for _ in CompositeIndex::ALL {
            md.push_str("------|");
        }
        md.push('\n');
        for g in &self.groups {
            md.push_str(&format!(
                "| {} | {} | {:.1} |",
                g.group, g.subject_count, g.avg_percentile
            ));
            for index in CompositeIndex::ALL {
                let v = g.composite_indices.get(&index).copied().unwrap_or(0.0);
                md.push_str(&format!(" {v:.1} |"));
            }
            md.push('\n');
        }

        if !self.significant_differences.is_empty() || !self.significant_composites.is_empty() {
            md.push_str("\n### Significant differences\n\n");
            md.push_str("| Measure | Spread | Highest | Lowest |\n");
            md.push_str("|---------|--------|---------|--------|\n");
            for d in &self.significant_differences {
                md.push_str(&format!(
                    "| {} | {:.1} | {} | {} |\n",
                    d.aptitude_code, d.spread, d.highest_group, d.lowest_group
                ));
            }
            for d in &self.significant_composites {
                md.push_str(&format!(
                    "| {} index | {:.1} | {} | {} |\n",
                    d.index, d.spread, d.highest_group, d.lowest_group
                ));
            }
        }

        md
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::{AptitudeScore, CompositeIndices};
    use crate::model::Gender;

    fn subject(id: &str, institution: Option<&str>, gender: Option<Gender>) -> Subject {
        Subject {
            id: id.into(),
            name: "N".into(),
            surname: "S".into(),
            external_id: None,
            gender,
            birth_date: NaiveDate::from_ymd_opt(2009, 1, 1),
            institution: institution.map(str::to_string),
        }
    }

    fn summary(id: &str, scores: &[(&str, f64)]) -> SubjectSummary {
        let mut s = SubjectSummary::empty(id);
        s.has_results = !scores.is_empty();
        s.result_count = scores.len();
        s.scores = scores
            .iter()
            .map(|(code, p)| AptitudeScore {
                code: code.to_string(),
                percentile: Some(*p),
                raw_score: Some(10),
                band: None,
            })
            .collect();
        let avg = scores.iter().map(|(_, p)| p).sum::<f64>() / scores.len().max(1) as f64;
        s.avg_percentile = avg.round() as i64;
        s.composite_indices = CompositeIndices {
            general: s.avg_percentile,
            fluid: s.avg_percentile,
            crystallized: s.avg_percentile,
            processing: s.avg_percentile,
            quantitative: s.avg_percentile,
        };
        s
    }

    fn as_of() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 1).unwrap()
    }

    #[test]
    fn flags_aptitude_spread_above_threshold() {
        let entries = vec![
            (subject("a", Some("North"), None), summary("a", &[("V", 80.0), ("N", 50.0)])),
            (subject("b", Some("North"), None), summary("b", &[("V", 70.0), ("N", 52.0)])),
            (subject("c", Some("South"), None), summary("c", &[("V", 40.0), ("N", 48.0)])),
        ];
        let analysis = compare_groups(&entries, GroupingKey::Institution, as_of());

        assert_eq!(analysis.groups.len(), 2);
        assert_eq!(analysis.significant_differences.len(), 1);
        let diff = &analysis.significant_differences[0];
        assert_eq!(diff.aptitude_code, "V");
        assert!((diff.spread - 35.0).abs() < 1e-9);
        assert_eq!(diff.highest_group, "North");
        assert_eq!(diff.lowest_group, "South");
    }

    #[test]
    fn flags_composite_spread_above_threshold() {
        let entries = vec![
            (subject("a", Some("North"), None), summary("a", &[("V", 80.0)])),
            (subject("c", Some("South"), None), summary("c", &[("N", 50.0)])),
            (subject("d", Some("East"), None), summary("d", &[("R", 65.0)])),
        ];
        let analysis = compare_groups(&entries, GroupingKey::Institution, as_of());

        assert!(analysis.significant_differences.is_empty());
        assert_eq!(analysis.significant_composites.len(), CompositeIndex::ALL.len());
        let general = &analysis.significant_composites[0];
        assert_eq!(general.index, CompositeIndex::ALL[0]);
        assert!((general.spread - 30.0).abs() < 1e-9);
        assert_eq!(general.highest_group, "North");
        assert_eq!(general.lowest_group, "South");
        assert!(analysis.to_markdown().contains(&format!("| {} index |", general.index)));
    }

    #[test]
    fn composite_spread_at_threshold_is_not_flagged() {
        let entries = vec![
            (subject("a", Some("North"), None), summary("a", &[("V", 70.0)])),
            (subject("c", Some("South"), None), summary("c", &[("V", 50.0)])),
        ];
        let analysis = compare_groups(&entries, GroupingKey::Institution, as_of());
        assert!(analysis
            .composite_spread
            .values()
            .all(|s| (*s - SIGNIFICANT_DIFFERENCE).abs() < 1e-9));
        assert!(analysis.significant_composites.is_empty());
    }

    #[test]
    fn subjects_without_results_are_excluded() {
        let entries = vec![
            (subject("a", None, Some(Gender::Male)), summary("a", &[("V", 60.0)])),
            (subject("b", None, Some(Gender::Female)), SubjectSummary::empty("b")),
        ];
        let analysis = compare_groups(&entries, GroupingKey::Gender, as_of());
        assert_eq!(analysis.groups.len(), 1);
        assert_eq!(analysis.excluded_subjects, vec!["b"]);
        assert!(analysis.significant_differences.is_empty());
    }

    #[test]
    fn missing_key_goes_to_unknown_group() {
        let s = subject("a", None, None);
        assert_eq!(GroupingKey::Institution.group_of(&s, as_of()), UNKNOWN_GROUP);
        assert_eq!(GroupingKey::AgeBracket.group_of(&s, as_of()), "13-15");
    }

    #[test]
    fn markdown_lists_differences() {
        let entries = vec![
            (subject("a", Some("North"), None), summary("a", &[("E", 90.0)])),
            (subject("c", Some("South"), None), summary("c", &[("E", 30.0)])),
        ];
        let md = compare_groups(&entries, GroupingKey::Institution, as_of()).to_markdown();
        assert!(md.contains("Significant differences"));
        assert!(md.contains("| E | 60.0 | North | South |"));
    }

    #[test]
    fn grouping_key_parse() {
        assert_eq!("age".parse::<GroupingKey>().unwrap(), GroupingKey::AgeBracket);
        assert!("height".parse::<GroupingKey>().is_err());
    }
}
