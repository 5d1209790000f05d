//! Static aptitude registry, percentile bands, and composite-index grouping.
//!
//! The catalog is built once at process start and shared read-only by the
//! score processor and index aggregator.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Display metadata and grouping tags for one aptitude.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AptitudeDefinition {
    /// Unique short code (e.g. "V", "CON").
    pub code: String,
    /// Human-readable name.
    pub display_name: String,
    /// Composite indices this aptitude contributes to.
    #[serde(default)]
    pub group_tags: Vec<CompositeIndex>,
}

impl AptitudeDefinition {
    pub fn new(code: &str, display_name: &str, group_tags: &[CompositeIndex]) -> Self {
        Self {
            code: code.to_string(),
            display_name: display_name.to_string(),
            group_tags: group_tags.to_vec(),
        }
    }
}

/// Named composite intelligence indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompositeIndex {
    General,
    Fluid,
    Crystallized,
    Processing,
    Quantitative,
}

impl CompositeIndex {
    pub const ALL: [CompositeIndex; 5] = [
        CompositeIndex::General,
        CompositeIndex::Fluid,
        CompositeIndex::Crystallized,
        CompositeIndex::Processing,
        CompositeIndex::Quantitative,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            CompositeIndex::General => "General intelligence",
            CompositeIndex::Fluid => "Fluid intelligence",
            CompositeIndex::Crystallized => "Crystallized intelligence",
            CompositeIndex::Processing => "Processing speed",
            CompositeIndex::Quantitative => "Quantitative reasoning",
        }
    }
}

impl fmt::Display for CompositeIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompositeIndex::General => write!(f, "general"),
            CompositeIndex::Fluid => write!(f, "fluid"),
            CompositeIndex::Crystallized => write!(f, "crystallized"),
            CompositeIndex::Processing => write!(f, "processing"),
            CompositeIndex::Quantitative => write!(f, "quantitative"),
        }
    }
}

impl FromStr for CompositeIndex {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "general" | "g" => Ok(CompositeIndex::General),
            "fluid" | "gf" => Ok(CompositeIndex::Fluid),
            "crystallized" | "gc" => Ok(CompositeIndex::Crystallized),
            "processing" => Ok(CompositeIndex::Processing),
            "quantitative" => Ok(CompositeIndex::Quantitative),
            other => Err(format!("unknown composite index: {other}")),
        }
    }
}

/// The seven display bands used for colour-coding and clinical labels.
///
/// Bands are contiguous over [0, 100] with inclusive upper bounds
/// 5, 20, 40, 60, 80, 94, 100.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PercentileBand {
    VeryLow,
    Low,
    MediumLow,
    Medium,
    MediumHigh,
    High,
    VeryHigh,
}

const BAND_ORDER: [PercentileBand; 7] = [
    PercentileBand::VeryLow,
    PercentileBand::Low,
    PercentileBand::MediumLow,
    PercentileBand::Medium,
    PercentileBand::MediumHigh,
    PercentileBand::High,
    PercentileBand::VeryHigh,
];

const BAND_UPPER_BOUNDS: [f64; 7] = [5.0, 20.0, 40.0, 60.0, 80.0, 94.0, 100.0];

impl PercentileBand {
    /// Classify a percentile. Returns `None` outside [0, 100] or for NaN.
    pub fn from_percentile(percentile: f64) -> Option<Self> {
        if !(0.0..=100.0).contains(&percentile) {
            return None;
        }
        let idx = BAND_UPPER_BOUNDS.partition_point(|upper| *upper < percentile);
        BAND_ORDER.get(idx).copied()
    }

    /// Inclusive percentile range covered by this band.
    pub fn range(&self) -> (f64, f64) {
        let idx = *self as usize;
        let lower = if idx == 0 {
            0.0
        } else {
            BAND_UPPER_BOUNDS[idx - 1] + 1.0
        };
        (lower, BAND_UPPER_BOUNDS[idx])
    }

    pub fn label(&self) -> &'static str {
        match self {
            PercentileBand::VeryLow => "Very Low",
            PercentileBand::Low => "Low",
            PercentileBand::MediumLow => "Medium-Low",
            PercentileBand::Medium => "Medium",
            PercentileBand::MediumHigh => "Medium-High",
            PercentileBand::High => "High",
            PercentileBand::VeryHigh => "Very High",
        }
    }

    /// Hex colour used by report renderers.
    pub fn color(&self) -> &'static str {
        match self {
            PercentileBand::VeryLow => "#dc2626",
            PercentileBand::Low => "#f97316",
            PercentileBand::MediumLow => "#facc15",
            PercentileBand::Medium => "#a3a3a3",
            PercentileBand::MediumHigh => "#84cc16",
            PercentileBand::High => "#22c55e",
            PercentileBand::VeryHigh => "#2563eb",
        }
    }

    pub fn all() -> &'static [PercentileBand; 7] {
        &BAND_ORDER
    }
}

impl fmt::Display for PercentileBand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Registry of aptitude definitions keyed by code.
#[derive(Debug, Clone)]
pub struct AptitudeCatalog {
    definitions: Vec<AptitudeDefinition>,
    by_code: HashMap<String, usize>,
}

impl AptitudeCatalog {
    /// Build a catalog from definitions. Later duplicates of a code replace earlier ones.
    pub fn new(definitions: Vec<AptitudeDefinition>) -> Self {
        let mut unique: Vec<AptitudeDefinition> = Vec::with_capacity(definitions.len());
        let mut by_code = HashMap::new();
        for mut def in definitions {
            def.code = normalize_code(&def.code);
            match by_code.get(&def.code) {
                Some(&idx) => unique[idx] = def,
                None => {
                    by_code.insert(def.code.clone(), unique.len());
                    unique.push(def);
                }
            }
        }
        Self {
            definitions: unique,
            by_code,
        }
    }

    /// Look up an aptitude by code (case-insensitive, whitespace-trimmed).
    pub fn get(&self, code: &str) -> Option<&AptitudeDefinition> {
        self.by_code
            .get(&normalize_code(code))
            .map(|&idx| &self.definitions[idx])
    }

    pub fn contains(&self, code: &str) -> bool {
        self.get(code).is_some()
    }

    /// Codes whose definitions carry the given composite tag, in catalog order.
    pub fn members(&self, index: CompositeIndex) -> Vec<&str> {
        self.definitions
            .iter()
            .filter(|d| d.group_tags.contains(&index))
            .map(|d| d.code.as_str())
            .collect()
    }

    pub fn definitions(&self) -> &[AptitudeDefinition] {
        &self.definitions
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    /// Replace the member set of one composite index.
    ///
    /// Codes not present in the catalog are ignored.
    pub fn with_grouping(mut self, index: CompositeIndex, codes: &[&str]) -> Self {
        let wanted: Vec<String> = codes.iter().map(|c| normalize_code(c)).collect();
        for def in &mut self.definitions {
            def.group_tags.retain(|t| *t != index);
            if wanted.contains(&def.code) {
                def.group_tags.push(index);
            }
        }
        self
    }
}

impl Default for AptitudeCatalog {
    /// The eight-aptitude battery.
    fn default() -> Self {
        use CompositeIndex::*;
        Self::new(vec![
            AptitudeDefinition::new("V", "Verbal", &[General, Crystallized]),
            AptitudeDefinition::new("E", "Spatial", &[General, Fluid]),
            AptitudeDefinition::new("A", "Attention", &[Processing]),
            AptitudeDefinition::new("CON", "Concentration", &[Processing]),
            AptitudeDefinition::new("R", "Reasoning", &[General, Fluid]),
            AptitudeDefinition::new("N", "Numeric", &[General, Quantitative]),
            AptitudeDefinition::new("M", "Mechanical", &[General, Quantitative]),
            AptitudeDefinition::new("O", "Spelling", &[General, Crystallized]),
        ])
    }
}

/// Canonical form of an aptitude code.
pub fn normalize_code(code: &str) -> String {
    code.trim().to_uppercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn band_boundaries() {
        assert_eq!(PercentileBand::from_percentile(0.0), Some(PercentileBand::VeryLow));
        assert_eq!(PercentileBand::from_percentile(5.0), Some(PercentileBand::VeryLow));
        assert_eq!(PercentileBand::from_percentile(6.0), Some(PercentileBand::Low));
        assert_eq!(PercentileBand::from_percentile(20.0), Some(PercentileBand::Low));
        assert_eq!(PercentileBand::from_percentile(21.0), Some(PercentileBand::MediumLow));
        assert_eq!(PercentileBand::from_percentile(40.0), Some(PercentileBand::MediumLow));
        assert_eq!(PercentileBand::from_percentile(41.0), Some(PercentileBand::Medium));
        assert_eq!(PercentileBand::from_percentile(60.0), Some(PercentileBand::Medium));
        assert_eq!(PercentileBand::from_percentile(61.0), Some(PercentileBand::MediumHigh));
        assert_eq!(PercentileBand::from_percentile(80.0), Some(PercentileBand::MediumHigh));
        assert_eq!(PercentileBand::from_percentile(81.0), Some(PercentileBand::High));
        assert_eq!(PercentileBand::from_percentile(94.0), Some(PercentileBand::High));
        assert_eq!(PercentileBand::from_percentile(95.0), Some(PercentileBand::VeryHigh));
        assert_eq!(PercentileBand::from_percentile(100.0), Some(PercentileBand::VeryHigh));
    }

    #[test]
    fn band_lookup_is_total_over_range() {
        for p in 0..=100 {
            let band = PercentileBand::from_percentile(p as f64);
            assert!(band.is_some(), "percentile {p} has no band");
            let (lo, hi) = band.unwrap().range();
            assert!((lo..=hi).contains(&(p as f64)), "{p} outside {lo}..={hi}");
        }
    }

    #[test]
    fn band_rejects_out_of_range() {
        assert_eq!(PercentileBand::from_percentile(-0.5), None);
        assert_eq!(PercentileBand::from_percentile(100.5), None);
        assert_eq!(PercentileBand::from_percentile(f64::NAN), None);
    }

    #[test]
    fn default_catalog_lookup() {
        let catalog = AptitudeCatalog::default();
        assert_eq!(catalog.len(), 8);
        assert_eq!(catalog.get("v").unwrap().display_name, "Verbal");
        assert_eq!(catalog.get(" con ").unwrap().code, "CON");
        assert!(catalog.get("X").is_none());
    }

    #[test]
    fn default_grouping() {
        let catalog = AptitudeCatalog::default();
        assert_eq!(catalog.members(CompositeIndex::Fluid), vec!["E", "R"]);
        assert_eq!(catalog.members(CompositeIndex::Crystallized), vec!["V", "O"]);
        assert_eq!(catalog.members(CompositeIndex::Processing), vec!["A", "CON"]);
        assert_eq!(catalog.members(CompositeIndex::Quantitative), vec!["N", "M"]);
    }

    #[test]
    fn custom_grouping_replaces_members() {
        let catalog = AptitudeCatalog::default().with_grouping(CompositeIndex::Fluid, &["r", "N"]);
        assert_eq!(catalog.members(CompositeIndex::Fluid), vec!["R", "N"]);
        assert!(catalog
            .get("E")
            .unwrap()
            .group_tags
            .contains(&CompositeIndex::General));
    }

    #[test]
    fn composite_index_parse() {
        assert_eq!("Fluid".parse::<CompositeIndex>().unwrap(), CompositeIndex::Fluid);
        assert_eq!("gc".parse::<CompositeIndex>().unwrap(), CompositeIndex::Crystallized);
        assert!("memory".parse::<CompositeIndex>().is_err());
    }
}
