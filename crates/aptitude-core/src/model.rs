//! Record shapes read from the external data service.
//!
//! Legacy field names are accepted as serde aliases so that every record
//! is normalized into one canonical shape at the deserialization boundary.
//! The alias tables below let stores rename legacy columns before any
//! filter runs.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Legacy subject column names and their canonical replacements.
pub const SUBJECT_COLUMN_ALIASES: &[(&str, &str)] = &[
    ("nombre", "name"),
    ("apellido", "surname"),
    ("apellidos", "surname"),
    ("documento", "external_id"),
    ("document_id", "external_id"),
    ("genero", "gender"),
    ("sexo", "gender"),
    ("fecha_nacimiento", "birth_date"),
    ("institucion", "institution"),
];

/// Legacy result column names and their canonical replacements.
pub const RESULT_COLUMN_ALIASES: &[(&str, &str)] = &[
    ("paciente_id", "subject_id"),
    ("patient_id", "subject_id"),
    ("aptitud", "aptitude_code"),
    ("codigo", "aptitude_code"),
    ("aptitude", "aptitude_code"),
    ("puntaje_directo", "raw_score"),
    ("pd", "raw_score"),
    ("puntaje_pd", "raw_score"),
    ("aciertos", "correct_count"),
    ("respuestas_correctas", "correct_count"),
    ("errores", "incorrect_count"),
    ("respuestas_incorrectas", "incorrect_count"),
    ("omisiones", "omitted_count"),
    ("respuestas_omitidas", "omitted_count"),
    ("tiempo_segundos", "elapsed_seconds"),
    ("tiempo", "elapsed_seconds"),
    ("percentil", "percentile"),
    ("pc", "percentile"),
    ("puntaje_pc", "percentile"),
    ("fecha", "timestamp"),
    ("fecha_evaluacion", "timestamp"),
];

/// Legacy interpretation column names and their canonical replacements.
pub const INTERPRETATION_COLUMN_ALIASES: &[(&str, &str)] = &[
    ("aptitud", "aptitude_code"),
    ("codigo", "aptitude_code"),
    ("interpretation", "text"),
    ("texto", "text"),
];

/// Parse a stored timestamp. Values without an offset are taken as UTC.
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S%.f%#z") {
        return Some(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, format) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

fn lenient_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<String>::deserialize(deserializer)? {
        None => Ok(None),
        Some(s) if s.trim().is_empty() => Ok(None),
        Some(s) => parse_timestamp(&s)
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp '{s}'"))),
    }
}

/// The person who took the test battery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subject {
    pub id: String,
    #[serde(default, alias = "nombre")]
    pub name: String,
    #[serde(default, alias = "apellido", alias = "apellidos")]
    pub surname: String,
    /// External identity document or login identifier.
    #[serde(default, alias = "documento", alias = "document_id")]
    pub external_id: Option<String>,
    #[serde(default, alias = "genero", alias = "sexo")]
    pub gender: Option<Gender>,
    #[serde(default, alias = "fecha_nacimiento")]
    pub birth_date: Option<NaiveDate>,
    #[serde(default, alias = "institucion")]
    pub institution: Option<String>,
}

impl Subject {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.name.trim(), self.surname.trim())
            .trim()
            .to_string()
    }

    /// Age in whole years on the given date.
    pub fn age_on(&self, date: NaiveDate) -> Option<u32> {
        let birth = self.birth_date?;
        let mut years = date.year() - birth.year();
        if (date.month(), date.day()) < (birth.month(), birth.day()) {
            years -= 1;
        }
        u32::try_from(years).ok()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    #[serde(alias = "m", alias = "masculino")]
    Male,
    #[serde(alias = "f", alias = "femenino")]
    Female,
    #[serde(alias = "o", alias = "otro")]
    Other,
}

impl fmt::Display for Gender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Gender::Male => write!(f, "male"),
            Gender::Female => write!(f, "female"),
            Gender::Other => write!(f, "other"),
        }
    }
}

impl FromStr for Gender {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "male" | "m" | "masculino" => Ok(Gender::Male),
            "female" | "f" | "femenino" => Ok(Gender::Female),
            "other" | "o" | "otro" => Ok(Gender::Other),
            other => Err(format!("unknown gender: {other}")),
        }
    }
}

/// One administered test instance, as stored.
///
/// Count and timing fields are optional so that records with missing
/// administration data can be audited instead of rejected at parse time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawResult {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(alias = "paciente_id", alias = "patient_id")]
    pub subject_id: String,
    #[serde(alias = "aptitud", alias = "codigo", alias = "aptitude")]
    pub aptitude_code: String,
    #[serde(default, alias = "puntaje_directo", alias = "pd", alias = "puntaje_pd")]
    pub raw_score: Option<i64>,
    #[serde(default, alias = "aciertos", alias = "respuestas_correctas")]
    pub correct_count: Option<i64>,
    #[serde(default, alias = "errores", alias = "respuestas_incorrectas")]
    pub incorrect_count: Option<i64>,
    #[serde(default, alias = "omisiones", alias = "respuestas_omitidas")]
    pub omitted_count: Option<i64>,
    #[serde(default, alias = "tiempo_segundos", alias = "tiempo")]
    pub elapsed_seconds: Option<f64>,
    #[serde(default, alias = "percentil", alias = "pc", alias = "puntaje_pc")]
    pub percentile: Option<f64>,
    #[serde(
        default,
        alias = "fecha",
        alias = "fecha_evaluacion",
        deserialize_with = "lenient_timestamp"
    )]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl RawResult {
    /// A minimal record; counts and timing are left empty.
    pub fn new(subject_id: &str, aptitude_code: &str) -> Self {
        Self {
            id: None,
            subject_id: subject_id.to_string(),
            aptitude_code: aptitude_code.to_string(),
            raw_score: None,
            correct_count: None,
            incorrect_count: None,
            omitted_count: None,
            elapsed_seconds: None,
            percentile: None,
            timestamp: None,
            deleted_at: None,
        }
    }

    pub fn with_counts(mut self, correct: i64, incorrect: i64, omitted: i64) -> Self {
        self.correct_count = Some(correct);
        self.incorrect_count = Some(incorrect);
        self.omitted_count = Some(omitted);
        self
    }

    pub fn with_raw_score(mut self, raw_score: i64) -> Self {
        self.raw_score = Some(raw_score);
        self
    }

    pub fn with_percentile(mut self, percentile: f64) -> Self {
        self.percentile = Some(percentile);
        self
    }

    pub fn with_elapsed(mut self, seconds: f64) -> Self {
        self.elapsed_seconds = Some(seconds);
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}
