//! Typed reads over the generic data service.

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::DataError;
use crate::model::{
    RawResult, Subject, INTERPRETATION_COLUMN_ALIASES, RESULT_COLUMN_ALIASES,
    SUBJECT_COLUMN_ALIASES,
};
use crate::traits::{tables, DataService, Filter, Row, LOOKUP_SUBJECT_EXTERNAL_ID};

/// Decode rows into records, naming the table on failure.
pub fn decode_rows<T: DeserializeOwned>(table: &str, rows: Vec<Row>) -> Result<Vec<T>> {
    rows.into_iter()
        .map(|row| {
            serde_json::from_value(Value::Object(row)).map_err(|e| {
                anyhow::Error::from(DataError::Decode {
                    table: table.to_string(),
                    message: e.to_string(),
                })
            })
        })
        .collect()
}

/// Legacy column names for `table`, paired with their canonical names.
pub fn column_aliases(table: &str) -> &'static [(&'static str, &'static str)] {
    match table {
        tables::SUBJECTS => SUBJECT_COLUMN_ALIASES,
        tables::RESULTS => RESULT_COLUMN_ALIASES,
        tables::INTERPRETATIONS => INTERPRETATION_COLUMN_ALIASES,
        _ => &[],
    }
}

/// Rename legacy columns to their canonical names so that filters and
/// ordering on canonical columns see every row. An existing canonical
/// value wins over its alias.
pub fn normalize_row(table: &str, mut row: Row) -> Row {
    for (alias, canonical) in column_aliases(table) {
        if let Some(value) = row.remove(*alias) {
            if row.get(*canonical).is_none_or(Value::is_null) {
                row.insert((*canonical).to_string(), value);
            }
        }
    }
    row
}

/// Encode a record into a row.
pub fn encode_row<T: serde::Serialize>(record: &T) -> Result<Row> {
    match serde_json::to_value(record).context("failed to encode record")? {
        Value::Object(map) => Ok(map),
        other => anyhow::bail!("record did not encode to an object: {other}"),
    }
}

/// Fetch one subject by id.
pub async fn fetch_subject(data: &dyn DataService, subject_id: &str) -> Result<Option<Subject>> {
    let rows = data
        .select(tables::SUBJECTS, &Filter::all().eq("id", subject_id).page(0, 1))
        .await
        .with_context(|| format!("loading subject {subject_id}"))?;
    Ok(decode_rows(tables::SUBJECTS, rows)?.into_iter().next())
}

/// Fetch every live subject.
pub async fn fetch_subjects(data: &dyn DataService) -> Result<Vec<Subject>> {
    let rows = data
        .select(tables::SUBJECTS, &Filter::all().order_by("id", true))
        .await
        .context("loading subjects")?;
    decode_rows(tables::SUBJECTS, rows)
}

/// Fetch a subject's live raw results, oldest first.
pub async fn fetch_results(data: &dyn DataService, subject_id: &str) -> Result<Vec<RawResult>> {
    let rows = data
        .select(
            tables::RESULTS,
            &Filter::all()
                .eq("subject_id", subject_id)
                .order_by("timestamp", true),
        )
        .await
        .with_context(|| format!("loading results for subject {subject_id}"))?;
    decode_rows(tables::RESULTS, rows)
}

/// Resolve a subject's external identifier through the server-side lookup.
pub async fn lookup_external_id(data: &dyn DataService, subject_id: &str) -> Result<Option<String>> {
    let value = data
        .lookup(
            LOOKUP_SUBJECT_EXTERNAL_ID,
            serde_json::json!({ "subject_id": subject_id }),
        )
        .await
        .with_context(|| format!("resolving external id for subject {subject_id}"))?;
    Ok(match value {
        Value::String(s) if !s.trim().is_empty() => Some(s),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}
