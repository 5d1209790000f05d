//! Trait definitions for the external collaborators the core consumes.
//!
//! The relational data service is implemented in `aptitude-store` (REST
//! client, in-memory store, and the caching façade). Report sinks live in
//! `aptitude-store` and `aptitude-report`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::report::SubjectReport;

/// A row as exchanged with the data service.
pub type Row = serde_json::Map<String, Value>;

/// Collection names used by the core.
pub mod tables {
    pub const SUBJECTS: &str = "subjects";
    pub const RESULTS: &str = "results";
    pub const REPORTS: &str = "reports";
    pub const INTERPRETATIONS: &str = "interpretations";
}

/// Server-side lookup resolving a subject's external login identifier.
pub const LOOKUP_SUBJECT_EXTERNAL_ID: &str = "subject_external_id";

// ---------------------------------------------------------------------------
// Data service trait
// ---------------------------------------------------------------------------

/// Generic relational data service over typed tables.
#[async_trait]
pub trait DataService: Send + Sync {
    /// Human-readable backend name (e.g. "rest").
    fn name(&self) -> &str;

    /// Rows of `table` matching `filter`. Soft-deleted rows are excluded
    /// unless the filter includes them.
    async fn select(&self, table: &str, filter: &Filter) -> anyhow::Result<Vec<Row>>;

    /// Insert rows, returning them as stored.
    async fn insert(&self, table: &str, rows: Vec<Row>) -> anyhow::Result<Vec<Row>>;

    /// Apply `patch` to every row matching `filter`, returning the updated rows.
    async fn update(&self, table: &str, filter: &Filter, patch: Row) -> anyhow::Result<Vec<Row>>;

    /// Apply several independent updates in order.
    async fn update_many(
        &self,
        table: &str,
        updates: Vec<(Filter, Row)>,
    ) -> anyhow::Result<Vec<Row>> {
        let mut out = Vec::new();
        for (filter, patch) in updates {
            out.extend(self.update(table, &filter, patch).await?);
        }
        Ok(out)
    }

    /// Mark matching rows deleted. Returns the number of rows affected.
    async fn soft_delete(&self, table: &str, filter: &Filter) -> anyhow::Result<u64>;

    /// Clear the deleted mark on matching rows. Returns the number of rows affected.
    async fn restore(&self, table: &str, filter: &Filter) -> anyhow::Result<u64>;

    /// Server-side computed value.
    async fn lookup(&self, name: &str, params: Value) -> anyhow::Result<Value>;
}

/// Comparison operator in a filter condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Op {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
    IsNull,
}

impl Op {
    /// PostgREST operator token.
    pub fn token(&self) -> &'static str {
        match self {
            Op::Eq => "eq",
            Op::Neq => "neq",
            Op::Gt => "gt",
            Op::Gte => "gte",
            Op::Lt => "lt",
            Op::Lte => "lte",
            Op::In => "in",
            Op::IsNull => "is",
        }
    }
}

/// One `column op value` condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub column: String,
    pub op: Op,
    pub value: Value,
}

/// Sort order for a select.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBy {
    pub column: String,
    pub ascending: bool,
}

/// Row filter, projection, ordering, and paging for data-service calls.
///
/// Conditions are combined with AND.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub fields: Option<Vec<String>>,
    #[serde(default)]
    pub order: Option<OrderBy>,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub offset: Option<usize>,
    #[serde(default)]
    pub include_deleted: bool,
}

impl Filter {
    /// Matches every live row.
    pub fn all() -> Self {
        Self::default()
    }

    pub fn eq(self, column: &str, value: impl Into<Value>) -> Self {
        self.condition(column, Op::Eq, value.into())
    }

    pub fn neq(self, column: &str, value: impl Into<Value>) -> Self {
        self.condition(column, Op::Neq, value.into())
    }

    pub fn gte(self, column: &str, value: impl Into<Value>) -> Self {
        self.condition(column, Op::Gte, value.into())
    }

    pub fn lte(self, column: &str, value: impl Into<Value>) -> Self {
        self.condition(column, Op::Lte, value.into())
    }

    pub fn one_of(self, column: &str, values: Vec<Value>) -> Self {
        self.condition(column, Op::In, Value::Array(values))
    }

    pub fn is_null(self, column: &str) -> Self {
        self.condition(column, Op::IsNull, Value::Null)
    }

    pub fn condition(mut self, column: &str, op: Op, value: Value) -> Self {
        self.conditions.push(Condition {
            column: column.to_string(),
            op,
            value,
        });
        self
    }

    pub fn select_fields(mut self, fields: &[&str]) -> Self {
        self.fields = Some(fields.iter().map(|f| f.to_string()).collect());
        self
    }

    pub fn order_by(mut self, column: &str, ascending: bool) -> Self {
        self.order = Some(OrderBy {
            column: column.to_string(),
            ascending,
        });
        self
    }

    pub fn page(mut self, offset: usize, limit: usize) -> Self {
        self.offset = Some(offset);
        self.limit = Some(limit);
        self
    }

    pub fn include_deleted(mut self) -> Self {
        self.include_deleted = true;
        self
    }

    /// Stable string form, used as a cache key.
    pub fn cache_key(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

// ---------------------------------------------------------------------------
// Interpretation lookup and report persistence
// ---------------------------------------------------------------------------

/// Qualitative-interpretation lookup.
#[async_trait]
pub trait InterpretationSource: Send + Sync {
    /// Interpretation text for an aptitude, if one exists.
    async fn interpretation(&self, aptitude_code: &str) -> anyhow::Result<Option<String>>;
}

/// Persists generated subject reports.
#[async_trait]
pub trait ReportSink: Send + Sync {
    /// Store the report and return its persisted identifier.
    async fn persist(&self, report: &SubjectReport) -> anyhow::Result<String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_builder_and_cache_key() {
        let a = Filter::all().eq("subject_id", "s1").order_by("timestamp", false);
        let b = Filter::all().eq("subject_id", "s1").order_by("timestamp", false);
        let c = Filter::all().eq("subject_id", "s2");
        assert_eq!(a.cache_key(), b.cache_key());
        assert_ne!(a.cache_key(), c.cache_key());
        assert_eq!(a.conditions[0].op, Op::Eq);
        assert!(!a.include_deleted);
    }

    #[test]
    fn op_tokens() {
        assert_eq!(Op::Gte.token(), "gte");
        assert_eq!(Op::IsNull.token(), "is");
    }
}
