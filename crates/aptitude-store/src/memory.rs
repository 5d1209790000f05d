//! In-memory data service, used for local fixtures and tests.

use std::cmp::Ordering as CmpOrdering;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use serde_json::Value;

use aptitude_core::error::DataError;
use aptitude_core::records::{encode_row, normalize_row};
use aptitude_core::traits::{
    tables, Condition, DataService, Filter, Op, Row, LOOKUP_SUBJECT_EXTERNAL_ID,
};

/// Login identities, consulted by the `subject_external_id` lookup.
pub const IDENTITIES_TABLE: &str = "subject_identities";

const DELETED_AT: &str = "deleted_at";

/// A data service holding every table in process memory.
///
/// Unknown tables are reported as missing collections. Calls can be
/// counted, and the service can be switched to "unavailable" to exercise
/// systemic failure paths.
pub struct MemoryDataService {
    tables: RwLock<HashMap<String, Vec<Row>>>,
    select_calls: AtomicU64,
    lookup_calls: AtomicU64,
    unavailable: AtomicBool,
}

impl MemoryDataService {
    /// An empty store with the standard tables.
    pub fn new() -> Self {
        let tables = [
            tables::SUBJECTS,
            tables::RESULTS,
            tables::REPORTS,
            tables::INTERPRETATIONS,
            IDENTITIES_TABLE,
        ]
        .into_iter()
        .map(|t| (t.to_string(), Vec::new()))
        .collect();

        Self {
            tables: RwLock::new(tables),
            select_calls: AtomicU64::new(0),
            lookup_calls: AtomicU64::new(0),
            unavailable: AtomicBool::new(false),
        }
    }

    /// Load tables from a JSON fixture: an object mapping table names to
    /// arrays of rows.
    pub fn from_fixture(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read fixture: {}", path.display()))?;
        Self::from_fixture_str(&content)
            .with_context(|| format!("failed to load fixture: {}", path.display()))
    }

    pub fn from_fixture_str(content: &str) -> Result<Self> {
        let parsed: HashMap<String, Vec<Row>> =
            serde_json::from_str(content).context("fixture must map table names to row arrays")?;
        let store = Self::new();
        for (table, rows) in parsed {
            store.seed_rows(&table, rows);
        }
        Ok(store)
    }

    /// Append raw rows to a table, creating it if needed. Legacy column
    /// names are renamed to canonical ones on the way in.
    pub fn seed_rows(&self, table: &str, rows: Vec<Row>) {
        let mut tables = self.tables.write().unwrap_or_else(PoisonError::into_inner);
        tables
            .entry(table.to_string())
            .or_default()
            .extend(rows.into_iter().map(|row| normalize_row(table, row)));
    }

    /// Append typed records to a table.
    pub fn seed<T: Serialize>(&self, table: &str, records: &[T]) -> Result<()> {
        let rows = records.iter().map(encode_row).collect::<Result<Vec<_>>>()?;
        self.seed_rows(table, rows);
        Ok(())
    }

    /// Serialize every table back into fixture form.
    pub fn to_fixture(&self) -> Value {
        let tables = self.tables.read().unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<&String> = tables.keys().collect();
        names.sort();
        let map = names
            .into_iter()
            .map(|name| {
                let rows = tables[name].iter().cloned().map(Value::Object).collect();
                (name.clone(), Value::Array(rows))
            })
            .collect();
        Value::Object(map)
    }

    /// Make every subsequent call fail with [`DataError::Unavailable`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn select_calls(&self) -> u64 {
        self.select_calls.load(Ordering::Relaxed)
    }

    pub fn lookup_calls(&self) -> u64 {
        self.lookup_calls.load(Ordering::Relaxed)
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(DataError::Unavailable("memory store switched off".into()).into());
        }
        Ok(())
    }

    /// Run `f` over a table's rows under the write lock.
    fn with_table<R>(&self, table: &str, f: impl FnOnce(&mut Vec<Row>) -> R) -> Result<R> {
        self.check_available()?;
        let mut tables = self.tables.write().unwrap_or_else(PoisonError::into_inner);
        let rows = tables
            .get_mut(table)
            .ok_or_else(|| DataError::MissingCollection(table.to_string()))?;
        Ok(f(rows))
    }
}

impl Default for MemoryDataService {
    fn default() -> Self {
        Self::new()
    }
}

fn is_deleted(row: &Row) -> bool {
    row.get(DELETED_AT).is_some_and(|v| !v.is_null())
}

fn compare_values(a: &Value, b: &Value) -> Option<CmpOrdering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::Null, Value::Null) => Some(CmpOrdering::Equal),
        _ => None,
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    compare_values(a, b) == Some(CmpOrdering::Equal)
}

fn condition_holds(row: &Row, condition: &Condition) -> bool {
    let value = row.get(&condition.column).unwrap_or(&Value::Null);
    let ordering = || compare_values(value, &condition.value);
    match condition.op {
        Op::Eq => values_equal(value, &condition.value),
        Op::Neq => !values_equal(value, &condition.value),
        Op::Gt => ordering() == Some(CmpOrdering::Greater),
        Op::Gte => matches!(ordering(), Some(CmpOrdering::Greater | CmpOrdering::Equal)),
        Op::Lt => ordering() == Some(CmpOrdering::Less),
        Op::Lte => matches!(ordering(), Some(CmpOrdering::Less | CmpOrdering::Equal)),
        Op::In => condition
            .value
            .as_array()
            .is_some_and(|options| options.iter().any(|o| values_equal(value, o))),
        Op::IsNull => value.is_null(),
    }
}

fn matches_filter(row: &Row, filter: &Filter) -> bool {
    (filter.include_deleted || !is_deleted(row))
        && filter.conditions.iter().all(|c| condition_holds(row, c))
}

fn project(row: &Row, fields: Option<&Vec<String>>) -> Row {
    match fields {
        Some(fields) => fields
            .iter()
            .filter_map(|f| row.get(f).map(|v| (f.clone(), v.clone())))
            .collect(),
        None => row.clone(),
    }
}

#[async_trait]
impl DataService for MemoryDataService {
    fn name(&self) -> &str {
        "memory"
    }

    async fn select(&self, table: &str, filter: &Filter) -> Result<Vec<Row>> {
        self.select_calls.fetch_add(1, Ordering::Relaxed);
        self.with_table(table, |rows| {
            let mut selected: Vec<&Row> = rows.iter().filter(|r| matches_filter(r, filter)).collect();
            if let Some(order) = &filter.order {
                selected.sort_by(|a, b| {
                    let av = a.get(&order.column).unwrap_or(&Value::Null);
                    let bv = b.get(&order.column).unwrap_or(&Value::Null);
                    let ord = match (av.is_null(), bv.is_null()) {
                        (true, true) => CmpOrdering::Equal,
                        (true, false) => CmpOrdering::Less,
                        (false, true) => CmpOrdering::Greater,
                        (false, false) => compare_values(av, bv).unwrap_or(CmpOrdering::Equal),
                    };
                    if order.ascending {
                        ord
                    } else {
                        ord.reverse()
                    }
                });
            }
            selected
                .into_iter()
                .skip(filter.offset.unwrap_or(0))
                .take(filter.limit.unwrap_or(usize::MAX))
                .map(|r| project(r, filter.fields.as_ref()))
                .collect()
        })
    }

    async fn insert(&self, table: &str, rows: Vec<Row>) -> Result<Vec<Row>> {
        self.with_table(table, |stored| {
            let inserted: Vec<Row> = rows
                .into_iter()
                .map(|row| {
                    let mut row = normalize_row(table, row);
                    if row.get("id").is_none_or(Value::is_null) {
                        row.insert("id".into(), Value::String(uuid::Uuid::new_v4().to_string()));
                    }
                    row
                })
                .collect();
            stored.extend(inserted.iter().cloned());
            inserted
        })
    }

    async fn update(&self, table: &str, filter: &Filter, patch: Row) -> Result<Vec<Row>> {
        let patch = normalize_row(table, patch);
        self.with_table(table, |rows| {
            rows.iter_mut()
                .filter(|r| matches_filter(r, filter))
                .map(|row| {
                    for (k, v) in &patch {
                        row.insert(k.clone(), v.clone());
                    }
                    row.clone()
                })
                .collect()
        })
    }

    async fn soft_delete(&self, table: &str, filter: &Filter) -> Result<u64> {
        let now = Value::String(Utc::now().to_rfc3339());
        self.with_table(table, |rows| {
            let mut count = 0;
            for row in rows.iter_mut().filter(|r| !is_deleted(r) && matches_filter(r, filter)) {
                row.insert(DELETED_AT.into(), now.clone());
                count += 1;
            }
            count
        })
    }

    async fn restore(&self, table: &str, filter: &Filter) -> Result<u64> {
        let filter = filter.clone().include_deleted();
        self.with_table(table, |rows| {
            let mut count = 0;
            for row in rows.iter_mut().filter(|r| is_deleted(r) && matches_filter(r, &filter)) {
                row.insert(DELETED_AT.into(), Value::Null);
                count += 1;
            }
            count
        })
    }

    async fn lookup(&self, name: &str, params: Value) -> Result<Value> {
        self.lookup_calls.fetch_add(1, Ordering::Relaxed);
        self.check_available()?;
        if name != LOOKUP_SUBJECT_EXTERNAL_ID {
            return Err(DataError::MissingCollection(format!("rpc/{name}")).into());
        }

        let subject_id = params.get("subject_id").cloned().unwrap_or(Value::Null);
        let guard = self.tables.read().unwrap_or_else(PoisonError::into_inner);
        let find = |table: &str| -> Option<Value> {
            guard
                .get(table)?
                .iter()
                .filter(|r| !is_deleted(r))
                .find(|r| {
                    let key = if table == IDENTITIES_TABLE { "subject_id" } else { "id" };
                    r.get(key).is_some_and(|v| values_equal(v, &subject_id))
                })
                .and_then(|r| r.get("external_id").cloned())
                .filter(|v| !v.is_null())
        };

        Ok(find(IDENTITIES_TABLE)
            .or_else(|| find(tables::SUBJECTS))
            .unwrap_or(Value::Null))
    }
}
