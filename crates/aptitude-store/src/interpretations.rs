//! Interpretation lookup backed by the `interpretations` collection.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use aptitude_core::catalog::normalize_code;
use aptitude_core::records::decode_rows;
use aptitude_core::traits::{tables, DataService, Filter, InterpretationSource};

/// One stored interpretation text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterpretationRow {
    #[serde(alias = "aptitud", alias = "codigo")]
    pub aptitude_code: String,
    #[serde(alias = "interpretation", alias = "texto")]
    pub text: String,
}

/// Reads interpretations from a data service, usually the caching repository.
pub struct TableInterpretations {
    data: Arc<dyn DataService>,
}

impl TableInterpretations {
    pub fn new(data: Arc<dyn DataService>) -> Self {
        Self { data }
    }
}

#[async_trait]
impl InterpretationSource for TableInterpretations {
    async fn interpretation(&self, aptitude_code: &str) -> Result<Option<String>> {
        let code = normalize_code(aptitude_code);
        let rows = self
            .data
            .select(
                tables::INTERPRETATIONS,
                &Filter::all().eq("aptitude_code", code.as_str()).page(0, 1),
            )
            .await?;
        let found: Vec<InterpretationRow> = decode_rows(tables::INTERPRETATIONS, rows)?;
        Ok(found
            .into_iter()
            .next()
            .map(|r| r.text)
            .filter(|t| !t.trim().is_empty()))
    }
}
