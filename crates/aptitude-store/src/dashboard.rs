//! Cached collection counters for the dashboard.

use anyhow::Result;
use serde::{Deserialize, Serialize};

use aptitude_core::traits::{tables, Filter};

use crate::repository::CachingRepository;

/// Cache key for the dashboard counters, under the `stats:` prefix.
pub const DASHBOARD_KEY: &str = "stats:dashboard";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DashboardCounts {
    pub subjects: usize,
    pub results: usize,
    pub reports: usize,
}

/// Count live subjects, results, and reports.
///
/// The three selects are independent and issued concurrently against the
/// uncached service; the combined counts are cached under
/// [`DASHBOARD_KEY`] and cleared by writes to any of the three tables.
pub async fn dashboard_counts(repo: &CachingRepository) -> Result<DashboardCounts> {
    repo.get(DASHBOARD_KEY, || async {
        let ids = Filter::all().select_fields(&["id"]);
        let inner = repo.inner();
        let (subjects, results, reports) = futures::try_join!(
            inner.select(tables::SUBJECTS, &ids),
            inner.select(tables::RESULTS, &ids),
            inner.select(tables::REPORTS, &ids),
        )?;
        Ok(DashboardCounts {
            subjects: subjects.len(),
            results: results.len(),
            reports: reports.len(),
        })
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::DEFAULT_TTL;
    use crate::memory::MemoryDataService;
    use aptitude_core::model::RawResult;
    use aptitude_core::records::encode_row;
    use aptitude_core::traits::DataService;
    use std::sync::Arc;

    #[tokio::test]
    async fn counts_are_cached_until_a_write() {
        let memory = Arc::new(MemoryDataService::new());
        memory
            .seed(tables::RESULTS, &[RawResult::new("s1", "V"), RawResult::new("s1", "N")])
            .unwrap();
        let repo = CachingRepository::new(memory.clone(), DEFAULT_TTL);

        let counts = dashboard_counts(&repo).await.unwrap();
        assert_eq!(counts.results, 2);
        assert_eq!(counts.subjects, 0);
        dashboard_counts(&repo).await.unwrap();
        assert_eq!(memory.select_calls(), 3);

        let row = encode_row(&RawResult::new("s2", "E")).unwrap();
        repo.insert(tables::RESULTS, vec![row]).await.unwrap();

        let counts = dashboard_counts(&repo).await.unwrap();
        assert_eq!(counts.results, 3);
        assert_eq!(memory.select_calls(), 6);
    }

    #[tokio::test]
    async fn soft_deleted_rows_are_not_counted() {
        let memory = Arc::new(MemoryDataService::new());
        memory
            .seed(tables::RESULTS, &[RawResult::new("s1", "V")])
            .unwrap();
        let repo = CachingRepository::new(memory, DEFAULT_TTL);

        repo.soft_delete(tables::RESULTS, &Filter::all().eq("subject_id", "s1"))
            .await
            .unwrap();
        assert_eq!(dashboard_counts(&repo).await.unwrap().results, 0);
    }
}
