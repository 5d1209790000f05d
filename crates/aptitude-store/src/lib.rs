//! aptitude-store: Data-service access for the aptitude pipeline.
//!
//! Provides the TTL cache and the caching repository every consumer reads
//! through, a PostgREST-style HTTP client, an in-memory store for fixtures
//! and tests, table-backed interpretations and report persistence, and
//! configuration loading.

pub mod cache;
pub mod config;
pub mod dashboard;
pub mod interpretations;
pub mod memory;
pub mod repository;
pub mod rest;
pub mod sink;

pub use cache::{CacheStats, TtlCache, DEFAULT_TTL};
pub use config::{
    create_data_service, create_repository, load_config, load_config_from, AptitudeConfig,
    DataConfig,
};
pub use dashboard::{dashboard_counts, DashboardCounts};
pub use interpretations::TableInterpretations;
pub use memory::MemoryDataService;
pub use repository::CachingRepository;
pub use rest::RestDataService;
pub use sink::TableReportSink;
