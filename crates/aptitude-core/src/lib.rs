//! aptitude-core: Scoring, aggregation, audit, and batch reporting.
//!
//! This crate defines the data model, the aptitude catalog, the pure
//! scoring and aggregation pipeline, and the orchestration that runs it
//! against an external data service.

pub mod aggregate;
pub mod batch;
pub mod catalog;
pub mod comparative;
pub mod error;
pub mod integrity;
pub mod model;
pub mod parser;
pub mod records;
pub mod report;
pub mod scoring;
pub mod traits;
