//! aptitude-report: Rendering and file output for aptitude reports.
//!
//! Turns [`SubjectReport`](aptitude_core::report::SubjectReport)s and
//! comparative analyses into self-contained HTML documents, and provides a
//! report sink that writes JSON and HTML files into a directory.

pub mod html;
pub mod sink;

pub use html::{generate_comparison_html, generate_html, write_comparison_html, write_html_report};
pub use sink::DirectoryReportSink;
