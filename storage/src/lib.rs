//! Local durable storage: the SQLite-backed cache of fetched items and the
//! on-disk archive of assembled reports.

pub mod cache;
pub mod reports;


pub use cache::{CacheStore, CacheTtls};
pub use reports::{parse_report_timestamp, ArchivedReport, ReportArchive};
