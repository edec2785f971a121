//! SQLite persistence of analysis reports: a history table with one
//! headline row per ticker and the ordered report rows behind it.

pub mod db;
pub mod models;
pub mod store;

pub use db::ReportDb;
pub use models::{HistoryEntry, MetricRowRecord};
pub use store::ReportStore;
