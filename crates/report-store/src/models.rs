use analysis_core::StoredRow;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Headline of the latest run for one ticker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct HistoryEntry {
    pub ticker: String,
    pub analysis_date: NaiveDate,
    pub score: i64,
    pub verdict: String,
    pub rejected: bool,
}

#[derive(Debug, Clone, FromRow)]
pub struct MetricRowRecord {
    pub metric_name: String,
    pub source: String,
    pub value: String,
    pub obtained_points: String,
    pub total_points: String,
    pub llm: Option<String>,
}

impl From<MetricRowRecord> for StoredRow {
    fn from(record: MetricRowRecord) -> Self {
        StoredRow {
            metric_name: record.metric_name,
            source: record.source,
            value: record.value,
            obtained_points: record.obtained_points,
            total_points: record.total_points,
            llm: record.llm,
        }
    }
}
