use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::{MetricKey, NoteKind, QualitativeNotes, RawMetricValue, RecordError, Report};

/// Metric name of the row carrying the analysis date stamp.
pub const DATE_ROW: &str = "DATE";
const DATE_FORMAT: &str = "%Y-%m-%d";

/// One persisted row. Metric rows fill the first five columns; qualitative
/// rows carry their text in `llm` only.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StoredRow {
    pub metric_name: String,
    pub source: String,
    pub value: String,
    pub obtained_points: String,
    pub total_points: String,
    pub llm: Option<String>,
}

impl StoredRow {
    fn text(metric_name: &str, llm: String) -> Self {
        Self {
            metric_name: metric_name.to_string(),
            llm: Some(llm),
            ..Default::default()
        }
    }

    pub fn is_metric(&self) -> bool {
        self.llm.is_none()
    }
}

/// Persisted form of a report: ordered metric rows, qualitative rows and
/// the date stamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredReport {
    pub ticker: String,
    pub rows: Vec<StoredRow>,
}

impl StoredReport {
    pub fn from_report(report: &Report) -> Self {
        let mut rows: Vec<StoredRow> = report
            .metrics
            .iter()
            .map(|m| StoredRow {
                metric_name: m.raw.metric.to_label().to_string(),
                source: m.raw.source.clone(),
                value: m.raw.raw.clone(),
                obtained_points: m.score.obtained_cell(),
                total_points: m.score.max_cell(),
                llm: None,
            })
            .collect();

        let notes = &report.notes;
        rows.push(StoredRow::text(NoteKind::Risks.to_label(), notes.risks.join("\n")));
        rows.push(StoredRow::text(NoteKind::Rewards.to_label(), notes.rewards.join("\n")));
        rows.push(StoredRow::text(
            NoteKind::CompanyDescription.to_label(),
            notes.company_description.clone(),
        ));
        rows.push(StoredRow::text(
            NoteKind::ValueProposition.to_label(),
            notes.value_proposition.clone(),
        ));
        rows.push(StoredRow::text(NoteKind::MoatAnalysis.to_label(), notes.moat_analysis.clone()));
        rows.push(StoredRow::text(
            DATE_ROW,
            report.analysis_date.format(DATE_FORMAT).to_string(),
        ));

        Self {
            ticker: report.ticker.clone(),
            rows,
        }
    }

    pub fn analysis_date(&self) -> Result<NaiveDate, RecordError> {
        let raw = self
            .rows
            .iter()
            .find(|r| r.metric_name.eq_ignore_ascii_case(DATE_ROW))
            .and_then(|r| r.llm.as_deref())
            .ok_or(RecordError::MissingDate)?;
        NaiveDate::parse_from_str(raw.trim(), DATE_FORMAT)
            .map_err(|_| RecordError::InvalidDate(raw.to_string()))
    }

    /// Raw values of the metric rows, in stored order.
    pub fn raw_values(&self) -> Result<Vec<RawMetricValue>, RecordError> {
        self.rows
            .iter()
            .filter(|r| r.is_metric())
            .filter(|r| !r.metric_name.eq_ignore_ascii_case("total") && !r.metric_name.eq_ignore_ascii_case("total score"))
            .map(|r| {
                let metric: MetricKey = r
                    .metric_name
                    .parse()
                    .map_err(|_| RecordError::UnknownMetric(r.metric_name.clone()))?;
                Ok(RawMetricValue::new(metric, r.source.clone(), r.value.clone()))
            })
            .collect()
    }

    pub fn notes(&self) -> QualitativeNotes {
        let mut notes = QualitativeNotes::default();
        for row in self.rows.iter().filter(|r| !r.is_metric()) {
            let text = row.llm.clone().unwrap_or_default();
            match NoteKind::from_label(&row.metric_name) {
                Some(NoteKind::Risks) => notes.risks = split_lines(&text),
                Some(NoteKind::Rewards) => notes.rewards = split_lines(&text),
                Some(NoteKind::CompanyDescription) => notes.company_description = text,
                Some(NoteKind::ValueProposition) => notes.value_proposition = text,
                Some(NoteKind::MoatAnalysis) => notes.moat_analysis = text,
                None => {}
            }
        }
        notes
    }
}

fn split_lines(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}
