use analysis_core::{Bucket, Report, UNRESOLVED};
use report_store::HistoryEntry;
use std::fmt::Write;

fn cell(text: &str, width: usize) -> String {
    let mut out: String = text.chars().take(width).collect();
    if text.chars().count() > width {
        out.pop();
        out.push('…');
    }
    format!("{:<width$}", out, width = width)
}

pub fn report_table(report: &Report) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{} | {} | score {}/{} | {}",
        report.ticker,
        report.analysis_date,
        report.final_score,
        report.max_score(),
        report.verdict
    );
    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "{} {} {} {:>8} {:>5}",
        cell("Metric", 36),
        cell("Source", 16),
        cell("Value", 28),
        "Points",
        "Max"
    );
    let _ = writeln!(out, "{}", "-".repeat(97));
    for m in &report.metrics {
        let _ = writeln!(
            out,
            "{} {} {} {:>8} {:>5}",
            cell(m.raw.metric.to_label(), 36),
            cell(&m.raw.source, 16),
            cell(&m.raw.raw, 28),
            m.score.obtained_cell(),
            m.score.max_cell()
        );
    }

    let _ = writeln!(out);
    for bucket in Bucket::ALL {
        let _ = writeln!(out, "{:<40} {:>3}", bucket.to_label(), report.buckets.get(bucket));
    }
    let rejections: Vec<&str> = report.rejections().map(|k| k.to_label()).collect();
    if !rejections.is_empty() {
        let _ = writeln!(out, "Rejected by: {}", rejections.join(", "));
    }

    let notes = &report.notes;
    for (title, text) in [
        ("Company Description", &notes.company_description),
        ("Value Proposition", &notes.value_proposition),
        ("Moat Analysis", &notes.moat_analysis),
    ] {
        if text != UNRESOLVED && !text.is_empty() {
            let _ = writeln!(out, "\n{}:\n{}", title, text);
        }
    }
    for (title, items) in [("Rewards", &notes.rewards), ("Risks", &notes.risks)] {
        if !items.is_empty() {
            let _ = writeln!(out, "\n{}:", title);
            for item in items {
                let _ = writeln!(out, "  - {}", item);
            }
        }
    }
    out
}

pub fn history_table(entries: &[HistoryEntry]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{:<8} {:<12} {:>5}  {}", "Ticker", "Date", "Score", "Verdict");
    for e in entries {
        let _ = writeln!(
            out,
            "{:<8} {:<12} {:>5}  {}",
            e.ticker,
            e.analysis_date.to_string(),
            e.score,
            e.verdict
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use analysis_core::{BucketTotals, MetricKey, QualitativeNotes, RawMetricValue, ScoreResult, ScoredMetric, Verdict};
    use chrono::NaiveDate;

    #[test]
    fn test_cell_truncates() {
        assert_eq!(cell("abc", 5), "abc  ");
        assert_eq!(cell("abcdefgh", 5), "abcd…");
    }

    #[test]
    fn test_report_table_lists_rows_and_rejections() {
        let report = Report {
            ticker: "ACME".into(),
            analysis_date: NaiveDate::from_ymd_opt(2026, 3, 14).unwrap(),
            metrics: vec![ScoredMetric {
                raw: RawMetricValue::new(MetricKey::MarketCap, "Yahoo Finance", "1.20 Trillion"),
                score: ScoreResult {
                    metric: MetricKey::MarketCap,
                    obtained: 0,
                    max: 5,
                    rejected: true,
                },
            }],
            buckets: BucketTotals::default(),
            final_score: 0,
            verdict: Verdict::Rejected,
            rejected: true,
            notes: QualitativeNotes {
                risks: vec!["Dilution".into()],
                ..Default::default()
            },
        };
        let table = report_table(&report);
        assert!(table.contains("1.20 Trillion"));
        assert!(table.contains("rejected"));
        assert!(table.contains("Rejected by: Market cap"));
        assert!(table.contains("  - Dilution"));
        assert!(!table.contains("Company Description"));
    }
}
