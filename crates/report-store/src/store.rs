use crate::db::ReportDb;
use crate::models::{HistoryEntry, MetricRowRecord};
use analysis_core::{Report, StoredReport, StoredRow};
use anyhow::{Context, Result};

pub struct ReportStore {
    db: ReportDb,
}

impl ReportStore {
    pub fn new(db: ReportDb) -> Self {
        Self { db }
    }

    pub fn db(&self) -> &ReportDb {
        &self.db
    }

    /// Persist a report, replacing whatever was stored for its ticker.
    pub async fn save_report(&self, report: &Report) -> Result<()> {
        let stored = StoredReport::from_report(report);
        let ticker = report.ticker.to_uppercase();

        let mut tx = self.db.pool().begin().await?;

        sqlx::query(
            r#"
            INSERT INTO analysis_history (ticker, analysis_date, score, verdict, rejected)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(ticker) DO UPDATE SET
                analysis_date = excluded.analysis_date,
                score = excluded.score,
                verdict = excluded.verdict,
                rejected = excluded.rejected,
                updated_at = CURRENT_TIMESTAMP
            "#,
        )
        .bind(&ticker)
        .bind(report.analysis_date)
        .bind(i64::from(report.final_score))
        .bind(report.verdict.to_label())
        .bind(report.rejected)
        .execute(&mut *tx)
        .await
        .context("failed to upsert analysis history")?;

        sqlx::query("DELETE FROM metric_rows WHERE ticker = ?")
            .bind(&ticker)
            .execute(&mut *tx)
            .await?;

        for (position, row) in stored.rows.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO metric_rows
                    (ticker, position, metric_name, source, value, obtained_points, total_points, llm)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&ticker)
            .bind(position as i64)
            .bind(&row.metric_name)
            .bind(&row.source)
            .bind(&row.value)
            .bind(&row.obtained_points)
            .bind(&row.total_points)
            .bind(&row.llm)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("failed to insert row {} for {}", row.metric_name, ticker))?;
        }

        tx.commit().await?;
        tracing::info!("Saved {} rows for {}", stored.rows.len(), ticker);
        Ok(())
    }

    /// Past runs, newest first. `search` filters by ticker substring.
    pub async fn list_history(&self, search: Option<&str>) -> Result<Vec<HistoryEntry>> {
        let pattern = match search.map(str::trim).filter(|s| !s.is_empty()) {
            Some(s) => format!("%{}%", s.to_uppercase()),
            None => "%".to_string(),
        };

        let entries = sqlx::query_as::<_, HistoryEntry>(
            r#"
            SELECT ticker, analysis_date, score, verdict, rejected
            FROM analysis_history
            WHERE ticker LIKE ?
            ORDER BY analysis_date DESC, ticker
            "#,
        )
        .bind(pattern)
        .fetch_all(self.db.pool())
        .await?;

        Ok(entries)
    }

    pub async fn load_report(&self, ticker: &str) -> Result<Option<StoredReport>> {
        let ticker = ticker.trim().to_uppercase();
        let records = sqlx::query_as::<_, MetricRowRecord>(
            r#"
            SELECT metric_name, source, value, obtained_points, total_points, llm
            FROM metric_rows
            WHERE ticker = ?
            ORDER BY position
            "#,
        )
        .bind(&ticker)
        .fetch_all(self.db.pool())
        .await?;

        if records.is_empty() {
            return Ok(None);
        }

        Ok(Some(StoredReport {
            ticker,
            rows: records.into_iter().map(StoredRow::from).collect(),
        }))
    }

    /// Remove a ticker's history entry and rows. Returns whether anything
    /// was stored for it.
    pub async fn delete_ticker(&self, ticker: &str) -> Result<bool> {
        let ticker = ticker.trim().to_uppercase();
        let mut tx = self.db.pool().begin().await?;

        let history = sqlx::query("DELETE FROM analysis_history WHERE ticker = ?")
            .bind(&ticker)
            .execute(&mut *tx)
            .await?;
        let rows = sqlx::query("DELETE FROM metric_rows WHERE ticker = ?")
            .bind(&ticker)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(history.rows_affected() + rows.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use analysis_core::{MetricKey, RawMetricValue, Verdict, DATE_ROW};
    use chrono::NaiveDate;
    use fundamental_analysis::score_report;

    async fn store() -> ReportStore {
        ReportStore::new(ReportDb::new("sqlite::memory:").await.unwrap())
    }

    fn report(ticker: &str, day: u32, moat: &str) -> Report {
        let as_of = NaiveDate::from_ymd_opt(2026, 3, day).unwrap();
        let mut report = score_report(
            ticker,
            as_of,
            vec![
                RawMetricValue::new(MetricKey::MarketCap, "Yahoo Finance", "1.20 Billion"),
                RawMetricValue::new(MetricKey::LatestExpiration, "Yahoo Finance", "2028-06-16"),
                RawMetricValue::new(MetricKey::MoatScore, "GuruFocus", moat),
                RawMetricValue::new(MetricKey::CurrentPrice, "Yahoo Finance", "$4.10"),
            ],
        );
        report.notes.risks = vec!["Dilution".into(), "Going concern".into()];
        report.notes.company_description = "Acme makes anvils.".into();
        report
    }

    #[tokio::test]
    async fn test_save_and_load_preserves_row_order() {
        let store = store().await;
        let original = report("ACME", 14, "4");
        store.save_report(&original).await.unwrap();

        let loaded = store.load_report("ACME").await.unwrap().unwrap();
        assert_eq!(loaded, StoredReport::from_report(&original));
        assert_eq!(loaded.rows[0].metric_name, "Market cap");
        assert_eq!(loaded.rows.last().unwrap().metric_name, DATE_ROW);
        assert_eq!(loaded.notes().risks, vec!["Dilution", "Going concern"]);
    }

    #[tokio::test]
    async fn test_save_replaces_previous_rows() {
        let store = store().await;
        store.save_report(&report("ACME", 10, "4")).await.unwrap();
        store.save_report(&report("ACME", 14, "1")).await.unwrap();

        let history = store.list_history(None).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].analysis_date, NaiveDate::from_ymd_opt(2026, 3, 14).unwrap());
        assert_eq!(history[0].score, 5);

        let loaded = store.load_report("ACME").await.unwrap().unwrap();
        let moat = loaded.rows.iter().find(|r| r.metric_name == "GuruFocus Moat Score").unwrap();
        assert_eq!(moat.value, "1");
        assert_eq!(loaded.rows.len(), StoredReport::from_report(&report("ACME", 14, "1")).rows.len());
    }

    #[tokio::test]
    async fn test_history_search_and_order() {
        let store = store().await;
        store.save_report(&report("ACME", 10, "4")).await.unwrap();
        store.save_report(&report("ACMX", 12, "3")).await.unwrap();
        store.save_report(&report("ZETA", 11, "2")).await.unwrap();

        let all: Vec<String> = store
            .list_history(None)
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.ticker)
            .collect();
        assert_eq!(all, vec!["ACMX", "ZETA", "ACME"]);

        let found = store.list_history(Some("acm")).await.unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].verdict, Verdict::Reject.to_label());
    }

    #[tokio::test]
    async fn test_delete_ticker() {
        let store = store().await;
        store.save_report(&report("ACME", 14, "4")).await.unwrap();

        assert!(store.delete_ticker("acme").await.unwrap());
        assert!(store.load_report("ACME").await.unwrap().is_none());
        assert!(store.list_history(None).await.unwrap().is_empty());
        assert!(!store.delete_ticker("ACME").await.unwrap());
    }
}
