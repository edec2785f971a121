use analysis_core::{MetricKey, MetricProvider, Payload, ProviderError, RetryPolicy};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::str::FromStr;

use crate::normalize_ticker;

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS moat_scores (
    ticker TEXT PRIMARY KEY,
    moat_number TEXT NOT NULL,
    updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
)";

/// Locally curated GuruFocus moat scores, keyed by upper-case ticker.
#[derive(Clone)]
pub struct MoatCache {
    pool: SqlitePool,
}

impl MoatCache {
    pub async fn connect(database_url: &str) -> Result<Self, sqlx::Error> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(2)
            .connect_with(options)
            .await?;
        Self::from_pool(pool).await
    }

    pub async fn from_pool(pool: SqlitePool) -> Result<Self, sqlx::Error> {
        sqlx::query(SCHEMA).execute(&pool).await?;
        Ok(Self { pool })
    }

    pub async fn lookup(&self, ticker: &str) -> Result<Option<String>, sqlx::Error> {
        let row = sqlx::query("SELECT moat_number FROM moat_scores WHERE ticker = ?")
            .bind(normalize_ticker(ticker))
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.get::<String, _>("moat_number")))
    }

    pub async fn store(&self, ticker: &str, moat_number: &str) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO moat_scores (ticker, moat_number) VALUES (?, ?)
             ON CONFLICT(ticker) DO UPDATE SET moat_number = excluded.moat_number,
                                               updated_at = CURRENT_TIMESTAMP",
        )
        .bind(normalize_ticker(ticker))
        .bind(moat_number.trim())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

/// First moat tier. A miss is an empty payload, never a zero score.
pub struct MoatCacheProvider {
    cache: Result<MoatCache, ProviderError>,
    retry: RetryPolicy,
}

impl MoatCacheProvider {
    pub fn new(cache: Result<MoatCache, ProviderError>) -> Self {
        Self {
            cache,
            retry: RetryPolicy::cache(),
        }
    }
}

#[async_trait]
impl MetricProvider for MoatCacheProvider {
    fn source(&self) -> &'static str {
        "Moat Cache"
    }

    async fn fetch(&self, ticker: &str) -> Result<Payload, ProviderError> {
        let cache = self.cache.as_ref().map_err(Clone::clone)?;
        let cached = self
            .retry
            .run("moat cache", |_| async move {
                cache
                    .lookup(ticker)
                    .await
                    .map_err(|e| ProviderError::Unavailable(format!("moat cache: {}", e)))
            })
            .await?;

        match cached {
            Some(score) if !score.trim().is_empty() && !score.trim().eq_ignore_ascii_case("n/a") => {
                tracing::info!("Moat score for {} found in cache: {}", ticker, score);
                Ok(Payload::new().with_metric(MetricKey::MoatScore, score))
            }
            _ => {
                tracing::info!("{} not in moat cache", ticker);
                Err(ProviderError::EmptyPayload)
            }
        }
    }
}
