use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScreenerConfig {
    // LLM grounded search
    pub gemini_api_key: String,
    pub gemini_model: String,          // gemini-2.5-flash

    // Market data
    pub alpha_vantage_api_key: String,
    pub polygon_api_key: String,
    pub polygon_rate_limit: usize,     // requests per minute, free tier = 5

    // Residential proxy for the scrape tiers, credentials embedded
    pub proxy_url: Option<String>,

    // Database (moat cache + report history)
    pub database_url: String,

    // Fan-out and timeouts
    pub max_concurrent_jobs: usize,    // 8
    pub provider_timeout_secs: u64,    // 60, one scrape / API request
    pub llm_timeout_secs: u64,         // 90, one Gemini request
}

impl ScreenerConfig {
    /// Missing API keys are not an error here; the affected tiers report
    /// themselves unconfigured and the chain moves on.
    pub fn from_env() -> Result<Self> {
        let config = Self {
            gemini_api_key: env::var("GEMINI_API_KEY").unwrap_or_default(),
            gemini_model: env::var("GEMINI_MODEL")
                .unwrap_or_else(|_| "gemini-2.5-flash".to_string()),

            alpha_vantage_api_key: env::var("ALPHA_VANTAGE_API_KEY").unwrap_or_default(),
            polygon_api_key: env::var("POLYGON_API_KEY").unwrap_or_default(),
            polygon_rate_limit: env::var("POLYGON_RATE_LIMIT")
                .unwrap_or_else(|_| "5".to_string())
                .parse()
                .context("POLYGON_RATE_LIMIT must be a positive integer")?,

            proxy_url: env::var("PROXY_URL").ok().filter(|u| !u.trim().is_empty()),

            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite:leaps_screener.db".to_string()),

            max_concurrent_jobs: env::var("MAX_CONCURRENT_JOBS")
                .unwrap_or_else(|_| "8".to_string())
                .parse()
                .context("MAX_CONCURRENT_JOBS must be a positive integer")?,
            provider_timeout_secs: env::var("PROVIDER_TIMEOUT_SECS")
                .unwrap_or_else(|_| "60".to_string())
                .parse()
                .context("PROVIDER_TIMEOUT_SECS must be a number of seconds")?,
            llm_timeout_secs: env::var("LLM_TIMEOUT_SECS")
                .unwrap_or_else(|_| "90".to_string())
                .parse()
                .context("LLM_TIMEOUT_SECS must be a number of seconds")?,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_jobs == 0 {
            anyhow::bail!("MAX_CONCURRENT_JOBS must be at least 1");
        }
        if self.polygon_rate_limit == 0 {
            anyhow::bail!("POLYGON_RATE_LIMIT must be at least 1");
        }
        if self.provider_timeout_secs == 0 || self.llm_timeout_secs == 0 {
            anyhow::bail!("timeouts must be at least one second");
        }
        Ok(())
    }

    pub fn provider_timeout(&self) -> Duration {
        Duration::from_secs(self.provider_timeout_secs)
    }

    pub fn llm_timeout(&self) -> Duration {
        Duration::from_secs(self.llm_timeout_secs)
    }

    /// Names of the credentials that are not set, for the startup log.
    pub fn missing_keys(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.gemini_api_key.is_empty() {
            missing.push("GEMINI_API_KEY");
        }
        if self.alpha_vantage_api_key.is_empty() {
            missing.push("ALPHA_VANTAGE_API_KEY");
        }
        if self.polygon_api_key.is_empty() {
            missing.push("POLYGON_API_KEY");
        }
        if self.proxy_url.is_none() {
            missing.push("PROXY_URL");
        }
        missing
    }
}

impl Default for ScreenerConfig {
    fn default() -> Self {
        Self {
            gemini_api_key: String::new(),
            gemini_model: "gemini-2.5-flash".to_string(),
            alpha_vantage_api_key: String::new(),
            polygon_api_key: String::new(),
            polygon_rate_limit: 5,
            proxy_url: None,
            database_url: "sqlite:leaps_screener.db".to_string(),
            max_concurrent_jobs: 8,
            provider_timeout_secs: 60,
            llm_timeout_secs: 90,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = ScreenerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.llm_timeout(), Duration::from_secs(90));
        assert_eq!(
            config.missing_keys(),
            vec!["GEMINI_API_KEY", "ALPHA_VANTAGE_API_KEY", "POLYGON_API_KEY", "PROXY_URL"]
        );
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let config = ScreenerConfig {
            max_concurrent_jobs: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
