//! Concrete metric providers, one module per upstream.

pub mod alpha_vantage;
pub mod finviz;
pub mod gemini;
pub mod gurufocus;
pub mod http;
pub mod moat_cache;
pub mod unusual_whales;
pub mod yahoo_finance;

pub use alpha_vantage::{AlphaVantageClient, AlphaVantageEpsProvider};
pub use finviz::FinvizProvider;
pub use gemini::{
    BusinessProfileProvider, GeminiClient, GeminiIvRankProvider, GeminiMoatProvider, RiskRewardsProvider,
};
pub use gurufocus::GuruFocusMoatProvider;
pub use moat_cache::{MoatCache, MoatCacheProvider};
pub use unusual_whales::UnusualWhalesProvider;
pub use yahoo_finance::{YahooFinanceClient, YahooFundamentalsProvider};

/// Upstreams key everything by the trimmed upper-case symbol.
pub fn normalize_ticker(ticker: &str) -> String {
    ticker.trim().to_uppercase()
}
