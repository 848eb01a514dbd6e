//! 農産物市場価格スクレイパーライブラリ
//!
//! - Agmarknet の依存ドロップダウンフォームをヘッドレスブラウザで操作
//! - 1日分の価格テーブルを取得（参照切れのみリトライ）
//! - 最新データの探索と価格推移の集計
//!
//! # 使用例
//!
//! ```rust,ignore
//! use market_scraper::{MarketQuery, MarketScraper, ScraperConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let scraper = MarketScraper::new(ScraperConfig::from_env());
//!     let query = MarketQuery::new("Onion", "Maharashtra", "Pune");
//!
//!     let records = scraper.find_most_recent_data(&query, 7).await.unwrap();
//!     println!("Records: {}", records.len());
//!
//!     if let Some(trend) = scraper.compute_trend(&query, 5).await.unwrap() {
//!         println!("Trend: {:?} ({}%)", trend.trend, trend.percent_change);
//!     }
//! }
//! ```
//!
//! # tower Service 使用例
//!
//! ```rust,ignore
//! use market_scraper::{MarketRequest, MarketService, QueryKey, ScraperConfig};
//! use tower::Service;
//!
//! #[tokio::main]
//! async fn main() {
//!     let mut service = MarketService::new(ScraperConfig::default()).unwrap();
//!     let key = QueryKey::new("Onion", "Maharashtra", "Pune", 1);
//!     let response = service.call(MarketRequest::Day(key)).await.unwrap();
//!     println!("{:?}", response);
//! }
//! ```

pub mod browser;
pub mod config;
pub mod error;
pub mod market;
pub mod service;
pub mod traits;

#[cfg(test)]
mod fake;

// 主要な型をリエクスポート
pub use browser::{ChromeLauncher, ChromeSession};
pub use config::{ColumnLayout, FormLayout, ScraperConfig};
pub use error::ScraperError;
pub use service::{MarketRequest, MarketResponse, MarketService};
pub use traits::{FormSession, NoopHooks, RecordHooks, SessionLauncher};

pub use market::{
    DayResult, MarketQuery, MarketScraper, QueryKey, Record, RecordFilter, Trend, TrendSummary,
};
