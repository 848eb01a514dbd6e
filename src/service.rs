use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::sync::Semaphore;
use tower::Service;
use tracing::{debug, info};

use crate::browser::ChromeLauncher;
use crate::config::ScraperConfig;
use crate::error::ScraperError;
use crate::market::{MarketQuery, MarketScraper, QueryKey, Record, TrendSummary};
use crate::traits::SessionLauncher;

/// スクレイピングリクエスト
#[derive(Debug, Clone)]
pub enum MarketRequest {
    /// 1日分
    Day(QueryKey),
    /// 最新データの探索
    Latest {
        query: MarketQuery,
        max_days_to_check: u32,
    },
    /// 価格推移
    Trend { query: MarketQuery, days: u32 },
    Commodities,
    Regions,
    SubRegions { region: String },
}

impl MarketRequest {
    fn label(&self) -> &'static str {
        match self {
            MarketRequest::Day(_) => "day",
            MarketRequest::Latest { .. } => "latest",
            MarketRequest::Trend { .. } => "trend",
            MarketRequest::Commodities => "commodities",
            MarketRequest::Regions => "regions",
            MarketRequest::SubRegions { .. } => "sub_regions",
        }
    }
}

/// スクレイピング結果
#[derive(Debug)]
pub enum MarketResponse {
    Records(Vec<Record>),
    Trend(Option<TrendSummary>),
    Options(Vec<String>),
}

/// tower::Serviceを実装した市場価格サービス
///
/// 同時に開くブラウザセッション数をセマフォで制限する。
pub struct MarketService<L: SessionLauncher = ChromeLauncher> {
    scraper: Arc<MarketScraper<L>>,
    permits: Arc<Semaphore>,
}

impl<L: SessionLauncher> Clone for MarketService<L> {
    fn clone(&self) -> Self {
        Self {
            scraper: Arc::clone(&self.scraper),
            permits: Arc::clone(&self.permits),
        }
    }
}

impl MarketService<ChromeLauncher> {
    pub fn new(config: ScraperConfig) -> Result<Self, ScraperError> {
        config.validate()?;
        Ok(Self::from_scraper(MarketScraper::new(config)))
    }
}

impl<L: SessionLauncher> MarketService<L> {
    pub fn from_scraper(scraper: MarketScraper<L>) -> Self {
        let limit = scraper.config().session_limit();
        Self {
            scraper: Arc::new(scraper),
            permits: Arc::new(Semaphore::new(limit)),
        }
    }

    pub fn scraper(&self) -> &MarketScraper<L> {
        &self.scraper
    }
}

impl<L> Service<MarketRequest> for MarketService<L>
where
    L: SessionLauncher + 'static,
{
    type Response = MarketResponse;
    type Error = ScraperError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: MarketRequest) -> Self::Future {
        info!("リクエスト受信: {}", req.label());
        let scraper = Arc::clone(&self.scraper);
        let permits = Arc::clone(&self.permits);

        Box::pin(async move {
            // 1リクエストが同時に使うセッションは1つ
            let _permit = permits
                .acquire_owned()
                .await
                .map_err(|_| ScraperError::Cancelled)?;
            debug!("セッション枠を確保: {}", req.label());

            let response = match req {
                MarketRequest::Day(key) => {
                    MarketResponse::Records(scraper.fetch_one_day(&key).await.into_result()?)
                }
                MarketRequest::Latest {
                    query,
                    max_days_to_check,
                } => MarketResponse::Records(
                    scraper
                        .find_most_recent_data(&query, max_days_to_check)
                        .await?,
                ),
                MarketRequest::Trend { query, days } => {
                    MarketResponse::Trend(scraper.compute_trend(&query, days).await?)
                }
                MarketRequest::Commodities => {
                    MarketResponse::Options(scraper.available_commodities().await?)
                }
                MarketRequest::Regions => {
                    MarketResponse::Options(scraper.available_regions().await?)
                }
                MarketRequest::SubRegions { region } => {
                    MarketResponse::Options(scraper.sub_regions_for(&region).await?)
                }
            };

            Ok(response)
        })
    }
}
