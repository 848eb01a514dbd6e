//! 市場価格スクレイパー実装
//!
//! 1日分の取得を参照切れに限ってリトライし、複数日の取得を組み合わせて
//! 最新データの探索と価格推移の集計を行う。

use std::sync::Arc;

use base64::Engine;
use futures::StreamExt;
use rust_decimal::Decimal;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::browser::ChromeLauncher;
use crate::config::{ScraperConfig, MAX_CONCURRENT_SESSIONS};
use crate::error::ScraperError;
use crate::traits::{FormSession, NoopHooks, RecordHooks, SessionLauncher};

use super::extract::extract_records;
use super::form;
use super::trend::{first_modal_price, summarize};
use super::types::{DayResult, MarketQuery, QueryKey, Record, TrendSummary};

/// 市場価格スクレイパー
///
/// 状態を持たない。セッションは試行ごとに起動し、どの経路でも必ず閉じる。
pub struct MarketScraper<L: SessionLauncher = ChromeLauncher> {
    config: ScraperConfig,
    launcher: L,
    hooks: Arc<dyn RecordHooks>,
}

impl MarketScraper<ChromeLauncher> {
    /// Chrome を使うスクレイパーを作成
    pub fn new(config: ScraperConfig) -> Self {
        let launcher = ChromeLauncher::new(config.clone());
        Self::with_launcher(config, launcher)
    }
}

impl<L: SessionLauncher> MarketScraper<L> {
    pub fn with_launcher(config: ScraperConfig, launcher: L) -> Self {
        Self {
            config,
            launcher,
            hooks: Arc::new(NoopHooks),
        }
    }

    pub fn with_hooks(mut self, hooks: impl RecordHooks + 'static) -> Self {
        self.hooks = Arc::new(hooks);
        self
    }

    pub fn config(&self) -> &ScraperConfig {
        &self.config
    }

    /// 1日分を取得する
    ///
    /// 失敗は `DayResult::Failed` として返し、呼び出し元へエラーを送出しない。
    /// テーブルが現れない日は取引なしとして空の `Data` を返す。
    pub async fn fetch_one_day(&self, key: &QueryKey) -> DayResult {
        if let Err(e) = key.validate(self.config.max_days_back) {
            warn!("不正な日数: {}", e);
            self.hooks.log_request(key, false, 0);
            return DayResult::Failed(e);
        }

        info!(
            "データ取得開始: {} / {} / {} ({}日前)",
            key.commodity, key.region, key.sub_region, key.days_back
        );

        match self.fetch_with_retry(key).await {
            Ok(records) => {
                self.hooks.log_request(key, true, records.len());
                DayResult::Data(records)
            }
            Err(e) => {
                error!("データ取得失敗 ({}日前): {}", key.days_back, e);
                self.hooks.log_request(key, false, 0);
                DayResult::Failed(e)
            }
        }
    }

    /// 参照切れのみリトライする（最大 max_attempts 回）
    async fn fetch_with_retry(&self, key: &QueryKey) -> Result<Vec<Record>, ScraperError> {
        let max_attempts = self.config.max_attempts.max(1);

        for attempt in 1..=max_attempts {
            // 起動失敗は同じ試行内でやり直さない
            let mut session = self.launcher.launch().await?;

            let outcome = self.run_attempt(&mut session, key).await;
            if outcome.is_err() && self.config.debug {
                self.dump_screenshot(&mut session).await;
            }
            session.close().await;

            match outcome {
                Ok(records) => return Ok(records),
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    warn!(
                        "参照切れ (試行 {}/{})、{:?}後に新しいセッションで再試行: {}",
                        attempt, max_attempts, self.config.stale_backoff, e
                    );
                    sleep(self.config.stale_backoff).await;
                }
                Err(e) => {
                    if e.is_retryable() {
                        error!("{}回試行しても参照切れが解消しませんでした", max_attempts);
                    }
                    return Err(e);
                }
            }
        }

        Err(ScraperError::StaleElement(format!(
            "{}回の試行で取得できませんでした",
            max_attempts
        )))
    }

    async fn run_attempt(
        &self,
        session: &mut L::Session,
        key: &QueryKey,
    ) -> Result<Vec<Record>, ScraperError> {
        form::submit_query(session, &self.config, key).await?;

        let table = session
            .table_html(&self.config.form.results_table, self.config.table_timeout)
            .await?;

        match table {
            Some(html) => extract_records(&html, &self.config.columns, self.hooks.as_ref()),
            None => {
                info!(
                    "結果テーブルなし ({}日前): 取引なしとして扱います",
                    key.days_back
                );
                Ok(Vec::new())
            }
        }
    }

    async fn dump_screenshot(&self, session: &mut L::Session) {
        if let Some(png) = session.screenshot().await {
            let encoded = base64::engine::general_purpose::STANDARD.encode(&png);
            debug!("Failure screenshot: data:image/png;base64,{}", encoded);
        }
    }

    /// 1日前から遡って最初にデータがある日のレコードを返す
    pub async fn find_most_recent_data(
        &self,
        query: &MarketQuery,
        max_days_to_check: u32,
    ) -> Result<Vec<Record>, ScraperError> {
        self.find_most_recent_data_until(query, max_days_to_check, &CancellationToken::new())
            .await
    }

    /// キャンセル可能な `find_most_recent_data`（日ごとの取得の合間に確認）
    ///
    /// 取得失敗が起きた時点で探索を打ち切り、`DayFailed` を返す。
    pub async fn find_most_recent_data_until(
        &self,
        query: &MarketQuery,
        max_days_to_check: u32,
        cancel: &CancellationToken,
    ) -> Result<Vec<Record>, ScraperError> {
        self.check_range(max_days_to_check)?;
        info!(
            "最新データ探索: {} / {} / {} (最大{}日)",
            query.commodity, query.region, query.sub_region, max_days_to_check
        );

        for days_back in 1..=max_days_to_check {
            if cancel.is_cancelled() {
                info!("最新データ探索をキャンセル ({}日前の手前)", days_back);
                return Err(ScraperError::Cancelled);
            }

            match self.fetch_one_day(&query.for_day(days_back)).await {
                DayResult::Data(records) if !records.is_empty() => {
                    info!("{}日前のデータを発見 ({}件)", days_back, records.len());
                    return Ok(records);
                }
                DayResult::Data(_) => debug!("{}日前はデータなし", days_back),
                DayResult::Failed(e) => {
                    return Err(ScraperError::DayFailed {
                        days_back,
                        source: Box::new(e),
                    })
                }
            }
        }

        info!("{}日以内にデータが見つかりませんでした", max_days_to_check);
        Ok(Vec::new())
    }

    /// 過去 `days` 日の価格推移を集計する
    pub async fn compute_trend(
        &self,
        query: &MarketQuery,
        days: u32,
    ) -> Result<Option<TrendSummary>, ScraperError> {
        self.compute_trend_until(query, days, &CancellationToken::new())
            .await
    }

    /// キャンセル可能な `compute_trend`
    ///
    /// 古い日から順に取得し、各日の先頭行の最頻価格を使う。価格が1件も
    /// 集まらなければ `Ok(None)`、途中で取得失敗があれば `DayFailed`。
    pub async fn compute_trend_until(
        &self,
        query: &MarketQuery,
        days: u32,
        cancel: &CancellationToken,
    ) -> Result<Option<TrendSummary>, ScraperError> {
        self.check_range(days)?;
        info!(
            "価格推移を集計: {} / {} / {} (過去{}日)",
            query.commodity, query.region, query.sub_region, days
        );

        let mut prices: Vec<Decimal> = Vec::new();
        for days_back in (1..=days).rev() {
            if cancel.is_cancelled() {
                info!("価格推移の集計をキャンセル ({}日前の手前)", days_back);
                return Err(ScraperError::Cancelled);
            }

            let records = match self.fetch_one_day(&query.for_day(days_back)).await {
                DayResult::Data(records) => records,
                DayResult::Failed(e) => {
                    return Err(ScraperError::DayFailed {
                        days_back,
                        source: Box::new(e),
                    })
                }
            };

            match first_modal_price(&records) {
                Some(price) => prices.push(price),
                None if records.is_empty() => debug!("{}日前はデータなし", days_back),
                None => warn!(
                    "{}日前の価格を解析できません: {:?}",
                    days_back, records[0].modal_price
                ),
            }
        }

        let summary = summarize(query, days, prices);
        match &summary {
            Some(s) => info!(
                "推移: {:?} {}% ({}件)",
                s.trend, s.percent_change, s.data_points
            ),
            None => warn!("期間内に価格データがないため推移を算出できません"),
        }
        Ok(summary)
    }

    /// 複数条件の推移を並行して集計する（同時実行数は `limit` まで、結果は入力順）
    pub async fn compute_trends(
        &self,
        queries: &[MarketQuery],
        days: u32,
        limit: usize,
    ) -> Vec<Result<Option<TrendSummary>, ScraperError>> {
        let limit = limit.clamp(1, MAX_CONCURRENT_SESSIONS);
        futures::stream::iter(queries)
            .map(|query| self.compute_trend(query, days))
            .buffered(limit)
            .collect()
            .await
    }

    /// 商品の選択肢一覧
    pub async fn available_commodities(&self) -> Result<Vec<String>, ScraperError> {
        info!("商品一覧を取得中...");
        self.list_field(&self.config.form.commodity_field).await
    }

    /// 州の選択肢一覧
    pub async fn available_regions(&self) -> Result<Vec<String>, ScraperError> {
        info!("州一覧を取得中...");
        self.list_field(&self.config.form.region_field).await
    }

    /// 州を選択した後の市場の選択肢一覧
    pub async fn sub_regions_for(&self, region: &str) -> Result<Vec<String>, ScraperError> {
        info!("{} の市場一覧を取得中...", region);
        let mut session = self.launcher.launch().await?;
        let result = self.sub_regions_in(&mut session, region).await;
        session.close().await;

        if let Ok(markets) = &result {
            info!("{} の市場: {}件", region, markets.len());
        }
        result
    }

    async fn list_field(&self, field: &str) -> Result<Vec<String>, ScraperError> {
        let mut session = self.launcher.launch().await?;
        let result = self.options_in(&mut session, field).await;
        session.close().await;
        result
    }

    async fn options_in(
        &self,
        session: &mut L::Session,
        field: &str,
    ) -> Result<Vec<String>, ScraperError> {
        session.navigate(&self.config.base_url).await?;
        form::list_options(session, &self.config, field).await
    }

    async fn sub_regions_in(
        &self,
        session: &mut L::Session,
        region: &str,
    ) -> Result<Vec<String>, ScraperError> {
        session.navigate(&self.config.base_url).await?;
        form::select_region(session, &self.config, region).await?;
        form::list_options(session, &self.config, &self.config.form.sub_region_field).await
    }

    fn check_range(&self, days: u32) -> Result<(), ScraperError> {
        if days == 0 || days > self.config.max_days_back {
            return Err(ScraperError::InvalidRange {
                days,
                max: self.config.max_days_back,
            });
        }
        Ok(())
    }
}
