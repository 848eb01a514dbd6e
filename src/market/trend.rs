//! 日別の最頻価格から価格推移を集計する

use chrono::Utc;
use rust_decimal::Decimal;

use super::types::{MarketQuery, Record, Trend, TrendSummary};

/// その日の代表価格（先頭行の最頻価格）
///
/// 先頭行の価格が数値でない場合は他の行を見ずに `None` を返す。
pub fn first_modal_price(records: &[Record]) -> Option<Decimal> {
    records.first()?.modal_price_value()
}

/// 先頭と末尾の比較で傾向を判定
pub fn classify(first: Decimal, last: Decimal) -> Trend {
    if last > first {
        Trend::Upward
    } else if last < first {
        Trend::Downward
    } else {
        Trend::Stable
    }
}

/// 変化率（%）。先頭が0なら0
pub fn percent_change(first: Decimal, last: Decimal) -> Decimal {
    if first.is_zero() {
        return Decimal::ZERO;
    }
    ((last - first) / first * Decimal::ONE_HUNDRED).round_dp(2)
}

/// 価格列（古い順）を集計する。価格が1件もなければ `None`
pub fn summarize(
    query: &MarketQuery,
    period_days: u32,
    prices: Vec<Decimal>,
) -> Option<TrendSummary> {
    let first = *prices.first()?;
    let latest = *prices.last()?;
    let highest = prices.iter().copied().max()?;
    let lowest = prices.iter().copied().min()?;
    let total: Decimal = prices.iter().copied().sum();
    let average = total / Decimal::from(prices.len());

    Some(TrendSummary {
        commodity: query.commodity.clone(),
        region: query.region.clone(),
        sub_region: query.sub_region.clone(),
        period_days,
        period: format!("Last {} days", period_days),
        data_points: prices.len(),
        highest,
        lowest,
        average,
        latest_price: latest,
        trend: classify(first, latest),
        percent_change: percent_change(first, latest),
        prices_chronological: prices,
        last_updated: Utc::now(),
    })
}
