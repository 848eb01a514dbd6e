//! 市場価格スクレイパー関連の型定義

use std::str::FromStr;

use chrono::{DateTime, Duration as ChronoDuration, Local, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::ScraperError;

/// フォームの日付欄が受け付ける形式 (例: 05-Oct-2026)
pub const FORM_DATE_FORMAT: &str = "%d-%b-%Y";

/// 日数を含まない検索条件
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MarketQuery {
    pub commodity: String,
    pub region: String,
    pub sub_region: String,
}

impl MarketQuery {
    pub fn new(
        commodity: impl Into<String>,
        region: impl Into<String>,
        sub_region: impl Into<String>,
    ) -> Self {
        Self {
            commodity: commodity.into(),
            region: region.into(),
            sub_region: sub_region.into(),
        }
    }

    pub fn for_day(&self, days_back: u32) -> QueryKey {
        QueryKey {
            commodity: self.commodity.clone(),
            region: self.region.clone(),
            sub_region: self.sub_region.clone(),
            days_back,
        }
    }
}

/// 1回の取得を識別するキー
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueryKey {
    pub commodity: String,
    pub region: String,
    pub sub_region: String,
    pub days_back: u32,
}

impl QueryKey {
    pub fn new(
        commodity: impl Into<String>,
        region: impl Into<String>,
        sub_region: impl Into<String>,
        days_back: u32,
    ) -> Self {
        MarketQuery::new(commodity, region, sub_region).for_day(days_back)
    }

    /// `days_back` が 1..=max に収まっているか
    pub fn validate(&self, max_days_back: u32) -> Result<(), ScraperError> {
        if self.days_back == 0 || self.days_back > max_days_back {
            return Err(ScraperError::InvalidRange {
                days: self.days_back,
                max: max_days_back,
            });
        }
        Ok(())
    }

    pub fn target_date_from(&self, today: NaiveDate) -> NaiveDate {
        today - ChronoDuration::days(i64::from(self.days_back))
    }

    /// 日付欄へ設定する文字列（ローカル日付基準）
    pub fn form_date(&self) -> String {
        format_form_date(self.target_date_from(Local::now().date_naive()))
    }
}

pub fn format_form_date(date: NaiveDate) -> String {
    date.format(FORM_DATE_FORMAT).to_string()
}

pub fn parse_form_date(text: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(text.trim(), FORM_DATE_FORMAT).ok()
}

/// 市場価格1件
///
/// 価格はカンマを除去したサイト上の表記のまま保持する。数値が必要な箇所では
/// `*_value()` で `Decimal` に変換し、変換できない値は呼び出し側で読み飛ばす。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub market_center: String,
    pub commodity: String,
    pub variety: String,
    pub grade: String,
    pub min_price: String,
    pub max_price: String,
    pub modal_price: String,
    /// サイト表記の日付 (DD-MMM-YYYY)
    pub date: String,
}

impl Record {
    /// 市場名と最頻価格が空でないこと
    pub fn is_valid(&self) -> bool {
        !self.market_center.trim().is_empty() && !self.modal_price.trim().is_empty()
    }

    pub fn min_price_value(&self) -> Option<Decimal> {
        parse_price(&self.min_price)
    }

    pub fn max_price_value(&self) -> Option<Decimal> {
        parse_price(&self.max_price)
    }

    pub fn modal_price_value(&self) -> Option<Decimal> {
        parse_price(&self.modal_price)
    }

    pub fn date_value(&self) -> Option<NaiveDate> {
        parse_form_date(&self.date)
    }
}

/// 桁区切りを除去する
pub fn normalize_price(raw: &str) -> String {
    raw.trim().chars().filter(|c| *c != ',').collect()
}

pub fn parse_price(text: &str) -> Option<Decimal> {
    let normalized = normalize_price(text);
    if normalized.is_empty() {
        return None;
    }
    Decimal::from_str(&normalized).ok()
}

/// 1日分の取得結果
///
/// `Data(vec![])` は「その日の取引なし」、`Failed` は自動操作そのものの失敗。
#[derive(Debug)]
pub enum DayResult {
    Data(Vec<Record>),
    Failed(ScraperError),
}

impl DayResult {
    pub fn is_failure(&self) -> bool {
        matches!(self, DayResult::Failed(_))
    }

    pub fn records(&self) -> Option<&[Record]> {
        match self {
            DayResult::Data(records) => Some(records),
            DayResult::Failed(_) => None,
        }
    }

    pub fn into_result(self) -> Result<Vec<Record>, ScraperError> {
        match self {
            DayResult::Data(records) => Ok(records),
            DayResult::Failed(e) => Err(e),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Upward,
    Downward,
    Stable,
}

/// 期間内の価格推移の集計（保存はしない）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendSummary {
    pub commodity: String,
    pub region: String,
    pub sub_region: String,
    pub period_days: u32,
    /// 表示用ラベル ("Last N days")
    pub period: String,
    /// 古い順
    pub prices_chronological: Vec<Decimal>,
    pub data_points: usize,
    pub highest: Decimal,
    pub lowest: Decimal,
    pub average: Decimal,
    pub latest_price: Decimal,
    pub trend: Trend,
    /// 小数第2位で丸めた変化率
    pub percent_change: Decimal,
    pub last_updated: DateTime<Utc>,
}
