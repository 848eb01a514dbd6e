//! 取得済みレコードの絞り込み

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::types::Record;

/// 価格帯と日付範囲による絞り込み条件（指定した項目のみ評価）
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordFilter {
    /// 最低価格がこの値以上
    pub min_price_floor: Option<Decimal>,
    /// 最高価格がこの値以下
    pub max_price_ceiling: Option<Decimal>,
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
}

impl RecordFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_min_price_floor(mut self, floor: Decimal) -> Self {
        self.min_price_floor = Some(floor);
        self
    }

    pub fn with_max_price_ceiling(mut self, ceiling: Decimal) -> Self {
        self.max_price_ceiling = Some(ceiling);
        self
    }

    pub fn with_date_range(mut self, from: Option<NaiveDate>, to: Option<NaiveDate>) -> Self {
        self.date_from = from;
        self.date_to = to;
        self
    }

    /// 必要な値が読めないレコードは条件を満たさないものとする
    pub fn matches(&self, record: &Record) -> bool {
        if let Some(floor) = self.min_price_floor {
            match record.min_price_value() {
                Some(price) if price >= floor => {}
                _ => return false,
            }
        }
        if let Some(ceiling) = self.max_price_ceiling {
            match record.max_price_value() {
                Some(price) if price <= ceiling => {}
                _ => return false,
            }
        }
        if self.date_from.is_some() || self.date_to.is_some() {
            let Some(date) = record.date_value() else {
                return false;
            };
            if self.date_from.is_some_and(|from| date < from) {
                return false;
            }
            if self.date_to.is_some_and(|to| date > to) {
                return false;
            }
        }
        true
    }

    pub fn apply(&self, records: &[Record]) -> Vec<Record> {
        records.iter().filter(|r| self.matches(r)).cloned().collect()
    }
}
