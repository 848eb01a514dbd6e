//! 市場価格スクレイパーモジュール
//!
//! 依存ドロップダウンのフォーム（商品 → 州 → 市場 → 日付）を操作し、
//! 結果テーブルから価格を取り出す。

mod extract;
mod filter;
mod form;
mod scraper;
mod trend;
mod types;

pub use extract::extract_records;
pub use filter::RecordFilter;
pub use scraper::MarketScraper;
pub use trend::{classify, first_modal_price, percent_change, summarize};
pub use types::{
    format_form_date, normalize_price, parse_form_date, parse_price, DayResult, MarketQuery,
    QueryKey, Record, Trend, TrendSummary, FORM_DATE_FORMAT,
};
