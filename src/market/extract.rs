//! 結果テーブルのHTMLから Record を取り出す

use ::scraper::{ElementRef, Html, Selector};
use tracing::{debug, info};

use crate::config::ColumnLayout;
use crate::error::ScraperError;
use crate::traits::RecordHooks;

use super::types::{normalize_price, Record};

/// テーブルHTMLを解析する
///
/// 先頭行はヘッダーとして読み飛ばす。セル数が足りない行と、市場名・最頻価格が
/// 空の行は黙って捨てる。残った行はサイト上の順序を保つ。
pub fn extract_records(
    table_html: &str,
    columns: &ColumnLayout,
    hooks: &dyn RecordHooks,
) -> Result<Vec<Record>, ScraperError> {
    let row_selector = selector("tr")?;
    let cell_selector = selector("td")?;

    let fragment = Html::parse_fragment(table_html);
    let rows: Vec<ElementRef> = fragment.select(&row_selector).collect();

    if rows.len() < 2 {
        debug!("データ行がありません (行数={})", rows.len());
        return Ok(Vec::new());
    }

    let mut malformed = 0usize;
    let mut invalid = 0usize;
    let mut records = Vec::with_capacity(rows.len() - 1);

    for row in rows.iter().skip(1) {
        let cells: Vec<String> = row.select(&cell_selector).map(cell_text).collect();
        if cells.len() < columns.min_cells {
            malformed += 1;
            continue;
        }

        let Some(record) = build_record(&cells, columns, hooks) else {
            malformed += 1;
            continue;
        };

        if record.is_valid() {
            records.push(record);
        } else {
            invalid += 1;
        }
    }

    if malformed > 0 || invalid > 0 {
        debug!("読み飛ばした行: セル不足={}, 必須項目なし={}", malformed, invalid);
    }

    let records = hooks.clean_records(records);
    info!("テーブルから{}件抽出", records.len());
    Ok(records)
}

/// 列位置がセル数を超える場合は `None`
fn build_record(
    cells: &[String],
    columns: &ColumnLayout,
    hooks: &dyn RecordHooks,
) -> Option<Record> {
    let cell = |idx: usize| cells.get(idx).cloned();
    let price = |idx: usize| {
        cells
            .get(idx)
            .map(|raw| normalize_price(&hooks.format_price(raw)))
    };

    Some(Record {
        market_center: cell(columns.market_center)?,
        commodity: cell(columns.commodity)?,
        variety: cell(columns.variety)?,
        grade: cell(columns.grade)?,
        min_price: price(columns.min_price)?,
        max_price: price(columns.max_price)?,
        modal_price: price(columns.modal_price)?,
        date: cell(columns.date)?,
    })
}

fn selector(css: &str) -> Result<Selector, ScraperError> {
    Selector::parse(css).map_err(|e| ScraperError::Extraction(format!("{}: {}", css, e)))
}

/// セル内テキスト（空白を1つに詰める）
fn cell_text(cell: ElementRef) -> String {
    cell.text()
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}
