//! 依存ドロップダウンフォームの操作手順

use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::config::ScraperConfig;
use crate::error::ScraperError;
use crate::traits::FormSession;

use super::types::QueryKey;

/// フォームを QueryKey の条件で送信する
///
/// 商品 → 州 → (市場欄の再構築待ち) → 市場 → 日付 → Go の順で、
/// 各ステップは前のステップの成功を前提とする。
pub async fn submit_query<S>(
    session: &mut S,
    config: &ScraperConfig,
    key: &QueryKey,
) -> Result<(), ScraperError>
where
    S: FormSession + ?Sized,
{
    let form = &config.form;

    session.navigate(&config.base_url).await?;
    debug!("フォームを開きました: {}", config.base_url);

    session
        .select_option(&form.commodity_field, &key.commodity)
        .await?;

    select_region(session, config, &key.region).await?;

    session
        .select_option(&form.sub_region_field, &key.sub_region)
        .await?;

    let date = key.form_date();
    session.set_value(&form.date_field, &date).await?;

    session.click(&form.submit_control).await?;
    info!(
        "検索送信: {} / {} / {} / {}",
        key.commodity, key.region, key.sub_region, date
    );
    Ok(())
}

/// 州を選択し、市場欄がポストバックで作り直されるのを待つ
pub async fn select_region<S>(
    session: &mut S,
    config: &ScraperConfig,
    region: &str,
) -> Result<(), ScraperError>
where
    S: FormSession + ?Sized,
{
    let form = &config.form;

    session.mark_field(&form.sub_region_field).await?;
    session.select_option(&form.region_field, region).await?;

    let repopulated = session
        .wait_for_repopulation(&form.sub_region_field, config.repopulate_timeout)
        .await?;

    if !repopulated {
        warn!(
            "{} の再構築を{:?}以内に検出できませんでした。{:?}待機して続行します",
            form.sub_region_field, config.repopulate_timeout, config.repopulate_fallback
        );
        sleep(config.repopulate_fallback).await;
    }
    Ok(())
}

/// ドロップダウンの選択肢（プレースホルダーを除く）
pub async fn list_options<S>(
    session: &mut S,
    config: &ScraperConfig,
    field: &str,
) -> Result<Vec<String>, ScraperError>
where
    S: FormSession + ?Sized,
{
    let options = session.option_texts(field).await?;
    Ok(without_placeholder(options, &config.form.placeholder_option))
}

fn without_placeholder(options: Vec<String>, placeholder: &str) -> Vec<String> {
    options
        .into_iter()
        .filter(|o| !o.is_empty() && o != placeholder)
        .collect()
}
