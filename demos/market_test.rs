use market_scraper::{MarketQuery, MarketScraper, RecordFilter, ScraperConfig};
use rust_decimal::Decimal;

#[tokio::main]
async fn main() {
    // ログ設定
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    // 環境変数から条件を取得（未設定なら既定値）
    let commodity = std::env::var("MARKET_COMMODITY").unwrap_or_else(|_| "Onion".to_string());
    let region = std::env::var("MARKET_REGION").unwrap_or_else(|_| "Maharashtra".to_string());
    let sub_region = std::env::var("MARKET_SUB_REGION").unwrap_or_else(|_| "Pune".to_string());
    // 最低価格の下限（Rs./Quintal）
    let min_price: Decimal = std::env::var("MARKET_MIN_PRICE")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or_else(|| Decimal::new(1000, 0));

    let config = ScraperConfig::from_env().with_headless(false); // デバッグ用に表示モード
    let scraper = MarketScraper::new(config);
    let query = MarketQuery::new(&commodity, &region, &sub_region);

    println!("=== Market Scraper Test ===");

    match scraper.sub_regions_for(&region).await {
        Ok(markets) => println!("{} の市場: {:?}", region, markets),
        Err(e) => eprintln!("エラー: {}", e),
    }

    match scraper.find_most_recent_data(&query, 7).await {
        Ok(records) if records.is_empty() => println!("7日以内のデータなし"),
        Ok(records) => {
            let filtered = RecordFilter::new()
                .with_min_price_floor(min_price)
                .apply(&records);
            println!("{}件中{}件が下限 {} 以上", records.len(), filtered.len(), min_price);
            println!("{}", serde_json::to_string_pretty(&filtered).unwrap_or_default());
        }
        Err(e) => eprintln!("エラー: {}", e),
    }

    match scraper.compute_trend(&query, 5).await {
        Ok(Some(trend)) => {
            println!("{}", serde_json::to_string_pretty(&trend).unwrap_or_default());
        }
        Ok(None) => println!("期間内の価格データなし"),
        Err(e) => eprintln!("エラー: {}", e),
    }
}
