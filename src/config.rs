use std::time::Duration;

use crate::error::ScraperError;

const DEFAULT_BASE_URL: &str = "https://agmarknet.gov.in/SearchCmmMkt.aspx";
const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

/// 同時ブラウザセッション数の上限（サイトへの負荷対策）
pub const MAX_CONCURRENT_SESSIONS: usize = 5;

/// フォーム要素のID
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormLayout {
    pub commodity_field: String,
    pub region_field: String,
    pub sub_region_field: String,
    pub date_field: String,
    pub submit_control: String,
    pub results_table: String,
    /// 未選択状態のプレースホルダー
    pub placeholder_option: String,
}

impl Default for FormLayout {
    fn default() -> Self {
        Self {
            commodity_field: "ddlCommodity".to_string(),
            region_field: "ddlState".to_string(),
            sub_region_field: "ddlMarket".to_string(),
            date_field: "txtDate".to_string(),
            submit_control: "btnGo".to_string(),
            results_table: "cphBody_GridPriceData".to_string(),
            placeholder_option: "--Select--".to_string(),
        }
    }
}

/// 結果テーブルの列位置
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnLayout {
    pub min_cells: usize,
    pub market_center: usize,
    pub commodity: usize,
    pub variety: usize,
    pub grade: usize,
    pub min_price: usize,
    pub max_price: usize,
    pub modal_price: usize,
    pub date: usize,
}

impl Default for ColumnLayout {
    fn default() -> Self {
        Self {
            min_cells: 11,
            market_center: 1,
            commodity: 3,
            variety: 4,
            grade: 5,
            min_price: 6,
            max_price: 7,
            modal_price: 8,
            date: 9,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScraperConfig {
    pub base_url: String,
    pub headless: bool,
    /// 1回のページ遷移にかける上限時間
    pub page_timeout: Duration,
    pub element_timeout: Duration,
    /// 依存ドロップダウン再構築の待機上限
    pub repopulate_timeout: Duration,
    /// 再構築のシグナルが得られなかった場合の固定待機
    pub repopulate_fallback: Duration,
    pub table_timeout: Duration,
    pub max_days_back: u32,
    pub max_attempts: u32,
    pub stale_backoff: Duration,
    pub max_concurrent_sessions: usize,
    pub debug: bool,
    pub chrome_path: Option<String>,
    pub user_agent: String,
    pub form: FormLayout,
    pub columns: ColumnLayout,
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            headless: true,
            page_timeout: Duration::from_secs(30),
            element_timeout: Duration::from_secs(10),
            repopulate_timeout: Duration::from_secs(15),
            repopulate_fallback: Duration::from_secs(2),
            table_timeout: Duration::from_secs(15),
            max_days_back: 30,
            max_attempts: 3,
            stale_backoff: Duration::from_secs(1),
            max_concurrent_sessions: 3,
            debug: false,
            chrome_path: None,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            form: FormLayout::default(),
            columns: ColumnLayout::default(),
        }
    }
}

impl ScraperConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Default::default()
        }
    }

    /// 環境変数で既定値を上書きした設定を作る
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(url) = std::env::var("MARKET_SCRAPER_URL") {
            config.base_url = url;
        }
        if let Some(headless) = env_bool("MARKET_SCRAPER_HEADLESS") {
            config.headless = headless;
        }
        if let Some(secs) = env_parse::<u64>("MARKET_SCRAPER_TIMEOUT_SECS") {
            config.page_timeout = Duration::from_secs(secs);
        }
        if let Some(days) = env_parse::<u32>("MARKET_SCRAPER_MAX_DAYS_BACK") {
            config.max_days_back = days;
        }
        if let Some(debug) = env_bool("MARKET_SCRAPER_DEBUG") {
            config.debug = debug;
        }
        // Chrome パスを取得
        config.chrome_path = std::env::var("CHROME_PATH")
            .or_else(|_| std::env::var("CHROMIUM_PATH"))
            .ok();

        config
    }

    pub fn with_headless(mut self, headless: bool) -> Self {
        self.headless = headless;
        self
    }

    pub fn with_page_timeout(mut self, timeout: Duration) -> Self {
        self.page_timeout = timeout;
        self
    }

    pub fn with_max_days_back(mut self, days: u32) -> Self {
        self.max_days_back = days;
        self
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn with_stale_backoff(mut self, backoff: Duration) -> Self {
        self.stale_backoff = backoff;
        self
    }

    pub fn with_max_concurrent_sessions(mut self, limit: usize) -> Self {
        self.max_concurrent_sessions = limit;
        self
    }

    pub fn with_chrome_path(mut self, path: impl Into<String>) -> Self {
        self.chrome_path = Some(path.into());
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn with_form(mut self, form: FormLayout) -> Self {
        self.form = form;
        self
    }

    pub fn with_columns(mut self, columns: ColumnLayout) -> Self {
        self.columns = columns;
        self
    }

    pub fn validate(&self) -> Result<(), ScraperError> {
        if self.max_attempts == 0 {
            return Err(ScraperError::Config("max_attempts は1以上".into()));
        }
        if self.max_days_back == 0 {
            return Err(ScraperError::Config("max_days_back は1以上".into()));
        }
        if self.max_concurrent_sessions == 0 {
            return Err(ScraperError::Config(
                "max_concurrent_sessions は1以上".into(),
            ));
        }
        let columns = &self.columns;
        let highest = [
            columns.market_center,
            columns.commodity,
            columns.variety,
            columns.grade,
            columns.min_price,
            columns.max_price,
            columns.modal_price,
            columns.date,
        ]
        .into_iter()
        .max()
        .unwrap_or(0);
        if highest >= columns.min_cells {
            return Err(ScraperError::Config(format!(
                "列位置 {} が最小セル数 {} を超えています",
                highest, columns.min_cells
            )));
        }
        Ok(())
    }

    /// 同時セッション数（1〜MAX_CONCURRENT_SESSIONS に丸める）
    pub fn session_limit(&self) -> usize {
        self.max_concurrent_sessions.clamp(1, MAX_CONCURRENT_SESSIONS)
    }
}

fn env_bool(key: &str) -> Option<bool> {
    let value = std::env::var(key).ok()?;
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok()?.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builder() {
        let config = ScraperConfig::new("http://localhost:8080/form.aspx")
            .with_headless(false)
            .with_page_timeout(Duration::from_secs(45))
            .with_max_attempts(5)
            .with_chrome_path("/usr/bin/chromium");

        assert_eq!(config.base_url, "http://localhost:8080/form.aspx");
        assert!(!config.headless);
        assert_eq!(config.page_timeout, Duration::from_secs(45));
        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.chrome_path.as_deref(), Some("/usr/bin/chromium"));
        assert_eq!(config.max_days_back, 30);
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = ScraperConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.form.sub_region_field, "ddlMarket");
        assert_eq!(config.columns.modal_price, 8);
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        assert!(ScraperConfig::default().with_max_attempts(0).validate().is_err());
        assert!(ScraperConfig::default().with_max_days_back(0).validate().is_err());
        assert!(ScraperConfig::default()
            .with_max_concurrent_sessions(0)
            .validate()
            .is_err());
    }

    #[test]
    fn test_validate_rejects_column_past_min_cells() {
        let columns = ColumnLayout {
            date: 12,
            ..Default::default()
        };
        let config = ScraperConfig::default().with_columns(columns);
        assert!(matches!(config.validate(), Err(ScraperError::Config(_))));
    }

    #[test]
    fn test_session_limit_is_clamped() {
        let config = ScraperConfig::default().with_max_concurrent_sessions(50);
        assert_eq!(config.session_limit(), MAX_CONCURRENT_SESSIONS);
    }
}
