//! テスト用の偽フォームサイト
//!
//! 依存ドロップダウンの振る舞いと、日付ごとの結果テーブルを再現する。
//! 起動/終了の回数を数えてセッションの後始末を検証できる。

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::config::ScraperConfig;
use crate::error::ScraperError;
use crate::market::QueryKey;
use crate::traits::{FormSession, SessionLauncher};

#[derive(Debug, Clone, PartialEq)]
pub enum Fault {
    /// 最初のN回のセッションで州選択時に参照切れ
    StaleOnRegion(u32),
    /// 市場欄の再構築シグナルを返さない
    NoRepopulationSignal,
    /// ブラウザ起動に失敗する
    LaunchFails,
    /// 指定日のみ Go ボタンが現れない
    BrokenOnDay(u32),
}

#[derive(Debug, Default)]
struct SiteState {
    launches: u32,
    opened: u32,
    closes: u32,
    open_now: usize,
    max_open: usize,
    steps: Vec<String>,
    submitted_dates: Vec<String>,
}

pub struct FakeSite {
    faults: Vec<Fault>,
    tables: HashMap<String, String>,
    state: Arc<Mutex<SiteState>>,
}

impl FakeSite {
    pub fn new() -> Self {
        Self {
            faults: Vec::new(),
            tables: HashMap::new(),
            state: Arc::new(Mutex::new(SiteState::default())),
        }
    }

    pub fn with_fault(mut self, fault: Fault) -> Self {
        self.faults.push(fault);
        self
    }

    /// `days_back` 日前の結果テーブル（行は (市場名, 最頻価格)）
    pub fn with_table(mut self, days_back: u32, rows: &[(&str, &str)]) -> Self {
        self.tables.insert(date_for(days_back), price_table(rows));
        self
    }

    pub fn config(&self) -> ScraperConfig {
        let mut config = ScraperConfig::new("http://fake.local/SearchCmmMkt.aspx");
        config.repopulate_timeout = Duration::from_millis(20);
        config.repopulate_fallback = Duration::from_millis(5);
        config.table_timeout = Duration::from_millis(20);
        config.stale_backoff = Duration::from_millis(5);
        config
    }

    pub fn launcher(&self) -> FakeLauncher {
        FakeLauncher {
            faults: Arc::new(self.faults.clone()),
            tables: Arc::new(self.tables.clone()),
            state: Arc::clone(&self.state),
        }
    }

    pub fn launches(&self) -> u32 {
        self.lock().launches
    }

    pub fn opened(&self) -> u32 {
        self.lock().opened
    }

    pub fn closes(&self) -> u32 {
        self.lock().closes
    }

    pub fn max_open(&self) -> usize {
        self.lock().max_open
    }

    pub fn steps(&self) -> Vec<String> {
        self.lock().steps.clone()
    }

    pub fn submitted_dates(&self) -> Vec<String> {
        self.lock().submitted_dates.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SiteState> {
        self.state.lock().expect("fake site state poisoned")
    }
}

pub fn date_for(days_back: u32) -> String {
    QueryKey::new("", "", "", days_back).form_date()
}

pub fn price_table(rows: &[(&str, &str)]) -> String {
    let mut html = String::from(
        "<table id=\"cphBody_GridPriceData\"><tr><th>Sl no.</th><th>District Name</th><th>Market Name</th><th>Commodity</th><th>Variety</th><th>Grade</th><th>Min Price</th><th>Max Price</th><th>Modal Price</th><th>Price Date</th><th>Unit</th></tr>",
    );
    for (i, (center, modal)) in rows.iter().enumerate() {
        html.push_str(&format!(
            "<tr><td>{}</td><td>{}</td><td>{}</td><td>Onion</td><td>Red</td><td>FAQ</td><td>1,800</td><td>2,600</td><td>{}</td><td>15-Oct-2026</td><td>Rs./Quintal</td></tr>",
            i + 1,
            center,
            center,
            modal
        ));
    }
    html.push_str("</table>");
    html
}

#[derive(Clone)]
pub struct FakeLauncher {
    faults: Arc<Vec<Fault>>,
    tables: Arc<HashMap<String, String>>,
    state: Arc<Mutex<SiteState>>,
}

#[async_trait]
impl SessionLauncher for FakeLauncher {
    type Session = FakeSession;

    async fn launch(&self) -> Result<FakeSession, ScraperError> {
        let attempt = {
            let mut state = self.state.lock().expect("fake site state poisoned");
            state.launches += 1;
            state.launches
        };

        if self.faults.contains(&Fault::LaunchFails) {
            return Err(ScraperError::SessionInit("chromium not found".into()));
        }

        {
            let mut state = self.state.lock().expect("fake site state poisoned");
            state.opened += 1;
            state.open_now += 1;
            state.max_open = state.max_open.max(state.open_now);
        }

        Ok(FakeSession {
            attempt,
            launcher: self.clone(),
            region: None,
            marked: false,
            date: None,
            submitted: false,
            closed: false,
        })
    }
}

pub struct FakeSession {
    attempt: u32,
    launcher: FakeLauncher,
    region: Option<String>,
    marked: bool,
    date: Option<String>,
    submitted: bool,
    closed: bool,
}

impl FakeSession {
    fn step(&self, step: String) {
        self.launcher
            .state
            .lock()
            .expect("fake site state poisoned")
            .steps
            .push(step);
    }

    fn options(&self, field: &str) -> Result<Vec<String>, ScraperError> {
        let mut options = vec!["--Select--".to_string()];
        let values: &[&str] = match field {
            "ddlCommodity" => &["Onion", "Tomato", "Potato", "Wheat"],
            "ddlState" => &["Maharashtra", "Karnataka"],
            "ddlMarket" => match self.region.as_deref() {
                Some("Maharashtra") => &["Pune", "Nashik", "Mumbai"],
                Some("Karnataka") => &["Bangalore", "Mysore"],
                _ => &[],
            },
            other => return Err(ScraperError::FieldUnavailable(other.to_string())),
        };
        options.extend(values.iter().map(|v| v.to_string()));
        Ok(options)
    }

    fn broken_today(&self) -> bool {
        self.launcher.faults.iter().any(|f| match f {
            Fault::BrokenOnDay(day) => self.date.as_deref() == Some(date_for(*day).as_str()),
            _ => false,
        })
    }
}

#[async_trait]
impl FormSession for FakeSession {
    async fn navigate(&mut self, _url: &str) -> Result<(), ScraperError> {
        tokio::time::sleep(Duration::from_millis(2)).await;
        self.step("navigate".to_string());
        Ok(())
    }

    async fn option_texts(&mut self, field: &str) -> Result<Vec<String>, ScraperError> {
        self.options(field)
    }

    async fn select_option(&mut self, field: &str, text: &str) -> Result<(), ScraperError> {
        if field == "ddlState" {
            let stale = self.launcher.faults.iter().any(|f| match f {
                Fault::StaleOnRegion(n) => self.attempt <= *n,
                _ => false,
            });
            if stale {
                return Err(ScraperError::StaleElement(format!(
                    "{} replaced during postback",
                    field
                )));
            }
        }

        if !self.options(field)?.iter().any(|o| o == text) {
            return Err(ScraperError::FieldNotFound {
                field: field.to_string(),
                value: text.to_string(),
            });
        }

        if field == "ddlState" {
            self.region = Some(text.to_string());
        }
        self.step(format!("select {}={}", field, text));
        Ok(())
    }

    async fn mark_field(&mut self, field: &str) -> Result<(), ScraperError> {
        self.marked = true;
        self.step(format!("mark {}", field));
        Ok(())
    }

    async fn wait_for_repopulation(
        &mut self,
        field: &str,
        _timeout: Duration,
    ) -> Result<bool, ScraperError> {
        if self.launcher.faults.contains(&Fault::NoRepopulationSignal) {
            return Ok(false);
        }
        self.step(format!("repopulate {}", field));
        Ok(self.marked && self.region.is_some())
    }

    async fn set_value(&mut self, field: &str, value: &str) -> Result<(), ScraperError> {
        self.date = Some(value.to_string());
        self.step(format!("set {}={}", field, value));
        Ok(())
    }

    async fn click(&mut self, control: &str) -> Result<(), ScraperError> {
        if self.broken_today() {
            return Err(ScraperError::FieldUnavailable(control.to_string()));
        }
        self.submitted = true;
        if let Some(date) = &self.date {
            self.launcher
                .state
                .lock()
                .expect("fake site state poisoned")
                .submitted_dates
                .push(date.clone());
        }
        self.step(format!("click {}", control));
        Ok(())
    }

    async fn table_html(
        &mut self,
        _table: &str,
        _timeout: Duration,
    ) -> Result<Option<String>, ScraperError> {
        if !self.submitted {
            return Ok(None);
        }
        Ok(self
            .date
            .as_ref()
            .and_then(|d| self.launcher.tables.get(d).cloned()))
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        let mut state = self.launcher.state.lock().expect("fake site state poisoned");
        state.closes += 1;
        state.open_now = state.open_now.saturating_sub(1);
    }
}
