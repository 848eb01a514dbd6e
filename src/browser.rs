//! chromiumoxide によるセッション実装

use std::path::PathBuf;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::element::Element;
use chromiumoxide::error::CdpError;
use chromiumoxide::page::ScreenshotParams;
use chromiumoxide::Page;
use futures::StreamExt;
use serde::de::DeserializeOwned;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::config::ScraperConfig;
use crate::error::ScraperError;
use crate::traits::{FormSession, SessionLauncher};

/// 要素待機のポーリング間隔（ミリ秒）
const POLL_INTERVAL_MS: u64 = 250;

/// Chrome を起動するランチャー
#[derive(Debug, Clone)]
pub struct ChromeLauncher {
    config: ScraperConfig,
}

impl ChromeLauncher {
    pub fn new(config: ScraperConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl SessionLauncher for ChromeLauncher {
    type Session = ChromeSession;

    async fn launch(&self) -> Result<ChromeSession, ScraperError> {
        info!("ブラウザを初期化中...");

        // ユニークなユーザーデータディレクトリを生成
        let unique_id = format!(
            "{}-{}",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_nanos()
        );
        // 起動に失敗しても一時プロファイルは削除される
        let profile =
            ProfileDir(std::env::temp_dir().join(format!("market-scraper-{}", unique_id)));

        let mut builder = BrowserConfig::builder().user_data_dir(&profile.0);

        if let Some(path) = &self.config.chrome_path {
            builder = builder.chrome_executable(path);
        }

        if !self.config.headless {
            builder = builder.with_head();
        }

        // 画像はフォーム操作に不要なので読み込まない
        builder = builder
            .no_sandbox()
            .request_timeout(self.config.page_timeout)
            .window_size(1920, 1080)
            .arg("--disable-gpu")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-extensions")
            .arg("--disable-blink-features=AutomationControlled")
            .arg("--blink-settings=imagesEnabled=false")
            .arg(format!("--user-agent={}", self.config.user_agent));

        if self.config.debug {
            builder = builder.arg("--enable-logging=stderr").arg("--v=1");
        }

        let browser_config = builder
            .build()
            .map_err(|e| ScraperError::SessionInit(format!("ブラウザ設定エラー: {}", e)))?;

        let (browser, mut handler) = Browser::launch(browser_config)
            .await
            .map_err(|e| ScraperError::SessionInit(e.to_string()))?;

        // ブラウザイベントハンドラをバックグラウンドで実行
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                debug!("Browser event: {:?}", event);
            }
        });

        let page = browser.new_page("about:blank").await;

        let mut session = ChromeSession {
            browser: Some(browser),
            page: None,
            handler: Some(handler_task),
            profile,
            config: self.config.clone(),
            marker: None,
        };

        // ページ作成に失敗した場合もブラウザは必ず閉じる
        match page {
            Ok(page) => session.page = Some(page),
            Err(e) => {
                session.close().await;
                return Err(ScraperError::SessionInit(e.to_string()));
            }
        }

        info!("ブラウザ初期化完了");
        Ok(session)
    }
}

/// 再構築検出用に記録した要素
struct FieldMarker {
    field: String,
    element: Element,
    option_count: u64,
}

/// 1回の試行が占有するブラウザセッション
pub struct ChromeSession {
    browser: Option<Browser>,
    page: Option<Page>,
    handler: Option<JoinHandle<()>>,
    profile: ProfileDir,
    config: ScraperConfig,
    marker: Option<FieldMarker>,
}

impl ChromeSession {
    fn page(&self) -> Result<&Page, ScraperError> {
        self.page
            .as_ref()
            .ok_or_else(|| ScraperError::SessionInit("ブラウザが初期化されていません".into()))
    }

    async fn eval<T: DeserializeOwned>(&self, script: &str) -> Result<T, ScraperError> {
        let result = self
            .page()?
            .evaluate(script)
            .await
            .map_err(|e| ScraperError::from_cdp(e, ScraperError::JavaScript))?;
        result
            .into_value::<T>()
            .map_err(|e| ScraperError::JavaScript(e.to_string()))
    }

    /// 要素がDOMに現れるまで待機
    async fn wait_for_element(&self, id: &str) -> Result<(), ScraperError> {
        let script = format!("document.getElementById({}) !== null", js_string(id));
        let start = Instant::now();

        while start.elapsed() < self.config.element_timeout {
            match self.eval::<bool>(&script).await {
                Ok(true) => return Ok(()),
                Ok(false) => {}
                // ポストバック中はコンテキストが入れ替わるので待機を続ける
                Err(e) if e.is_retryable() => debug!("要素待機中のコンテキスト切替: {}", e),
                Err(e) => return Err(e),
            }
            sleep(Duration::from_millis(POLL_INTERVAL_MS)).await;
        }

        Err(ScraperError::FieldUnavailable(format!(
            "{} ({:?}以内に出現せず)",
            id, self.config.element_timeout
        )))
    }

    async fn find(&self, id: &str) -> Result<Element, ScraperError> {
        self.wait_for_element(id).await?;
        self.page()?
            .find_element(format!("#{}", id))
            .await
            .map_err(|e| {
                ScraperError::from_cdp(e, |m| ScraperError::FieldUnavailable(format!("{}: {}", id, m)))
            })
    }

    async fn current_option_count(&self, id: &str) -> u64 {
        let script = format!(
            "(() => {{ const el = document.getElementById({}); return el && el.options ? el.options.length : 0; }})()",
            js_string(id)
        );
        self.eval::<u64>(&script).await.unwrap_or(0)
    }
}

#[async_trait]
impl FormSession for ChromeSession {
    async fn navigate(&mut self, url: &str) -> Result<(), ScraperError> {
        debug!("ページ遷移: {}", url);
        let page = self.page()?;

        let navigation = async {
            page.goto(url).await?.wait_for_navigation().await?;
            Ok::<(), CdpError>(())
        };

        match tokio::time::timeout(self.config.page_timeout, navigation).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(ScraperError::Navigation(e.to_string())),
            Err(_) => Err(ScraperError::Timeout(format!(
                "{} の読み込みが{:?}以内に完了しませんでした",
                url, self.config.page_timeout
            ))),
        }
    }

    async fn option_texts(&mut self, field: &str) -> Result<Vec<String>, ScraperError> {
        self.wait_for_element(field).await?;
        let script = format!(
            r#"
            (() => {{
                const el = document.getElementById({});
                if (!el || !el.options) return [];
                return Array.from(el.options).map(o => o.text.trim());
            }})()
            "#,
            js_string(field)
        );

        // evaluate は null を値なしとして扱うため、空配列で「選択欄でない」を表す
        let options = self.eval::<Vec<String>>(&script).await?;
        if options.is_empty() {
            return Err(ScraperError::FieldUnavailable(format!(
                "{} は選択欄ではありません",
                field
            )));
        }
        Ok(options)
    }

    async fn select_option(&mut self, field: &str, text: &str) -> Result<(), ScraperError> {
        let element = self.find(field).await?;

        let function = format!(
            r#"
            function() {{
                if (!this.isConnected) return 'stale';
                const target = {};
                const idx = Array.from(this.options).findIndex(o => o.text.trim() === target);
                if (idx < 0) return 'missing';
                this.selectedIndex = idx;
                this.dispatchEvent(new Event('change', {{ bubbles: true }}));
                return 'ok';
            }}
            "#,
            js_string(text)
        );

        let returns = element
            .call_js_fn(function, false)
            .await
            .map_err(|e| ScraperError::from_cdp(e, ScraperError::JavaScript))?;
        let status = returns
            .result
            .value
            .as_ref()
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();

        match status.as_str() {
            "ok" => {
                debug!("'{}' を {} で選択", text, field);
                Ok(())
            }
            "missing" => Err(ScraperError::FieldNotFound {
                field: field.to_string(),
                value: text.to_string(),
            }),
            "stale" => Err(ScraperError::StaleElement(format!(
                "{} は選択前にDOMから外れました",
                field
            ))),
            other => Err(ScraperError::JavaScript(format!(
                "{} の選択結果が不明です: {:?}",
                field, other
            ))),
        }
    }

    async fn mark_field(&mut self, field: &str) -> Result<(), ScraperError> {
        let element = self.find(field).await?;
        let option_count = element
            .call_js_fn("function() { return this.options ? this.options.length : 0; }", false)
            .await
            .map_err(|e| ScraperError::from_cdp(e, ScraperError::JavaScript))?
            .result
            .value
            .and_then(|v| v.as_u64())
            .unwrap_or(0);

        debug!("{} を記録 (選択肢 {} 件)", field, option_count);
        self.marker = Some(FieldMarker {
            field: field.to_string(),
            element,
            option_count,
        });
        Ok(())
    }

    async fn wait_for_repopulation(
        &mut self,
        field: &str,
        timeout: Duration,
    ) -> Result<bool, ScraperError> {
        let marker = match self.marker.take() {
            Some(marker) if marker.field == field => marker,
            _ => {
                warn!("{} が記録されていないため再構築を検出できません", field);
                return Ok(false);
            }
        };

        let start = Instant::now();
        while start.elapsed() < timeout {
            // 参照が切れた（ノードが置き換わった）ことも変化とみなす
            let detached = match marker
                .element
                .call_js_fn("function() { return !this.isConnected; }", false)
                .await
            {
                Ok(returns) => returns
                    .result
                    .value
                    .and_then(|v| v.as_bool())
                    .unwrap_or(true),
                Err(_) => true,
            };
            let count = self.current_option_count(field).await;

            if count > 1 && (detached || marker.option_count <= 1) {
                info!(
                    "{} 再構築を検出: {:?} (選択肢 {} → {}, 置換={})",
                    field,
                    start.elapsed(),
                    marker.option_count,
                    count,
                    detached
                );
                return Ok(true);
            }

            sleep(Duration::from_millis(POLL_INTERVAL_MS)).await;
        }

        Ok(false)
    }

    async fn set_value(&mut self, field: &str, value: &str) -> Result<(), ScraperError> {
        self.wait_for_element(field).await?;
        let script = format!(
            "(() => {{ const el = document.getElementById({}); if (!el) return false; el.value = {}; return true; }})()",
            js_string(field),
            js_string(value)
        );

        if self.eval::<bool>(&script).await? {
            debug!("{} = {}", field, value);
            Ok(())
        } else {
            Err(ScraperError::StaleElement(format!("{} は代入前に置き換わりました", field)))
        }
    }

    async fn click(&mut self, control: &str) -> Result<(), ScraperError> {
        self.wait_for_element(control).await?;
        // 遷移でevaluateの応答が失われないようにクリックは次のタスクで行う
        let script = format!(
            "(() => {{ const el = document.getElementById({}); if (!el) return false; setTimeout(() => el.click(), 0); return true; }})()",
            js_string(control)
        );

        if self.eval::<bool>(&script).await? {
            debug!("{} をクリック", control);
            Ok(())
        } else {
            Err(ScraperError::StaleElement(format!("{} はクリック前に置き換わりました", control)))
        }
    }

    async fn table_html(
        &mut self,
        table: &str,
        timeout: Duration,
    ) -> Result<Option<String>, ScraperError> {
        let script = format!(
            "(() => {{ const el = document.getElementById({}); return el ? el.outerHTML : ''; }})()",
            js_string(table)
        );
        let start = Instant::now();

        while start.elapsed() < timeout {
            match self.eval::<String>(&script).await {
                Ok(html) if !html.is_empty() => {
                    debug!("結果テーブル検出: {:?}, {} bytes", start.elapsed(), html.len());
                    return Ok(Some(html));
                }
                Ok(_) => {}
                Err(e) if e.is_retryable() => debug!("テーブル待機中のコンテキスト切替: {}", e),
                Err(e) => return Err(e),
            }
            sleep(Duration::from_millis(POLL_INTERVAL_MS)).await;
        }

        Ok(None)
    }

    async fn screenshot(&mut self) -> Option<Vec<u8>> {
        let page = self.page.as_ref()?;
        page.screenshot(ScreenshotParams::builder().full_page(true).build())
            .await
            .ok()
    }

    async fn close(&mut self) {
        self.marker = None;

        if let Some(page) = self.page.take() {
            if let Err(e) = page.close().await {
                debug!("Failed to close page: {}", e);
            }
        }

        if let Some(mut browser) = self.browser.take() {
            info!("ブラウザを終了中...");
            if let Err(e) = browser.close().await {
                warn!("ブラウザ終了エラー: {}", e);
            }
            if let Err(e) = browser.wait().await {
                debug!("ブラウザプロセス待機エラー: {}", e);
            }
            info!("ブラウザ終了完了");
        }

        if let Some(handler) = self.handler.take() {
            handler.abort();
        }

        self.profile.remove();
    }
}

impl Drop for ChromeSession {
    fn drop(&mut self) {
        // close() を経由しなかった場合でもハンドラタスクを残さない
        if let Some(handler) = self.handler.take() {
            handler.abort();
        }
        // プロセスを先に終了させてからプロファイルを消す
        drop(self.page.take());
        drop(self.browser.take());
        self.profile.remove();
    }
}

/// ブラウザごとの一時プロファイル（破棄時に削除）
struct ProfileDir(PathBuf);

impl ProfileDir {
    fn remove(&self) {
        if self.0.exists() {
            if let Err(e) = std::fs::remove_dir_all(&self.0) {
                debug!("ユーザーデータ削除エラー {:?}: {}", self.0, e);
            }
        }
    }
}

impl Drop for ProfileDir {
    fn drop(&mut self) {
        self.remove();
    }
}

/// JavaScript の文字列リテラルに変換
fn js_string(value: &str) -> String {
    serde_json::Value::from(value).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_js_string_escapes_quotes() {
        assert_eq!(js_string("Pune"), "\"Pune\"");
        assert_eq!(js_string("Tur (Arhar)"), "\"Tur (Arhar)\"");
        assert_eq!(js_string("a'b\"c"), "\"a'b\\\"c\"");
    }

    #[test]
    fn test_launcher_keeps_config() {
        let config = ScraperConfig::default().with_headless(false);
        let launcher = ChromeLauncher::new(config);
        assert!(!launcher.config.headless);
    }

    #[test]
    fn test_profile_dir_removed_on_drop() {
        let path =
            std::env::temp_dir().join(format!("market-scraper-drop-{}", std::process::id()));
        std::fs::create_dir_all(path.join("Default")).unwrap();
        std::fs::write(path.join("Default").join("Preferences"), "{}").unwrap();

        let profile = ProfileDir(path.clone());
        profile.remove();
        assert!(!path.exists());

        std::fs::create_dir_all(&path).unwrap();
        drop(profile);
        assert!(!path.exists());
    }

    #[tokio::test]
    #[ignore] // 実環境テスト用: cargo test test_chrome_session_lists_commodities -- --ignored --nocapture
    async fn test_chrome_session_lists_commodities() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter("info,market_scraper=debug")
            .try_init();

        let config = ScraperConfig::from_env();
        let launcher = ChromeLauncher::new(config.clone());
        let mut session = launcher.launch().await.expect("Failed to launch browser");

        let result = async {
            session.navigate(&config.base_url).await?;
            session.option_texts(&config.form.commodity_field).await
        }
        .await;
        session.close().await;

        let options = result.expect("Failed to list commodities");
        assert!(options.len() > 1);
    }
}
