use std::time::Duration;

use async_trait::async_trait;

use crate::error::ScraperError;
use crate::market::{QueryKey, Record};

/// 1つのブラウザセッションで行うフォーム操作
///
/// 実装は1つの論理操作だけが占有する。同じセッションで操作を並行させない。
#[async_trait]
pub trait FormSession: Send {
    /// ページ遷移（ページタイムアウト付き）
    async fn navigate(&mut self, url: &str) -> Result<(), ScraperError>;

    /// ドロップダウンの選択肢テキスト一覧（出現を待機）
    async fn option_texts(&mut self, field: &str) -> Result<Vec<String>, ScraperError>;

    /// 表示テキストで選択肢を選ぶ
    async fn select_option(&mut self, field: &str, text: &str) -> Result<(), ScraperError>;

    /// 再構築の検出用に現在の要素を記録
    async fn mark_field(&mut self, field: &str) -> Result<(), ScraperError>;

    /// 記録した要素の再構築を待つ
    ///
    /// 変化を検出できた場合は `true`、待機上限に達した場合は `false`。
    async fn wait_for_repopulation(
        &mut self,
        field: &str,
        timeout: Duration,
    ) -> Result<bool, ScraperError>;

    /// 値を直接代入する（キー入力やカレンダー操作はしない）
    async fn set_value(&mut self, field: &str, value: &str) -> Result<(), ScraperError>;

    async fn click(&mut self, control: &str) -> Result<(), ScraperError>;

    /// 結果テーブルのHTML。待機上限までに現れなければ `None`
    async fn table_html(
        &mut self,
        table: &str,
        timeout: Duration,
    ) -> Result<Option<String>, ScraperError>;

    /// 失敗時の調査用スクリーンショット（PNG）
    async fn screenshot(&mut self) -> Option<Vec<u8>> {
        None
    }

    /// リソース解放（冪等、エラーはログのみ）
    async fn close(&mut self);
}

/// セッションを起動する
#[async_trait]
pub trait SessionLauncher: Send + Sync {
    type Session: FormSession;

    async fn launch(&self) -> Result<Self::Session, ScraperError>;
}

/// 外部のバリデータ/整形処理（既定は何もしない）
pub trait RecordHooks: Send + Sync {
    fn format_price(&self, raw: &str) -> String {
        raw.to_string()
    }

    fn clean_records(&self, records: Vec<Record>) -> Vec<Record> {
        records
    }

    fn log_request(&self, _key: &QueryKey, _success: bool, _record_count: usize) {}
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHooks;

impl RecordHooks for NoopHooks {}
