use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScraperError {
    #[error("ブラウザ初期化エラー: {0}")]
    SessionInit(String),

    #[error("ナビゲーションエラー: {0}")]
    Navigation(String),

    #[error("JavaScript実行エラー: {0}")]
    JavaScript(String),

    #[error("選択肢が見つかりません: {field} に '{value}' がありません")]
    FieldNotFound { field: String, value: String },

    #[error("要素が見つかりません: {0}")]
    FieldUnavailable(String),

    #[error("要素参照が無効になりました: {0}")]
    StaleElement(String),

    #[error("タイムアウト: {0}")]
    Timeout(String),

    #[error("日数が範囲外です: {days} (1〜{max})")]
    InvalidRange { days: u32, max: u32 },

    #[error("テーブル抽出エラー: {0}")]
    Extraction(String),

    #[error("設定エラー: {0}")]
    Config(String),

    #[error("処理がキャンセルされました")]
    Cancelled,

    #[error("{days_back}日前のデータ取得に失敗: {source}")]
    DayFailed {
        days_back: u32,
        #[source]
        source: Box<ScraperError>,
    },
}

impl ScraperError {
    /// リトライで回復できるエラーか（DOM更新による参照切れのみ）
    pub fn is_retryable(&self) -> bool {
        matches!(self, ScraperError::StaleElement(_))
    }

    /// CDPエラーを分類する
    ///
    /// ポストバックでノードが置き換わった場合や実行コンテキストが破棄された場合は
    /// `StaleElement` とし、それ以外は `fallback` で包む。
    pub fn from_cdp(
        err: impl std::fmt::Display,
        fallback: impl FnOnce(String) -> ScraperError,
    ) -> ScraperError {
        let message = err.to_string();
        let lower = message.to_ascii_lowercase();
        const STALE_MARKERS: [&str; 5] = [
            "no node with given id",
            "could not find node",
            "node is detached",
            "cannot find context with specified id",
            "execution context was destroyed",
        ];
        if STALE_MARKERS.iter().any(|m| lower.contains(m)) {
            ScraperError::StaleElement(message)
        } else {
            fallback(message)
        }
    }
}
