//! # Attestationクライアント抽象化
//!
//! TEEのQuote取得・環境情報取得を抽象化するトレイト。
//! 環境変数 `MOCK_MODE` で実装を切り替える。
//!
//! 現在の実装:
//! - `tappd`: dstack tappd（unixソケットまたはHTTP）
//! - `mock`: ローカル開発・テスト用（合成TDX Quote）
//!
//! いずれもリトライ・タイムアウトを持たない単発呼び出し。
//! 呼び出し側が必要に応じて独自のポリシーで包む。

pub mod mock;
pub mod tappd;

use veritee_crypto::ReportData;

/// Attestationエンドポイント呼び出しのエラー型。
#[derive(Debug, thiserror::Error)]
pub enum AttestationClientError {
    /// エンドポイントに到達できない、または非2xx応答
    #[error("Attestationエンドポイントが利用できません: {0}")]
    Unavailable(String),
    /// 応答のデコードに失敗
    #[error("Attestationエンドポイントの応答が不正です: {0}")]
    InvalidResponse(String),
}

/// Quote取得結果。
#[derive(Debug, Clone)]
pub struct QuoteResponse {
    /// ハードウェアが発行したQuote（生バイト列）
    pub quote: Vec<u8>,
    /// Quoteに付随するイベントログ（解釈せずに中継する）
    pub event_log: serde_json::Value,
}

/// Attestationエンドポイントのトレイト。
#[async_trait::async_trait]
pub trait AttestationClient: Send + Sync {
    /// TEE種別を返す（`"intel_tdx"` 等）。
    fn tee_type(&self) -> &str;

    /// report dataを埋め込んだQuoteを取得する。
    async fn get_quote(
        &self,
        report_data: &ReportData,
    ) -> Result<QuoteResponse, AttestationClientError>;

    /// 補助的な環境情報を取得する。
    async fn get_info(
        &self,
        report_data: &ReportData,
    ) -> Result<serde_json::Value, AttestationClientError>;
}
