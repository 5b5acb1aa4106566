//! # 検証エラー型

/// 検証プロトコルのエラー型。
///
/// 署名の不一致はエラーではなく `VerificationOutcome::signature_verified = false`
/// として報告される。
#[derive(Debug, thiserror::Error)]
pub enum VerifyError {
    /// HTTP通信に失敗
    #[error("HTTP通信に失敗: {0}")]
    Http(String),
    /// サービスが非2xxを返した
    #[error("サービスがエラーを返しました: HTTP {status} - {body}")]
    UnexpectedStatus { status: u16, body: String },
    /// 応答のパースに失敗
    #[error("応答が不正です: {0}")]
    InvalidResponse(String),
    /// 相関IDに対応する署名がない（未登録または期限切れ）
    #[error("署名が見つかりません: {0}")]
    CorrelationNotFound(String),
    /// Quoteのデコード・構造検証に失敗
    #[error("Quoteが不正です: {0}")]
    QuoteInvalid(String),
    /// Quoteのreport dataが署名アドレスを束縛していない
    #[error("Quoteのreport dataが署名アドレス {0} と一致しません")]
    BindingMismatch(String),
    /// Quoteの測定値が期待値と一致しない
    #[error("測定値が期待値と一致しません: {0}")]
    MeasurementMismatch(String),
}
