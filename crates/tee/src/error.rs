//! # TEE エラー型
//!
//! 全エンドポイントで共通のエラー型。

use axum::http::StatusCode;

use crate::identity::IdentityError;

/// TEEエラー型。
#[derive(Debug, thiserror::Error)]
pub enum TeeError {
    /// 不正なリクエスト（パース失敗、アルゴリズム不一致）
    #[error("不正なリクエスト: {0}")]
    BadRequest(String),
    /// 内部エラー（署名失敗、エントロピー枯渇）
    #[error("内部エラー: {0}")]
    Internal(String),
    /// アイデンティティ未初期化・Attestation取得不可
    #[error("サービスが利用できません: {0}")]
    ServiceUnavailable(String),
    /// 上流の推論サービスとの通信失敗
    #[error("外部通信に失敗: {0}")]
    BadGateway(String),
    /// 指定IDの署名が存在しない（未登録または期限切れ）
    #[error("署名が見つかりません: {0}")]
    NotFound(String),
}

impl From<IdentityError> for TeeError {
    fn from(e: IdentityError) -> Self {
        match e {
            IdentityError::NotInitialized | IdentityError::AttestationUnavailable(_) => {
                TeeError::ServiceUnavailable(e.to_string())
            }
            IdentityError::Crypto(_) => TeeError::Internal(e.to_string()),
        }
    }
}

impl axum::response::IntoResponse for TeeError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self {
            TeeError::BadRequest(_) => StatusCode::BAD_REQUEST,
            TeeError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            TeeError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            TeeError::BadGateway(_) => StatusCode::BAD_GATEWAY,
            TeeError::NotFound(_) => StatusCode::NOT_FOUND,
        };
        (status, self.to_string()).into_response()
    }
}
