//! GET /v1/attestation/report ハンドラ

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;

use veritee_types::{AttestationReport, SigningAlgorithm};

use crate::config::TeeAppState;
use crate::error::TeeError;

/// クエリパラメータ。
#[derive(Debug, Deserialize)]
pub struct ReportQuery {
    /// 要求する署名アルゴリズム（省略時は設定値）
    pub signing_algo: Option<String>,
}

/// Attested Identityを返す。未初期化なら初期化してから返す。
pub async fn handle_attestation_report(
    State(state): State<Arc<TeeAppState>>,
    Query(query): Query<ReportQuery>,
) -> Result<Json<AttestationReport>, TeeError> {
    if let Some(requested) = query.signing_algo.as_deref() {
        let requested = requested
            .parse::<SigningAlgorithm>()
            .map_err(|e| TeeError::BadRequest(e.to_string()))?;
        if requested != state.identity.algorithm() {
            return Err(TeeError::BadRequest(format!(
                "このサーバーの署名アルゴリズムは {} です",
                state.identity.algorithm()
            )));
        }
    }

    let identity = state.identity.init(false).await?;
    Ok(Json(identity.to_report()))
}
