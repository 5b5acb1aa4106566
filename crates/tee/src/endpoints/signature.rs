//! GET /v1/signature/{chat_id} ハンドラ

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;

use veritee_types::SignatureResponse;

use crate::config::TeeAppState;
use crate::error::TeeError;

/// チャットIDに紐づく署名を返す。未登録・期限切れは404。
pub async fn handle_signature(
    State(state): State<Arc<TeeAppState>>,
    Path(chat_id): Path<String>,
) -> Result<Json<SignatureResponse>, TeeError> {
    let stored = state
        .signatures
        .get(&chat_id)
        .ok_or_else(|| TeeError::NotFound(chat_id.clone()))?;

    Ok(Json(SignatureResponse {
        text: stored.text,
        signature: stored.signature,
        signing_address: stored.signing_address,
        signing_algo: stored.signing_algo,
    }))
}
