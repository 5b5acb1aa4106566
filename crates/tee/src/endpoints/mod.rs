//! # TEEエンドポイント
//!
//! - `GET /v1/attestation/report`: Attested Identityの公開
//! - `POST /v1/chat/completions`: 上流推論サービスへの中継と応答への署名
//! - `GET /v1/signature/{chat_id}`: 署名の取得

pub mod attestation;
pub mod chat;
pub mod signature;

#[cfg(test)]
pub(crate) mod test_helpers;

use std::sync::Arc;

use axum::routing::{get, post};

pub use attestation::handle_attestation_report;
pub use chat::handle_chat_completions;
pub use signature::handle_signature;

use crate::config::TeeAppState;

/// axumルーターを構築する。
pub fn router(state: Arc<TeeAppState>) -> axum::Router {
    axum::Router::new()
        .route("/v1/attestation/report", get(handle_attestation_report))
        .route("/v1/chat/completions", post(handle_chat_completions))
        .route("/v1/signature/{chat_id}", get(handle_signature))
        .with_state(state)
}
