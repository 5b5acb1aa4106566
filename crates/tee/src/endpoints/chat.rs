//! POST /v1/chat/completions ハンドラ
//!
//! リクエストを上流の推論サービスへ中継し、応答全体をバッファしてから署名する。
//! 署名対象は `sha256_hex(リクエスト本文) + ":" + sha256_hex(応答本文)`。
//! 署名は応答のIDをキーに署名ストアへ保存され、応答本文はそのまま返す。

use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::Response;

use serde::Deserialize;
use veritee_crypto::sha256_hex;

use crate::config::TeeAppState;
use crate::error::TeeError;
use crate::signature_store::StoredSignature;

/// ログに使うフィールドだけを読む。メッセージ本文の形は上流に任せる。
#[derive(Deserialize)]
struct ProxiedRequest {
    model: String,
    #[serde(default)]
    stream: bool,
}

/// 署名対象テキストを組み立てる。
pub fn signed_text(request_body: &[u8], response_body: &[u8]) -> String {
    format!("{}:{}", sha256_hex(request_body), sha256_hex(response_body))
}

/// 応答本文からチャットIDを取り出す。
///
/// SSE応答は最初に `id` を持つ `data:` チャンク、JSON応答はトップレベルの `id`。
pub fn extract_chat_id(body: &[u8]) -> Option<String> {
    let text = std::str::from_utf8(body).ok()?;

    for line in text.lines() {
        let Some(data) = line.strip_prefix("data:") else {
            continue;
        };
        let data = data.trim();
        if data == "[DONE]" {
            continue;
        }
        if let Some(id) = serde_json::from_str::<serde_json::Value>(data)
            .ok()
            .as_ref()
            .and_then(id_of)
        {
            return Some(id);
        }
    }

    serde_json::from_str::<serde_json::Value>(text)
        .ok()
        .as_ref()
        .and_then(id_of)
}

fn id_of(value: &serde_json::Value) -> Option<String> {
    value
        .get("id")
        .and_then(serde_json::Value::as_str)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
}

/// チャット補完リクエストを中継し、応答に署名する。
pub async fn handle_chat_completions(
    State(state): State<Arc<TeeAppState>>,
    body: Bytes,
) -> Result<Response, TeeError> {
    let request: ProxiedRequest = serde_json::from_slice(&body)
        .map_err(|e| TeeError::BadRequest(format!("リクエストのパースに失敗: {e}")))?;

    // 署名できない状態で推論を実行しない
    state.identity.init(false).await?;

    let url = format!("{}/v1/chat/completions", state.upstream_url);
    let upstream = state
        .http_client
        .post(&url)
        .header(header::CONTENT_TYPE, "application/json")
        .body(body.clone())
        .send()
        .await
        .map_err(|e| TeeError::BadGateway(format!("上流への送信に失敗: {e}")))?;

    let status = StatusCode::from_u16(upstream.status().as_u16())
        .unwrap_or(StatusCode::BAD_GATEWAY);
    let content_type = upstream
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let response_body = upstream
        .bytes()
        .await
        .map_err(|e| TeeError::BadGateway(format!("上流応答の読み取りに失敗: {e}")))?;

    if status.is_success() {
        let chat_id = extract_chat_id(&response_body)
            .ok_or_else(|| TeeError::BadGateway("上流応答にIDがありません".into()))?;

        let text = signed_text(&body, &response_body);
        let signed = state.identity.sign(&text)?;
        tracing::info!(
            chat_id = %chat_id,
            model = %request.model,
            stream = request.stream,
            signing_address = %signed.signing_address,
            "応答に署名しました"
        );
        state.signatures.insert(
            &chat_id,
            StoredSignature {
                text,
                signature: signed.signature,
                signing_address: signed.signing_address,
                signing_algo: signed.signing_algo,
            },
        );
    } else {
        tracing::warn!(status = %status, "上流がエラーを返しました（署名なしで中継）");
    }

    let mut response = axum::http::Response::builder().status(status);
    if let Some(content_type) = content_type {
        response = response.header(header::CONTENT_TYPE, content_type);
    }
    response
        .body(Body::from(response_body))
        .map_err(|e| TeeError::Internal(format!("応答の構築に失敗: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_id_from_sse() {
        let body = b"data: {\"id\":\"chatcmpl-1\",\"choices\":[]}\n\n\
                     data: {\"id\":\"chatcmpl-1\",\"choices\":[]}\n\n\
                     data: [DONE]\n\n";
        assert_eq!(extract_chat_id(body).as_deref(), Some("chatcmpl-1"));
    }

    #[test]
    fn test_extract_id_skips_chunks_without_id() {
        let body = b": keep-alive\n\ndata: {\"object\":\"ping\"}\n\ndata: {\"id\":\"chat-123\"}\n\n";
        assert_eq!(extract_chat_id(body).as_deref(), Some("chat-123"));
    }

    #[test]
    fn test_extract_id_from_json() {
        let body = br#"{"id":"chat-123","object":"chat.completion","choices":[]}"#;
        assert_eq!(extract_chat_id(body).as_deref(), Some("chat-123"));
    }

    #[test]
    fn test_extract_id_missing() {
        assert_eq!(extract_chat_id(b"data: [DONE]\n\n"), None);
        assert_eq!(extract_chat_id(br#"{"id":""}"#), None);
        assert_eq!(extract_chat_id(b"not json"), None);
        assert_eq!(extract_chat_id(&[0xff, 0xfe]), None);
    }

    #[test]
    fn test_signed_text_format() {
        let text = signed_text(b"req", b"resp");
        let (req_hash, resp_hash) = text.split_once(':').unwrap();
        assert_eq!(req_hash, sha256_hex(b"req"));
        assert_eq!(resp_hash, sha256_hex(b"resp"));
        assert_eq!(text.len(), 64 + 1 + 64);
    }
}
