//! # エンドポイントテスト用共通ヘルパー
//!
//! 上流推論サービスのモックと、モックAttestationクライアントで動くTEEサーバー。

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::post;

use veritee_types::SigningAlgorithm;

use crate::config::TeeAppState;
use crate::identity::IdentityQuote;
use crate::runtime::mock::MockAttestationClient;
use crate::signature_store::{SignatureStore, DEFAULT_SIGNATURE_TTL};

/// モック上流の応答内容
pub const UPSTREAM_REPLY: &str = "The model is X.";

/// モック上流の状態
#[derive(Default)]
pub struct MockUpstream {
    pub calls: AtomicUsize,
    /// trueの場合500を返す
    pub fail: bool,
}

/// ルーターをエフェメラルポートで起動し、ポート番号を返す。
pub async fn serve(app: axum::Router) -> u16 {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    port
}

/// OpenAI互換のモック推論サービスを起動する。
///
/// `stream: true` ならSSE、それ以外はJSONで応答する。IDは呼び出しごとに異なる。
pub async fn start_mock_upstream(upstream: Arc<MockUpstream>) -> u16 {
    async fn completions(
        State(upstream): State<Arc<MockUpstream>>,
        body: Bytes,
    ) -> axum::response::Response {
        let n = upstream.calls.fetch_add(1, Ordering::SeqCst);
        if upstream.fail {
            return (StatusCode::INTERNAL_SERVER_ERROR, "upstream down").into_response();
        }
        let Ok(request) = serde_json::from_slice::<serde_json::Value>(&body) else {
            return (StatusCode::BAD_REQUEST, "bad request").into_response();
        };
        let model = request["model"].clone();
        let id = format!("chatcmpl-{n}");

        if request["stream"].as_bool().unwrap_or(false) {
            let mut sse = String::new();
            for piece in UPSTREAM_REPLY.split_inclusive(' ') {
                let chunk = serde_json::json!({
                    "id": id,
                    "object": "chat.completion.chunk",
                    "model": model,
                    "choices": [{"index": 0, "delta": {"content": piece}}],
                });
                sse.push_str(&format!("data: {chunk}\n\n"));
            }
            sse.push_str("data: [DONE]\n\n");
            ([(header::CONTENT_TYPE, "text/event-stream")], sse).into_response()
        } else {
            axum::Json(serde_json::json!({
                "id": id,
                "object": "chat.completion",
                "model": model,
                "choices": [{
                    "index": 0,
                    "message": {"role": "assistant", "content": UPSTREAM_REPLY},
                    "finish_reason": "stop",
                }],
            }))
            .into_response()
        }
    }

    let app = axum::Router::new()
        .route("/v1/chat/completions", post(completions))
        .with_state(upstream);
    serve(app).await
}

/// モックAttestationクライアントでTEEサーバーを起動する。
pub async fn start_tee_server(
    algorithm: SigningAlgorithm,
    upstream_port: u16,
    client: Arc<MockAttestationClient>,
) -> (String, Arc<TeeAppState>) {
    let state = Arc::new(TeeAppState {
        identity: Arc::new(IdentityQuote::new(algorithm, client)),
        signatures: SignatureStore::new(DEFAULT_SIGNATURE_TTL, 100),
        upstream_url: format!("http://127.0.0.1:{upstream_port}"),
        http_client: reqwest::Client::new(),
    });
    let port = serve(crate::endpoints::router(state.clone())).await;
    (format!("http://127.0.0.1:{port}"), state)
}
