//! # veritee TEEサーバー
//!
//! TEE内で署名用アイデンティティを生成し、推論サービスの応答に署名する。
//!
//! ## 起動シーケンス
//! 1. 環境変数から設定を読み込む
//! 2. Attestationクライアントを選択（`MOCK_MODE=true` ならモック、それ以外はtappd）
//! 3. 鍵生成とQuote取得（失敗してもサーバーは起動し、初回リクエストで再試行する）
//! 4. エンドポイントの受付開始

mod config;
mod endpoints;
mod error;
mod identity;
mod runtime;
mod signature_store;

use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use crate::config::{TeeAppState, TeeConfig};
use crate::identity::IdentityQuote;
use crate::runtime::AttestationClient;
use crate::signature_store::SignatureStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = TeeConfig::from_env()?;

    let client: Arc<dyn AttestationClient> = if config.mock_mode {
        tracing::info!("MockAttestationClientで起動します");
        Arc::new(runtime::mock::MockAttestationClient::new())
    } else {
        tracing::info!(endpoint = %config.tappd_endpoint, "TappdClientで起動します");
        Arc::new(runtime::tappd::TappdClient::new(&config.tappd_endpoint))
    };

    let identity = Arc::new(IdentityQuote::new(config.signing_algo, client));
    if let Err(e) = identity.init(false).await {
        tracing::warn!(error = %e, "起動時の初期化に失敗しました（初回リクエストで再試行します）");
    }
    tracing::info!(state = ?identity.state(), "アイデンティティの状態");

    let state = Arc::new(TeeAppState {
        identity,
        signatures: SignatureStore::new(config.signature_ttl, config.signature_capacity),
        upstream_url: config.upstream_url.trim_end_matches('/').to_string(),
        http_client: reqwest::Client::new(),
    });

    let app = endpoints::router(state);

    tracing::info!(
        addr = %config.listen_addr,
        signing_algo = %config.signing_algo,
        "TEEサーバーを起動します"
    );
    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
