//! # TEE設定・共有状態
//!
//! 環境変数から読み込む設定と、全ハンドラで共有する状態の定義。

use std::sync::Arc;
use std::time::Duration;

use veritee_types::SigningAlgorithm;

use crate::identity::IdentityQuote;
use crate::runtime::tappd::DEFAULT_TAPPD_SOCKET;
use crate::signature_store::{
    SignatureStore, DEFAULT_SIGNATURE_CAPACITY, DEFAULT_SIGNATURE_TTL,
};

/// 設定読み込みのエラー型。
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("環境変数 {name} が不正です: {reason}")]
    Invalid { name: &'static str, reason: String },
}

/// 環境変数から読み込むTEEサーバー設定。
#[derive(Debug, Clone, PartialEq)]
pub struct TeeConfig {
    /// 署名アルゴリズム（`SIGNING_METHOD`、デフォルト: ed25519）
    pub signing_algo: SigningAlgorithm,
    /// モッククライアントを使うか（`MOCK_MODE=true`）
    pub mock_mode: bool,
    /// tappdの接続先（`TAPPD_ENDPOINT`、unixソケットパスまたはhttp URL）
    pub tappd_endpoint: String,
    /// 上流推論サービスのURL（`UPSTREAM_URL`）
    pub upstream_url: String,
    /// 待受アドレス（`LISTEN_ADDR`）
    pub listen_addr: String,
    /// 署名の保持期間（`SIGNATURE_TTL_SECS`）
    pub signature_ttl: Duration,
    /// 署名の最大保持数（`SIGNATURE_CACHE_CAPACITY`）
    pub signature_capacity: usize,
}

impl TeeConfig {
    /// プロセス環境変数から読み込む。
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// 任意のルックアップ関数から読み込む。
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let signing_algo = match lookup("SIGNING_METHOD") {
            Some(v) => v.parse::<SigningAlgorithm>().map_err(|e| {
                ConfigError::Invalid {
                    name: "SIGNING_METHOD",
                    reason: e.to_string(),
                }
            })?,
            None => SigningAlgorithm::Ed25519,
        };

        let signature_ttl = match lookup("SIGNATURE_TTL_SECS") {
            Some(v) => Duration::from_secs(parse_number("SIGNATURE_TTL_SECS", &v)?),
            None => DEFAULT_SIGNATURE_TTL,
        };
        let signature_capacity = match lookup("SIGNATURE_CACHE_CAPACITY") {
            Some(v) => parse_number("SIGNATURE_CACHE_CAPACITY", &v)? as usize,
            None => DEFAULT_SIGNATURE_CAPACITY,
        };

        Ok(Self {
            signing_algo,
            mock_mode: lookup("MOCK_MODE").as_deref() == Some("true"),
            tappd_endpoint: lookup("TAPPD_ENDPOINT")
                .unwrap_or_else(|| DEFAULT_TAPPD_SOCKET.to_string()),
            upstream_url: lookup("UPSTREAM_URL")
                .unwrap_or_else(|| "http://127.0.0.1:8000".to_string()),
            listen_addr: lookup("LISTEN_ADDR").unwrap_or_else(|| "0.0.0.0:8080".to_string()),
            signature_ttl,
            signature_capacity,
        })
    }
}

fn parse_number(name: &'static str, value: &str) -> Result<u64, ConfigError> {
    value.trim().parse().map_err(|e: std::num::ParseIntError| ConfigError::Invalid {
        name,
        reason: e.to_string(),
    })
}

/// TEEサーバーの共有状態。
pub struct TeeAppState {
    /// 署名用アイデンティティ（プロセスに1つ）
    pub identity: Arc<IdentityQuote>,
    /// チャットIDごとの署名
    pub signatures: SignatureStore,
    /// 上流推論サービスのURL（末尾スラッシュなし）
    pub upstream_url: String,
    /// 上流呼び出し用HTTPクライアント
    pub http_client: reqwest::Client,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = TeeConfig::from_lookup(lookup_from(&[])).unwrap();
        assert_eq!(config.signing_algo, SigningAlgorithm::Ed25519);
        assert!(!config.mock_mode);
        assert_eq!(config.tappd_endpoint, DEFAULT_TAPPD_SOCKET);
        assert_eq!(config.signature_ttl, DEFAULT_SIGNATURE_TTL);
        assert_eq!(config.signature_capacity, DEFAULT_SIGNATURE_CAPACITY);
    }

    #[test]
    fn test_overrides() {
        let config = TeeConfig::from_lookup(lookup_from(&[
            ("SIGNING_METHOD", "ecdsa"),
            ("MOCK_MODE", "true"),
            ("TAPPD_ENDPOINT", "http://localhost:8090"),
            ("UPSTREAM_URL", "http://vllm:8000"),
            ("LISTEN_ADDR", "127.0.0.1:9000"),
            ("SIGNATURE_TTL_SECS", "60"),
            ("SIGNATURE_CACHE_CAPACITY", "5"),
        ]))
        .unwrap();
        assert_eq!(config.signing_algo, SigningAlgorithm::Ecdsa);
        assert!(config.mock_mode);
        assert_eq!(config.tappd_endpoint, "http://localhost:8090");
        assert_eq!(config.upstream_url, "http://vllm:8000");
        assert_eq!(config.listen_addr, "127.0.0.1:9000");
        assert_eq!(config.signature_ttl, Duration::from_secs(60));
        assert_eq!(config.signature_capacity, 5);
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(TeeConfig::from_lookup(lookup_from(&[("SIGNING_METHOD", "rsa")])).is_err());
        assert!(TeeConfig::from_lookup(lookup_from(&[("SIGNATURE_TTL_SECS", "soon")])).is_err());
    }
}
