//! # veritee 共有型定義
//!
//! TEE内サービスと検証者（relying party）の間でやり取りされる
//! データ構造をRust構造体として提供する。
//!
//! ## エンコーディング規則
//! - Hex: 公開鍵・署名・ハッシュ（ECDSAは `0x` 接頭辞付き）
//! - Base64: Attestation Quote（`intel_quote`）

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// 署名アルゴリズム
// ---------------------------------------------------------------------------

/// 署名アルゴリズム。起動時に一度だけ選択され、以後変更されない。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SigningAlgorithm {
    /// Curve25519上のEdDSA。アドレスは生の公開鍵（32バイト）のhex。
    Ed25519,
    /// secp256k1上のECDSA。アドレスはEthereum形式（keccak-256の下位20バイト）。
    Ecdsa,
}

/// 未対応の署名アルゴリズム名が指定された。
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("未対応の署名アルゴリズム: {0}")]
pub struct UnsupportedAlgorithm(pub String);

impl SigningAlgorithm {
    /// ワイヤ上の名前（`"ed25519"` / `"ecdsa"`）を返す。
    pub fn as_str(&self) -> &'static str {
        match self {
            SigningAlgorithm::Ed25519 => "ed25519",
            SigningAlgorithm::Ecdsa => "ecdsa",
        }
    }

    /// 署名アドレスの形式からアルゴリズムを推定する。
    ///
    /// - `0x` + 40桁hex → ECDSA
    /// - 64桁hex → Ed25519
    pub fn detect(signing_address: &str) -> Option<Self> {
        let is_hex = |s: &str| s.chars().all(|c| c.is_ascii_hexdigit());
        if let Some(rest) = signing_address.strip_prefix("0x") {
            if rest.len() == 40 && is_hex(rest) {
                return Some(SigningAlgorithm::Ecdsa);
            }
            return None;
        }
        if signing_address.len() == 64 && is_hex(signing_address) {
            return Some(SigningAlgorithm::Ed25519);
        }
        None
    }
}

impl fmt::Display for SigningAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SigningAlgorithm {
    type Err = UnsupportedAlgorithm;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ed25519" => Ok(SigningAlgorithm::Ed25519),
            "ecdsa" => Ok(SigningAlgorithm::Ecdsa),
            _ => Err(UnsupportedAlgorithm(s.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// 公開エンドポイント (GET /v1/attestation/report)
// ---------------------------------------------------------------------------

/// TEEが公開するAttested Identity。
///
/// `intel_quote` のreport dataには `signing_address` の指紋が埋め込まれている。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttestationReport {
    /// 署名アドレス（公開アイデンティティ）
    pub signing_address: String,
    /// 署名アルゴリズム。省略時は検証者がアドレスの形式から判別する
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signing_algo: Option<SigningAlgorithm>,
    /// Base64エンコードされたIntel TDX Quote
    pub intel_quote: String,
    /// Quoteに付随するイベントログ（そのまま中継）
    pub event_log: serde_json::Value,
    /// 補助的な環境情報（取得失敗時はnull）
    #[serde(default)]
    pub info: Option<serde_json::Value>,
}

// ---------------------------------------------------------------------------
// 署名取得エンドポイント (GET /v1/signature/{chat_id})
// ---------------------------------------------------------------------------

/// 相関IDに紐づく署名。
///
/// `text` は署名対象とバイト単位で一致する。検証者は自分の手元の
/// レスポンス本文ではなく、必ずこの `text` を検証に使用すること。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureResponse {
    /// 署名対象テキスト
    pub text: String,
    /// 署名（アルゴリズム依存のhex表現）
    pub signature: String,
    /// 署名したアドレス
    pub signing_address: String,
    /// 署名アルゴリズム
    pub signing_algo: SigningAlgorithm,
}

// ---------------------------------------------------------------------------
// 保護対象アクション (POST /v1/chat/completions)
// ---------------------------------------------------------------------------

/// チャットメッセージ
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// 発話者ロール（"system", "user", "assistant"）
    pub role: String,
    /// 本文
    pub content: String,
}

/// OpenAI互換のチャット補完リクエスト（検証者が送信する最小構成）。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatCompletionRequest {
    /// モデル名
    pub model: String,
    /// メッセージ列
    pub messages: Vec<ChatMessage>,
    /// ストリーミング応答を要求するか
    #[serde(default)]
    pub stream: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_algorithm_parse() {
        assert_eq!("ed25519".parse(), Ok(SigningAlgorithm::Ed25519));
        assert_eq!("ECDSA".parse(), Ok(SigningAlgorithm::Ecdsa));
        assert_eq!(
            "rsa".parse::<SigningAlgorithm>(),
            Err(UnsupportedAlgorithm("rsa".into()))
        );
    }

    #[test]
    fn test_algorithm_detect() {
        let eth = format!("0x{}", "aB".repeat(20));
        assert_eq!(SigningAlgorithm::detect(&eth), Some(SigningAlgorithm::Ecdsa));
        let ed = "0f".repeat(32);
        assert_eq!(SigningAlgorithm::detect(&ed), Some(SigningAlgorithm::Ed25519));
        assert_eq!(SigningAlgorithm::detect("0x1234"), None);
        assert_eq!(SigningAlgorithm::detect(&"zz".repeat(32)), None);
    }

    /// info欠落のレポートもデシリアライズできること
    #[test]
    fn test_report_without_info() {
        let json = serde_json::json!({
            "signing_address": "0xabc",
            "signing_algo": "ecdsa",
            "intel_quote": "AAAA",
            "event_log": [],
        });
        let report: AttestationReport = serde_json::from_value(json).unwrap();
        assert_eq!(report.signing_algo, Some(SigningAlgorithm::Ecdsa));
        assert!(report.info.is_none());
    }

    /// アルゴリズム欄のないレポートも受け付けること
    #[test]
    fn test_report_without_signing_algo() {
        let json = serde_json::json!({
            "signing_address": "0xabc",
            "intel_quote": "AAAA",
            "event_log": [],
            "info": null,
        });
        let report: AttestationReport = serde_json::from_value(json).unwrap();
        assert_eq!(report.signing_algo, None);

        let encoded = serde_json::to_value(&report).unwrap();
        assert!(encoded.get("signing_algo").is_none());
    }
}
