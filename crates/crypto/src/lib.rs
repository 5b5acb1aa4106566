//! # veritee 暗号処理
//!
//! TEE内で生成される署名用アイデンティティと、その検証処理を実装する。
//!
//! ## 暗号アルゴリズム
//! | 用途 | アルゴリズム |
//! |------|------------|
//! | 署名（EdDSA） | Ed25519 |
//! | 署名（ECDSA） | secp256k1 + Ethereum personal-sign |
//! | アドレス導出 | keccak-256 |
//! | レスポンスハッシュ | SHA-256 |
//!
//! ## Report Data
//! 公開鍵の指紋（32バイト）+ ゼロ埋め（32バイト）の64バイト。
//! TDX Quoteのreport dataにそのまま埋め込まれる。

pub mod attestation;
pub mod ethereum;
pub mod signer;

use sha2::{Digest, Sha256};

pub use signer::{
    generate_identity, report_data_binds_address, verify_signature, EcdsaIdentity,
    Ed25519Identity, IdentitySigner, ReportData, REPORT_DATA_SIZE,
};
pub use veritee_types::SigningAlgorithm;

/// 暗号処理のエラー型
#[derive(Debug, Clone, thiserror::Error)]
pub enum CryptoError {
    /// OS乱数源からのエントロピー取得に失敗（致命的、リトライしない）
    #[error("エントロピーの取得に失敗しました: {0}")]
    EntropyFailure(String),
    /// 鍵の構築に失敗
    #[error("鍵の構築に失敗しました: {0}")]
    KeyError(String),
    /// 署名処理に失敗
    #[error("署名に失敗しました: {0}")]
    SigningFailed(String),
}

/// SHA-256ハッシュ計算。
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    let result = hasher.finalize();
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&result);
    hash
}

/// SHA-256ハッシュを小文字hexで返す。
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(sha256(data))
}

/// `0x` 接頭辞を許容してhexをデコードする。
pub fn decode_hex(value: &str) -> Result<Vec<u8>, hex::FromHexError> {
    hex::decode(value.strip_prefix("0x").unwrap_or(value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256_hex_known_vector() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_decode_hex_prefix() {
        assert_eq!(decode_hex("0x0a0b").unwrap(), vec![0x0a, 0x0b]);
        assert_eq!(decode_hex("0a0b").unwrap(), vec![0x0a, 0x0b]);
        assert!(decode_hex("0xzz").is_err());
    }
}
