//! # 署名用アイデンティティ
//!
//! 2種類の署名アルゴリズムを `IdentitySigner` トレイトで抽象化する。
//! 実装は生成時に一度だけ選択され、呼び出し側で分岐しない。
//!
//! | アルゴリズム | 署名アドレス | 指紋（report data先頭32バイト） | 署名表現 |
//! |-------------|-------------|-------------------------------|---------|
//! | Ed25519 | 公開鍵32バイトのhex | 公開鍵そのもの | 64バイトのhex |
//! | ECDSA | EIP-55形式 `0x...` | keccak-256(非圧縮公開鍵) | `0x` + `r‖s‖v` のhex |
//!
//! 秘密鍵はプロセス内にのみ保持され、シリアライズ・ログ出力されない。

use std::fmt;

use ed25519_dalek::{Signer, SigningKey, VerifyingKey};
use rand::RngCore;

use crate::ethereum;
use crate::{decode_hex, CryptoError, SigningAlgorithm};

/// Quoteのreport dataのバイト長
pub const REPORT_DATA_SIZE: usize = 64;

/// Quoteに埋め込む64バイトのreport data。
pub type ReportData = [u8; REPORT_DATA_SIZE];

/// secp256k1のスカラー範囲外のシードを引き直す上限回数
const MAX_SEED_ATTEMPTS: usize = 8;

/// 署名用アイデンティティの能力インターフェース。
pub trait IdentitySigner: Send + Sync {
    /// 署名アルゴリズムを返す。
    fn algorithm(&self) -> SigningAlgorithm;

    /// 公開アイデンティティ（署名アドレス）を返す。鍵ペアに対して決定的。
    fn signing_address(&self) -> String;

    /// Quoteに埋め込むreport data（指紋32バイト + ゼロ32バイト）を返す。
    fn report_data(&self) -> ReportData;

    /// コンテンツに署名し、アルゴリズム固有の表現で返す。
    fn sign(&self, content: &str) -> Result<String, CryptoError>;
}

impl fmt::Debug for dyn IdentitySigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentitySigner")
            .field("algorithm", &self.algorithm())
            .field("signing_address", &self.signing_address())
            .finish_non_exhaustive()
    }
}

/// 新しい鍵ペアを生成する。
///
/// 乱数源の失敗は `EntropyFailure` として即座に返す（リトライしない）。
pub fn generate_identity(
    algorithm: SigningAlgorithm,
) -> Result<Box<dyn IdentitySigner>, CryptoError> {
    match algorithm {
        SigningAlgorithm::Ed25519 => Ok(Box::new(Ed25519Identity::generate()?)),
        SigningAlgorithm::Ecdsa => Ok(Box::new(EcdsaIdentity::generate()?)),
    }
}

fn fresh_seed() -> Result<[u8; 32], CryptoError> {
    let mut seed = [0u8; 32];
    rand::rngs::OsRng
        .try_fill_bytes(&mut seed)
        .map_err(|e| CryptoError::EntropyFailure(e.to_string()))?;
    Ok(seed)
}

fn pad_fingerprint(fingerprint: &[u8; 32]) -> ReportData {
    let mut report_data = [0u8; REPORT_DATA_SIZE];
    report_data[..32].copy_from_slice(fingerprint);
    report_data
}

// ─────────────────────────────────────────────
// Ed25519
// ─────────────────────────────────────────────

/// Ed25519アイデンティティ。
pub struct Ed25519Identity {
    key: SigningKey,
}

impl Ed25519Identity {
    /// OS乱数源から鍵ペアを生成する。
    pub fn generate() -> Result<Self, CryptoError> {
        let seed = fresh_seed()?;
        Ok(Self {
            key: SigningKey::from_bytes(&seed),
        })
    }

    /// 公開鍵を返す。
    pub fn verifying_key(&self) -> VerifyingKey {
        self.key.verifying_key()
    }
}

impl IdentitySigner for Ed25519Identity {
    fn algorithm(&self) -> SigningAlgorithm {
        SigningAlgorithm::Ed25519
    }

    fn signing_address(&self) -> String {
        hex::encode(self.key.verifying_key().to_bytes())
    }

    fn report_data(&self) -> ReportData {
        pad_fingerprint(&self.key.verifying_key().to_bytes())
    }

    fn sign(&self, content: &str) -> Result<String, CryptoError> {
        let signature = self.key.sign(content.as_bytes());
        Ok(hex::encode(signature.to_bytes()))
    }
}

// ─────────────────────────────────────────────
// ECDSA (secp256k1, Ethereum personal-sign)
// ─────────────────────────────────────────────

/// secp256k1アイデンティティ。アドレスと指紋は生成時に一度だけ計算する。
pub struct EcdsaIdentity {
    key: k256::ecdsa::SigningKey,
    fingerprint: [u8; 32],
    address: [u8; ethereum::ADDRESS_SIZE],
}

impl EcdsaIdentity {
    /// OS乱数源から鍵ペアを生成する。
    pub fn generate() -> Result<Self, CryptoError> {
        for _ in 0..MAX_SEED_ATTEMPTS {
            let seed = fresh_seed()?;
            // ゼロまたは群位数以上のシードは引き直す
            if let Ok(key) = k256::ecdsa::SigningKey::from_slice(&seed) {
                return Ok(Self::from_signing_key(key));
            }
        }
        Err(CryptoError::KeyError(
            "secp256k1の有効なスカラーを生成できませんでした".into(),
        ))
    }

    fn from_signing_key(key: k256::ecdsa::SigningKey) -> Self {
        let fingerprint = ethereum::public_key_fingerprint(key.verifying_key());
        let address = ethereum::address_from_verifying_key(key.verifying_key());
        Self {
            key,
            fingerprint,
            address,
        }
    }
}

impl IdentitySigner for EcdsaIdentity {
    fn algorithm(&self) -> SigningAlgorithm {
        SigningAlgorithm::Ecdsa
    }

    fn signing_address(&self) -> String {
        ethereum::to_checksum_address(&self.address)
    }

    fn report_data(&self) -> ReportData {
        pad_fingerprint(&self.fingerprint)
    }

    fn sign(&self, content: &str) -> Result<String, CryptoError> {
        let digest = ethereum::personal_message_hash(content.as_bytes());
        let (signature, recovery_id) = self
            .key
            .sign_prehash_recoverable(&digest)
            .map_err(|e| CryptoError::SigningFailed(e.to_string()))?;

        let mut out = [0u8; ethereum::RECOVERABLE_SIGNATURE_SIZE];
        out[..64].copy_from_slice(&signature.to_bytes());
        out[64] = 27 + recovery_id.to_byte();
        Ok(format!("0x{}", hex::encode(out)))
    }
}

// ─────────────────────────────────────────────
// 検証
// ─────────────────────────────────────────────

/// `signature` が `signing_address` によって `content` に対し生成されたか検証する。
///
/// 不正な入力は全て `false` を返す（エラーにしない）。
pub fn verify_signature(
    algorithm: SigningAlgorithm,
    signing_address: &str,
    signature: &str,
    content: &str,
) -> bool {
    match algorithm {
        SigningAlgorithm::Ed25519 => verify_ed25519(signing_address, signature, content),
        SigningAlgorithm::Ecdsa => verify_ecdsa(signing_address, signature, content),
    }
}

fn verify_ed25519(signing_address: &str, signature: &str, content: &str) -> bool {
    let Some(pubkey) = decode_hex(signing_address)
        .ok()
        .and_then(|b| <[u8; 32]>::try_from(b).ok())
    else {
        return false;
    };
    let Some(sig) = decode_hex(signature)
        .ok()
        .and_then(|b| <[u8; 64]>::try_from(b).ok())
    else {
        return false;
    };
    let Ok(verifying_key) = VerifyingKey::from_bytes(&pubkey) else {
        return false;
    };
    let sig = ed25519_dalek::Signature::from_bytes(&sig);
    verifying_key.verify_strict(content.as_bytes(), &sig).is_ok()
}

fn verify_ecdsa(signing_address: &str, signature: &str, content: &str) -> bool {
    let Some(expected) = ethereum::parse_address(signing_address) else {
        return false;
    };
    let Ok(sig) = decode_hex(signature) else {
        return false;
    };
    ethereum::recover_address(content.as_bytes(), &sig) == Some(expected)
}

/// report dataが署名アドレスを束縛しているか確認する。
///
/// - Ed25519: 先頭32バイトがアドレス（公開鍵）と一致
/// - ECDSA: 先頭32バイト（keccak指紋）の下位20バイトがアドレスと一致
///
/// いずれも後半32バイトはゼロでなければならない。
pub fn report_data_binds_address(
    algorithm: SigningAlgorithm,
    signing_address: &str,
    report_data: &ReportData,
) -> bool {
    if report_data[32..].iter().any(|&b| b != 0) {
        return false;
    }
    match algorithm {
        SigningAlgorithm::Ed25519 => decode_hex(signing_address)
            .map(|pk| pk.len() == 32 && pk[..] == report_data[..32])
            .unwrap_or(false),
        SigningAlgorithm::Ecdsa => ethereum::parse_address(signing_address)
            .map(|addr| addr[..] == report_data[32 - ethereum::ADDRESS_SIZE..32])
            .unwrap_or(false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALGORITHMS: [SigningAlgorithm; 2] = [SigningAlgorithm::Ed25519, SigningAlgorithm::Ecdsa];

    /// 全アルゴリズムで署名→検証が成功すること
    #[test]
    fn test_sign_verify_roundtrip() {
        for algorithm in ALGORITHMS {
            let identity = generate_identity(algorithm).unwrap();
            let content = "The model is X.";
            let signature = identity.sign(content).unwrap();
            assert!(
                verify_signature(algorithm, &identity.signing_address(), &signature, content),
                "{algorithm} の署名検証に失敗"
            );
        }
    }

    /// コンテンツを1文字でも変えると検証が失敗すること
    #[test]
    fn test_mutated_content_fails() {
        for algorithm in ALGORITHMS {
            let identity = generate_identity(algorithm).unwrap();
            let content = "The model is X.";
            let signature = identity.sign(content).unwrap();
            let address = identity.signing_address();

            for i in 0..content.len() {
                let mut bytes = content.as_bytes().to_vec();
                bytes[i] ^= 0x01;
                let mutated = String::from_utf8(bytes).unwrap();
                assert!(!verify_signature(algorithm, &address, &signature, &mutated));
            }
            // 末尾の空白追加も不一致
            assert!(!verify_signature(algorithm, &address, &signature, "The model is X. "));
        }
    }

    /// 署名のどのバイトを変えても検証が失敗すること
    #[test]
    fn test_mutated_signature_fails() {
        for algorithm in ALGORITHMS {
            let identity = generate_identity(algorithm).unwrap();
            let content = "hello attested world";
            let signature = identity.sign(content).unwrap();
            let address = identity.signing_address();

            let prefix = if algorithm == SigningAlgorithm::Ecdsa { "0x" } else { "" };
            let raw = decode_hex(&signature).unwrap();
            for i in 0..raw.len() {
                let mut mutated = raw.clone();
                mutated[i] ^= 0x01;
                let mutated = format!("{prefix}{}", hex::encode(&mutated));
                assert!(
                    !verify_signature(algorithm, &address, &mutated, content),
                    "{algorithm}: 署名の{i}バイト目の改変が検出されない"
                );
            }
        }
    }

    /// 別のアドレスでは検証が失敗すること
    #[test]
    fn test_other_address_fails() {
        for algorithm in ALGORITHMS {
            let signer = generate_identity(algorithm).unwrap();
            let other = generate_identity(algorithm).unwrap();
            let signature = signer.sign("content").unwrap();
            assert!(!verify_signature(
                algorithm,
                &other.signing_address(),
                &signature,
                "content"
            ));
        }
    }

    /// アルゴリズムを取り違えた検証は失敗すること
    #[test]
    fn test_cross_algorithm_fails() {
        let ed = generate_identity(SigningAlgorithm::Ed25519).unwrap();
        let sig = ed.sign("x").unwrap();
        assert!(!verify_signature(SigningAlgorithm::Ecdsa, &ed.signing_address(), &sig, "x"));

        let ec = generate_identity(SigningAlgorithm::Ecdsa).unwrap();
        let sig = ec.sign("x").unwrap();
        assert!(!verify_signature(SigningAlgorithm::Ed25519, &ec.signing_address(), &sig, "x"));
    }

    #[test]
    fn test_encodings() {
        let ed = generate_identity(SigningAlgorithm::Ed25519).unwrap();
        assert_eq!(ed.signing_address().len(), 64);
        assert!(!ed.signing_address().starts_with("0x"));
        assert_eq!(ed.sign("a").unwrap().len(), 128);

        let ec = generate_identity(SigningAlgorithm::Ecdsa).unwrap();
        assert!(ec.signing_address().starts_with("0x"));
        assert_eq!(ec.signing_address().len(), 42);
        let sig = ec.sign("a").unwrap();
        assert!(sig.starts_with("0x"));
        assert_eq!(sig.len(), 2 + 130);
    }

    /// 署名アドレスは鍵ペアに対して決定的であること
    #[test]
    fn test_signing_address_deterministic() {
        for algorithm in ALGORITHMS {
            let identity = generate_identity(algorithm).unwrap();
            assert_eq!(identity.signing_address(), identity.signing_address());
            assert_eq!(identity.report_data(), identity.report_data());
        }
    }

    /// report dataとアドレスの束縛チェック
    #[test]
    fn test_report_data_binding() {
        for algorithm in ALGORITHMS {
            let identity = generate_identity(algorithm).unwrap();
            let other = generate_identity(algorithm).unwrap();
            let report_data = identity.report_data();

            assert!(report_data_binds_address(
                algorithm,
                &identity.signing_address(),
                &report_data
            ));
            assert!(!report_data_binds_address(
                algorithm,
                &other.signing_address(),
                &report_data
            ));

            let mut tampered = report_data;
            tampered[63] = 1;
            assert!(!report_data_binds_address(
                algorithm,
                &identity.signing_address(),
                &tampered
            ));
        }
    }

    /// Debug出力に秘密鍵が含まれないこと
    #[test]
    fn test_debug_does_not_leak_key() {
        let identity = generate_identity(SigningAlgorithm::Ecdsa).unwrap();
        let debug = format!("{:?}", identity);
        assert!(debug.contains(&identity.signing_address()));
        assert!(!debug.contains("key"));
    }
}
