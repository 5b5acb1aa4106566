//! # Ethereum形式のアドレス導出とpersonal-sign
//!
//! - アドレス: keccak-256(非圧縮公開鍵64バイト) の下位20バイト、EIP-55チェックサム表記
//! - personal-sign: `"\x19Ethereum Signed Message:\n" + len(message) + message` のkeccak-256に署名
//! - 署名表現: `r || s || v`（65バイト、`v` は27または28）

use k256::ecdsa::{RecoveryId, Signature, VerifyingKey};
use k256::elliptic_curve::sec1::ToEncodedPoint;
use sha3::{Digest, Keccak256};

/// Ethereumアドレスのバイト長
pub const ADDRESS_SIZE: usize = 20;

/// 復元可能署名のバイト長（r || s || v）
pub const RECOVERABLE_SIGNATURE_SIZE: usize = 65;

/// keccak-256ハッシュ計算。
pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    finalize(hasher)
}

/// personal-sign規約でプレフィックスを付けたメッセージのハッシュ。
pub fn personal_message_hash(message: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(b"\x19Ethereum Signed Message:\n");
    hasher.update(message.len().to_string().as_bytes());
    hasher.update(message);
    finalize(hasher)
}

fn finalize(hasher: Keccak256) -> [u8; 32] {
    let mut out = [0u8; 32];
    out.copy_from_slice(&hasher.finalize());
    out
}

/// 公開鍵の指紋（keccak-256(非圧縮公開鍵から0x04タグを除いた64バイト)）。
pub fn public_key_fingerprint(key: &VerifyingKey) -> [u8; 32] {
    let point = key.as_affine().to_encoded_point(false);
    keccak256(&point.as_bytes()[1..])
}

/// 公開鍵からEthereumアドレス（20バイト）を導出する。
pub fn address_from_verifying_key(key: &VerifyingKey) -> [u8; ADDRESS_SIZE] {
    let fingerprint = public_key_fingerprint(key);
    let mut address = [0u8; ADDRESS_SIZE];
    address.copy_from_slice(&fingerprint[32 - ADDRESS_SIZE..]);
    address
}

/// EIP-55チェックサム付きの `0x` 表記を返す。
pub fn to_checksum_address(address: &[u8; ADDRESS_SIZE]) -> String {
    let lower = hex::encode(address);
    let hash = keccak256(lower.as_bytes());
    let mut out = String::with_capacity(2 + lower.len());
    out.push_str("0x");
    for (i, c) in lower.chars().enumerate() {
        let nibble = (hash[i / 2] >> (if i % 2 == 0 { 4 } else { 0 })) & 0x0f;
        if c.is_ascii_alphabetic() && nibble >= 8 {
            out.push(c.to_ascii_uppercase());
        } else {
            out.push(c);
        }
    }
    out
}

/// `0x` 表記のアドレスをバイト列にパースする（大文字小文字は区別しない）。
pub fn parse_address(value: &str) -> Option<[u8; ADDRESS_SIZE]> {
    let bytes = crate::decode_hex(value).ok()?;
    bytes.try_into().ok()
}

/// personal-sign署名から署名者アドレスを復元する。
///
/// 不正な署名（長さ、`v` 値、曲線上にない点等）の場合は `None`。
pub fn recover_address(message: &[u8], signature: &[u8]) -> Option<[u8; ADDRESS_SIZE]> {
    if signature.len() != RECOVERABLE_SIGNATURE_SIZE {
        return None;
    }
    let v = signature[64];
    let recovery_byte = match v {
        27 | 28 => v - 27,
        0 | 1 => v,
        _ => return None,
    };
    let recovery_id = RecoveryId::from_byte(recovery_byte)?;
    let sig = Signature::from_slice(&signature[..64]).ok()?;
    let digest = personal_message_hash(message);
    let key = VerifyingKey::recover_from_prehash(&digest, &sig, recovery_id).ok()?;
    Some(address_from_verifying_key(&key))
}

#[cfg(test)]
mod tests {
    use super::*;
    use k256::ecdsa::SigningKey;

    #[test]
    fn test_keccak256_empty() {
        assert_eq!(
            hex::encode(keccak256(b"")),
            "c5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a470"
        );
    }

    /// EIP-55の公式テストベクタ
    #[test]
    fn test_checksum_address_eip55_vector() {
        let addr = parse_address("0x5aaeb6053f3e94c9b9a09f33669435e7ef1beaed").unwrap();
        assert_eq!(
            to_checksum_address(&addr),
            "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed"
        );
    }

    /// 秘密鍵1に対応するよく知られたアドレス
    #[test]
    fn test_address_from_private_key_one() {
        let mut scalar = [0u8; 32];
        scalar[31] = 1;
        let key = SigningKey::from_slice(&scalar).unwrap();
        let addr = address_from_verifying_key(key.verifying_key());
        assert_eq!(
            to_checksum_address(&addr),
            "0x7E5F4552091A69125d5DfCb7b8C2659029395Bdf"
        );
    }

    #[test]
    fn test_recover_rejects_bad_recovery_byte() {
        let mut sig = [1u8; RECOVERABLE_SIGNATURE_SIZE];
        sig[64] = 29;
        assert!(recover_address(b"hello", &sig).is_none());
        assert!(recover_address(b"hello", &sig[..64]).is_none());
    }

    #[test]
    fn test_personal_message_hash_depends_on_length_prefix() {
        assert_ne!(personal_message_hash(b"ab"), keccak256(b"ab"));
        assert_ne!(personal_message_hash(b"ab"), personal_message_hash(b"abc"));
    }
}
