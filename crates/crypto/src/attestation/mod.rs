//! # Attestation Quote 構造検証
//!
//! TEE種別に応じたQuoteの構造検証を提供する。
//! ハードウェアの証明書チェーンまで遡る暗号学的検証は外部検証器
//! （オンチェーンコントラクト、DCAP Quote Verification Library等）に委ねる。
//!
//! ## 対応TEE種別
//!
//! | `tee_type` | サブモジュール | Quote形式 | 測定値 |
//! |------------|--------------|----------|--------|
//! | `intel_tdx` | [`tdx`] | Intel TDX Quote v4/v5 | MRTD, RTMR0〜RTMR3 |

pub mod tdx;

use std::collections::BTreeMap;

pub use tdx::{build_mock_tdx_quote, parse_tdx_quote, TdxQuote};

/// Intel TDXのTEE種別識別子
pub const TEE_TYPE_INTEL_TDX: &str = "intel_tdx";

/// Quote検証のエラー型。
#[derive(Debug, thiserror::Error)]
pub enum AttestationError {
    /// 未対応のTEE種別
    #[error("未対応のTEE種別: {0}")]
    UnsupportedTeeType(String),
    /// Quoteの長さが不足
    #[error("Quoteが短すぎます: {0}")]
    Truncated(String),
    /// ヘッダーが不正
    #[error("Quoteヘッダーが不正です: {0}")]
    InvalidHeader(String),
}

/// TEE種別に依存しないQuote構造検証結果。
#[derive(Debug, Clone)]
pub struct AttestationResult {
    /// TEE種別（`"intel_tdx"`）
    pub tee_type: String,
    /// 測定値マップ（Intel TDX: `"MRTD"`, `"RTMR0"` 〜 `"RTMR3"`、各48バイト）
    pub measurements: BTreeMap<String, Vec<u8>>,
    /// Quoteに埋め込まれたreport data（64バイト）
    pub report_data: Vec<u8>,
}

/// `tee_type` に応じてQuoteを構造検証し、共通結果を返す。
pub fn verify_attestation(
    tee_type: &str,
    document: &[u8],
) -> Result<AttestationResult, AttestationError> {
    match tee_type {
        TEE_TYPE_INTEL_TDX => {
            let quote = tdx::parse_tdx_quote(document)?;
            Ok(quote.into())
        }
        other => Err(AttestationError::UnsupportedTeeType(other.into())),
    }
}

/// 測定値が期待値と一致するか確認する。
pub fn verify_measurements(
    result: &AttestationResult,
    expected_measurements: &BTreeMap<String, Vec<u8>>,
) -> bool {
    expected_measurements.iter().all(|(key, expected)| {
        result
            .measurements
            .get(key)
            .map_or(false, |actual| actual == expected)
    })
}

/// 外部検証器（オンチェーン `verifyAndAttestOnChain` 等）に渡す `0x` 付きhex表現。
pub fn onchain_quote_hex(quote: &[u8]) -> String {
    format!("0x{}", hex::encode(quote))
}

impl From<TdxQuote> for AttestationResult {
    fn from(quote: TdxQuote) -> Self {
        let mut measurements = BTreeMap::new();
        measurements.insert("MRTD".to_string(), quote.mrtd.to_vec());
        for (idx, rtmr) in quote.rtmrs.iter().enumerate() {
            measurements.insert(format!("RTMR{}", idx), rtmr.to_vec());
        }
        Self {
            tee_type: TEE_TYPE_INTEL_TDX.to_string(),
            measurements,
            report_data: quote.report_data.to_vec(),
        }
    }
}
