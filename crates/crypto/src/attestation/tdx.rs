//! # Intel TDX Quote 構造解析
//!
//! DCAP Quote v4/v5 のヘッダーとTD Report Bodyを解析し、
//! 測定値とreport dataを抽出する。署名・証明書チェーンの検証は行わない。
//!
//! ## Quote構造
//!
//! ```text
//! v4: [Header 48B][TD Report Body 584B][sig_data_len 4B][sig_data]
//! v5: [Header 48B][body_type 2B][body_size 4B][TD Report Body 584B/648B][sig_data_len 4B][sig_data]
//! ```
//!
//! TD Report Body内オフセット:
//! - MRTD: 136
//! - RTMR0〜RTMR3: 328〜
//! - REPORTDATA: 520（64バイト）

use super::AttestationError;
use crate::signer::{ReportData, REPORT_DATA_SIZE};

/// Quoteヘッダーのサイズ
const HEADER_SIZE: usize = 48;
/// TDX 1.0 TD Report Bodyのサイズ
const BODY_SIZE_V4: usize = 584;
/// TDX 1.5 TD Report Bodyのサイズ
const BODY_SIZE_TDX15: usize = 648;
/// v5のBody Descriptor（type 2B + size 4B）のサイズ
const BODY_DESCRIPTOR_SIZE: usize = 6;
/// 測定値1つのサイズ
const MEASUREMENT_SIZE: usize = 48;

const MRTD_OFFSET: usize = 136;
const RTMR0_OFFSET: usize = 328;
const REPORTDATA_OFFSET: usize = 520;

/// ヘッダーのtee_type（TDX）
const TEE_TYPE_TDX: u32 = 0x81;
/// ヘッダーのatt_key_type（ECDSA-P256）
const ATT_KEY_TYPE_P256: u16 = 2;

/// 解析済みのTDX Quote。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TdxQuote {
    /// Quoteバージョン（4または5）
    pub version: u16,
    /// MRTD（TDの初期イメージ測定値）
    pub mrtd: [u8; MEASUREMENT_SIZE],
    /// RTMR0〜RTMR3（実行時測定レジスタ）
    pub rtmrs: [[u8; MEASUREMENT_SIZE]; 4],
    /// report data（64バイト）
    pub report_data: ReportData,
}

/// TDX Quoteを構造検証し、測定値とreport dataを抽出する。
///
/// 検証手順:
/// 1. ヘッダー（バージョン、TEE種別、鍵種別）
/// 2. TD Report Bodyの長さ（v5はBody Descriptorを経由）
/// 3. 署名データ長が残りのバイト数に収まること
pub fn parse_tdx_quote(quote: &[u8]) -> Result<TdxQuote, AttestationError> {
    if quote.len() < HEADER_SIZE {
        return Err(AttestationError::Truncated(format!(
            "ヘッダーに{HEADER_SIZE}バイト必要ですが{}バイトしかありません",
            quote.len()
        )));
    }

    let version = read_u16(quote, 0);
    let att_key_type = read_u16(quote, 2);
    let tee_type = read_u32(quote, 4);

    if tee_type != TEE_TYPE_TDX {
        return Err(AttestationError::InvalidHeader(format!(
            "TEE種別が0x{TEE_TYPE_TDX:02X}ではありません: 0x{tee_type:08X}"
        )));
    }
    if att_key_type != ATT_KEY_TYPE_P256 {
        return Err(AttestationError::InvalidHeader(format!(
            "未対応のattestation鍵種別: {att_key_type}"
        )));
    }

    let (body_start, body_size) = match version {
        4 => (HEADER_SIZE, BODY_SIZE_V4),
        5 => {
            require_len(quote, HEADER_SIZE + BODY_DESCRIPTOR_SIZE, "Body Descriptor")?;
            let body_size = read_u32(quote, HEADER_SIZE + 2) as usize;
            if body_size != BODY_SIZE_V4 && body_size != BODY_SIZE_TDX15 {
                return Err(AttestationError::InvalidHeader(format!(
                    "未対応のTD Report Bodyサイズ: {body_size}"
                )));
            }
            (HEADER_SIZE + BODY_DESCRIPTOR_SIZE, body_size)
        }
        other => {
            return Err(AttestationError::InvalidHeader(format!(
                "未対応のQuoteバージョン: {other}"
            )))
        }
    };

    let body_end = body_start + body_size;
    require_len(quote, body_end + 4, "TD Report Body")?;

    let sig_len = read_u32(quote, body_end) as usize;
    if quote.len() - (body_end + 4) < sig_len {
        return Err(AttestationError::Truncated(format!(
            "署名データ長{sig_len}バイトが残りのQuote長を超えています"
        )));
    }

    let body = &quote[body_start..body_end];

    let mut mrtd = [0u8; MEASUREMENT_SIZE];
    mrtd.copy_from_slice(&body[MRTD_OFFSET..MRTD_OFFSET + MEASUREMENT_SIZE]);

    let mut rtmrs = [[0u8; MEASUREMENT_SIZE]; 4];
    for (i, rtmr) in rtmrs.iter_mut().enumerate() {
        let start = RTMR0_OFFSET + i * MEASUREMENT_SIZE;
        rtmr.copy_from_slice(&body[start..start + MEASUREMENT_SIZE]);
    }

    let mut report_data = [0u8; REPORT_DATA_SIZE];
    report_data.copy_from_slice(&body[REPORTDATA_OFFSET..REPORTDATA_OFFSET + REPORT_DATA_SIZE]);

    Ok(TdxQuote {
        version,
        mrtd,
        rtmrs,
        report_data,
    })
}

/// 開発・テスト用の合成TDX Quote（v4）を構築する。
///
/// ハードウェア署名は含まない（署名データ長0）。構造検証のみ通過する。
#[doc(hidden)]
pub fn build_mock_tdx_quote(
    report_data: &ReportData,
    mrtd: [u8; MEASUREMENT_SIZE],
    rtmrs: [[u8; MEASUREMENT_SIZE]; 4],
) -> Vec<u8> {
    let mut quote = Vec::with_capacity(HEADER_SIZE + BODY_SIZE_V4 + 4);

    // Header
    quote.extend_from_slice(&4u16.to_le_bytes());
    quote.extend_from_slice(&ATT_KEY_TYPE_P256.to_le_bytes());
    quote.extend_from_slice(&TEE_TYPE_TDX.to_le_bytes());
    quote.resize(HEADER_SIZE, 0);

    // TD Report Body
    let mut body = vec![0u8; BODY_SIZE_V4];
    body[MRTD_OFFSET..MRTD_OFFSET + MEASUREMENT_SIZE].copy_from_slice(&mrtd);
    for (i, rtmr) in rtmrs.iter().enumerate() {
        let start = RTMR0_OFFSET + i * MEASUREMENT_SIZE;
        body[start..start + MEASUREMENT_SIZE].copy_from_slice(rtmr);
    }
    body[REPORTDATA_OFFSET..REPORTDATA_OFFSET + REPORT_DATA_SIZE].copy_from_slice(report_data);
    quote.extend_from_slice(&body);

    // sig_data_len = 0
    quote.extend_from_slice(&0u32.to_le_bytes());
    quote
}

fn require_len(quote: &[u8], needed: usize, what: &str) -> Result<(), AttestationError> {
    if quote.len() < needed {
        return Err(AttestationError::Truncated(format!(
            "{what}に{needed}バイト必要ですが{}バイトしかありません",
            quote.len()
        )));
    }
    Ok(())
}

fn read_u16(data: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([data[offset], data[offset + 1]])
}

fn read_u32(data: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        data[offset],
        data[offset + 1],
        data[offset + 2],
        data[offset + 3],
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_report_data() -> ReportData {
        let mut rd = [0u8; REPORT_DATA_SIZE];
        for (i, b) in rd.iter_mut().enumerate().take(32) {
            *b = i as u8;
        }
        rd
    }

    #[test]
    fn test_parse_mock_quote() {
        let rd = sample_report_data();
        let rtmrs = [[1u8; 48], [2u8; 48], [3u8; 48], [4u8; 48]];
        let quote = build_mock_tdx_quote(&rd, [9u8; 48], rtmrs);

        let parsed = parse_tdx_quote(&quote).unwrap();
        assert_eq!(parsed.version, 4);
        assert_eq!(parsed.report_data, rd);
        assert_eq!(parsed.mrtd, [9u8; 48]);
        assert_eq!(parsed.rtmrs, rtmrs);
    }

    /// v5 Quote（Body Descriptor付き）を解析できること
    #[test]
    fn test_parse_v5_quote() {
        let rd = sample_report_data();
        let v4 = build_mock_tdx_quote(&rd, [5u8; 48], [[0u8; 48]; 4]);

        let mut v5 = Vec::new();
        v5.extend_from_slice(&5u16.to_le_bytes());
        v5.extend_from_slice(&v4[2..HEADER_SIZE]);
        v5.extend_from_slice(&2u16.to_le_bytes());
        v5.extend_from_slice(&(BODY_SIZE_V4 as u32).to_le_bytes());
        v5.extend_from_slice(&v4[HEADER_SIZE..]);

        let parsed = parse_tdx_quote(&v5).unwrap();
        assert_eq!(parsed.version, 5);
        assert_eq!(parsed.report_data, rd);
        assert_eq!(parsed.mrtd, [5u8; 48]);
    }

    #[test]
    fn test_reject_truncated() {
        let quote = build_mock_tdx_quote(&[0u8; 64], [0u8; 48], [[0u8; 48]; 4]);
        assert!(matches!(
            parse_tdx_quote(&quote[..40]),
            Err(AttestationError::Truncated(_))
        ));
        assert!(matches!(
            parse_tdx_quote(&quote[..HEADER_SIZE + 100]),
            Err(AttestationError::Truncated(_))
        ));
    }

    #[test]
    fn test_reject_wrong_tee_type() {
        let mut quote = build_mock_tdx_quote(&[0u8; 64], [0u8; 48], [[0u8; 48]; 4]);
        quote[4] = 0x00; // SGX
        assert!(matches!(
            parse_tdx_quote(&quote),
            Err(AttestationError::InvalidHeader(_))
        ));
    }

    #[test]
    fn test_reject_unknown_version() {
        let mut quote = build_mock_tdx_quote(&[0u8; 64], [0u8; 48], [[0u8; 48]; 4]);
        quote[0] = 3;
        assert!(matches!(
            parse_tdx_quote(&quote),
            Err(AttestationError::InvalidHeader(_))
        ));
    }

    /// 署名データ長がQuote長を超える場合は拒否
    #[test]
    fn test_reject_oversized_signature_length() {
        let mut quote = build_mock_tdx_quote(&[0u8; 64], [0u8; 48], [[0u8; 48]; 4]);
        let len_offset = HEADER_SIZE + BODY_SIZE_V4;
        quote[len_offset..len_offset + 4].copy_from_slice(&100u32.to_le_bytes());
        assert!(matches!(
            parse_tdx_quote(&quote),
            Err(AttestationError::Truncated(_))
        ));

        quote.extend_from_slice(&[0u8; 100]);
        assert!(parse_tdx_quote(&quote).is_ok());
    }
}
