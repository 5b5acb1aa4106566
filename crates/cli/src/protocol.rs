//! # 検証プロトコル
//!
//! 1. Fetch: Attested Identityを取得
//! 2. Verify quote: Quoteの構造検証と、report dataによる署名アドレスの束縛確認
//! 3. Invoke action: チャット補完を実行し相関IDを取得
//! 4. Fetch signature: 相関IDで `{text, signature}` を取得
//! 5. Verify signature: `text` への署名が署名アドレスによるものか検証
//!
//! Step 2では、期待値が与えられていれば測定値（MRTD, RTMR0〜3）の一致も確認する。
//! Step 1〜2のいずれかが失敗した場合、Step 3には進まない。
//! Quoteのハードウェア証明書チェーン検証は外部検証器に委ねる
//! （`QuoteVerification::onchain_quote_hex` をそのまま渡せる形式で返す）。

use std::collections::BTreeMap;

use base64::Engine;
use veritee_crypto::attestation::{
    onchain_quote_hex, verify_attestation, verify_measurements, TEE_TYPE_INTEL_TDX,
};
use veritee_crypto::{report_data_binds_address, sha256_hex, ReportData, SigningAlgorithm};
use veritee_types::{AttestationReport, ChatCompletionRequest};

use crate::client::ServiceClient;
use crate::error::VerifyError;

/// Step 2の結果。
#[derive(Debug, Clone)]
pub struct QuoteVerification {
    /// TEE種別
    pub tee_type: String,
    /// 署名アドレスのアルゴリズム
    pub signing_algo: SigningAlgorithm,
    /// 測定値（hex）
    pub measurements: BTreeMap<String, String>,
    /// Quoteに埋め込まれたreport data
    pub report_data: Vec<u8>,
    /// デコード済みQuote
    pub quote: Vec<u8>,
    /// 外部検証器に渡す `0x` 付きhex
    pub onchain_quote_hex: String,
}

/// プロトコル全体の結果。
#[derive(Debug, Clone)]
pub struct VerificationOutcome {
    /// Step 1で取得したレポート
    pub report: AttestationReport,
    /// Step 2の結果
    pub quote: QuoteVerification,
    /// Step 3で取得した相関ID
    pub chat_id: String,
    /// Step 4で取得した署名対象テキスト
    pub text: String,
    /// Step 4で取得した署名
    pub signature: String,
    /// Step 5の結果
    pub signature_verified: bool,
    /// 署名対象テキストが手元のリクエスト・応答のハッシュと一致するか。
    /// `text` がハッシュ対の形式でない場合はNone。
    pub response_hash_matches: Option<bool>,
}

/// Step 2: Quoteを構造検証し、report dataが署名アドレスを束縛しているか確認する。
///
/// アルゴリズムはアドレスの形式から判別する。レポートが `signing_algo` を
/// 申告している場合は判別結果と一致しなければならない。
/// `expected_measurements` が空でなければ、Quoteの測定値がすべて一致することも要求する。
/// どの検証に失敗してもエラーを返す（検証済み扱いにはしない）。
pub fn verify_attestation_report(
    report: &AttestationReport,
    expected_measurements: &BTreeMap<String, Vec<u8>>,
) -> Result<QuoteVerification, VerifyError> {
    let quote = base64::engine::general_purpose::STANDARD
        .decode(&report.intel_quote)
        .map_err(|e| VerifyError::QuoteInvalid(format!("Base64デコードに失敗: {e}")))?;

    let result = verify_attestation(TEE_TYPE_INTEL_TDX, &quote)
        .map_err(|e| VerifyError::QuoteInvalid(e.to_string()))?;
    let report_data: ReportData = result
        .report_data
        .as_slice()
        .try_into()
        .map_err(|_| VerifyError::QuoteInvalid("report dataの長さが不正です".into()))?;

    let signing_algo = SigningAlgorithm::detect(&report.signing_address)
        .ok_or_else(|| VerifyError::BindingMismatch(report.signing_address.clone()))?;
    if report.signing_algo.is_some_and(|claimed| claimed != signing_algo) {
        return Err(VerifyError::BindingMismatch(report.signing_address.clone()));
    }
    if !report_data_binds_address(signing_algo, &report.signing_address, &report_data) {
        return Err(VerifyError::BindingMismatch(report.signing_address.clone()));
    }

    if !verify_measurements(&result, expected_measurements) {
        let names: Vec<&str> = expected_measurements
            .iter()
            .filter(|(name, expected)| result.measurements.get(*name) != Some(*expected))
            .map(|(name, _)| name.as_str())
            .collect();
        return Err(VerifyError::MeasurementMismatch(names.join(", ")));
    }

    Ok(QuoteVerification {
        tee_type: result.tee_type,
        signing_algo,
        measurements: result
            .measurements
            .into_iter()
            .map(|(k, v)| (k, hex::encode(v)))
            .collect(),
        report_data: result.report_data,
        onchain_quote_hex: onchain_quote_hex(&quote),
        quote,
    })
}

/// `NAME=HEX` 形式の測定値期待値をパースする（CLIの `--expected-measurement`）。
///
/// 名前は大文字に正規化し、値は48バイトのhex（`0x` 省略可）。
pub fn parse_expected_measurement(arg: &str) -> Result<(String, Vec<u8>), String> {
    let (name, value) = arg
        .split_once('=')
        .ok_or_else(|| format!("NAME=HEX の形式で指定してください: {arg}"))?;
    let name = name.trim().to_ascii_uppercase();
    if name.is_empty() {
        return Err(format!("測定値名が空です: {arg}"));
    }
    let value = value.trim();
    let bytes = hex::decode(value.strip_prefix("0x").unwrap_or(value))
        .map_err(|e| format!("{name} のhexが不正です: {e}"))?;
    if bytes.len() != 48 {
        return Err(format!("{name} は48バイトである必要があります（{}バイト）", bytes.len()));
    }
    Ok((name, bytes))
}

/// Step 5: アルゴリズムをアドレス形式から判定して署名を検証する。
///
/// 判定できないアドレスは `false`。
pub fn verify_signature(signing_address: &str, signature: &str, text: &str) -> bool {
    match SigningAlgorithm::detect(signing_address) {
        Some(algorithm) => {
            veritee_crypto::verify_signature(algorithm, signing_address, signature, text)
        }
        None => false,
    }
}

/// 5ステップの検証プロトコル。
pub struct VerificationProtocol {
    client: ServiceClient,
    expected_measurements: BTreeMap<String, Vec<u8>>,
}

impl VerificationProtocol {
    pub fn new(client: ServiceClient) -> Self {
        Self {
            client,
            expected_measurements: BTreeMap::new(),
        }
    }

    /// Step 2で一致を要求する測定値を設定する。
    pub fn with_expected_measurements(
        mut self,
        expected_measurements: BTreeMap<String, Vec<u8>>,
    ) -> Self {
        self.expected_measurements = expected_measurements;
        self
    }

    /// 5ステップを順に実行する。
    pub async fn run(
        &self,
        request: &ChatCompletionRequest,
    ) -> Result<VerificationOutcome, VerifyError> {
        // Step 1
        let report = self.client.fetch_report(None).await?;
        tracing::info!(
            signing_address = %report.signing_address,
            signing_algo = ?report.signing_algo,
            "Step 1: レポートを取得しました"
        );

        // Step 2
        let quote = verify_attestation_report(&report, &self.expected_measurements)?;
        tracing::info!(
            tee_type = %quote.tee_type,
            signing_algo = %quote.signing_algo,
            measurements_checked = self.expected_measurements.len(),
            quote_len = quote.quote.len(),
            "Step 2: Quoteが署名アドレスを束縛していることを確認しました"
        );

        // Step 3
        let exchange = self.client.chat_completion(request).await?;
        tracing::info!(chat_id = %exchange.chat_id, "Step 3: チャット補完を実行しました");

        // Step 4
        let signature = self.client.fetch_signature(&exchange.chat_id).await?;
        tracing::info!(chat_id = %exchange.chat_id, "Step 4: 署名を取得しました");

        // Step 5: 検証はレポートで束縛されたアドレスに対して行う
        let signature_verified = signature
            .signing_address
            .eq_ignore_ascii_case(&report.signing_address)
            && verify_signature(&report.signing_address, &signature.signature, &signature.text);
        if signature_verified {
            tracing::info!("Step 5: 署名を検証しました");
        } else {
            tracing::warn!(
                claimed_address = %signature.signing_address,
                "Step 5: 署名がレポートの署名アドレスと一致しません"
            );
        }

        let response_hash_matches = signature.text.contains(':').then(|| {
            signature.text
                == format!(
                    "{}:{}",
                    sha256_hex(&exchange.request_body),
                    sha256_hex(&exchange.response_body)
                )
        });

        Ok(VerificationOutcome {
            report,
            quote,
            chat_id: exchange.chat_id,
            text: signature.text,
            signature: signature.signature,
            signature_verified,
            response_hash_matches,
        })
    }
}
