//! # ローカル開発用モックAttestationクライアント
//!
//! TEEハードウェアが利用できない開発環境で使用するモック実装。
//! report dataを埋め込んだ合成TDX Quote（ハードウェア署名なし）を返す。
//! 測定値は全てゼロ。

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use veritee_crypto::attestation::{build_mock_tdx_quote, TEE_TYPE_INTEL_TDX};
use veritee_crypto::ReportData;

use super::{AttestationClient, AttestationClientError, QuoteResponse};

/// モックAttestationクライアント。ローカル開発・テスト用。
pub struct MockAttestationClient {
    /// get_quoteの呼び出し回数
    quote_calls: AtomicUsize,
    /// trueの場合get_quoteが失敗する
    fail_quote: AtomicBool,
    /// trueの場合get_infoが失敗する
    fail_info: AtomicBool,
    /// get_quoteの応答前に挟む待ち時間
    latency: Duration,
}

impl MockAttestationClient {
    /// MockAttestationClientを初期化する。
    pub fn new() -> Self {
        Self::with_latency(Duration::ZERO)
    }

    /// get_quoteに人工的な待ち時間を入れる（並行初期化テスト用）。
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            quote_calls: AtomicUsize::new(0),
            fail_quote: AtomicBool::new(false),
            fail_info: AtomicBool::new(false),
            latency,
        }
    }

    /// get_quoteの呼び出し回数を返す。
    #[cfg(test)]
    pub fn quote_calls(&self) -> usize {
        self.quote_calls.load(Ordering::SeqCst)
    }

    /// get_quoteを失敗させるか設定する。
    #[cfg(test)]
    pub fn set_fail_quote(&self, fail: bool) {
        self.fail_quote.store(fail, Ordering::SeqCst);
    }

    /// get_infoを失敗させるか設定する。
    #[cfg(test)]
    pub fn set_fail_info(&self, fail: bool) {
        self.fail_info.store(fail, Ordering::SeqCst);
    }
}

impl Default for MockAttestationClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl AttestationClient for MockAttestationClient {
    fn tee_type(&self) -> &str {
        TEE_TYPE_INTEL_TDX
    }

    async fn get_quote(
        &self,
        report_data: &ReportData,
    ) -> Result<QuoteResponse, AttestationClientError> {
        self.quote_calls.fetch_add(1, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        if self.fail_quote.load(Ordering::SeqCst) {
            return Err(AttestationClientError::Unavailable(
                "モック: Quote取得失敗".into(),
            ));
        }

        let quote = build_mock_tdx_quote(report_data, [0u8; 48], [[0u8; 48]; 4]);
        let event_log = serde_json::json!([
            {
                "imr": 0,
                "event_type": 1,
                "digest": hex::encode([0u8; 48]),
                "event": "mock-boot",
                "event_payload": "",
            },
            {
                "imr": 3,
                "event_type": 134217729,
                "digest": hex::encode([0u8; 48]),
                "event": "compose-hash",
                "event_payload": "",
            },
        ]);
        Ok(QuoteResponse { quote, event_log })
    }

    async fn get_info(
        &self,
        report_data: &ReportData,
    ) -> Result<serde_json::Value, AttestationClientError> {
        if self.fail_info.load(Ordering::SeqCst) {
            return Err(AttestationClientError::Unavailable(
                "モック: Info取得失敗".into(),
            ));
        }
        Ok(serde_json::json!({
            "app_id": "mock-app",
            "instance_id": "mock-instance",
            "app_name": "veritee",
            "report_data": hex::encode(report_data),
            "tcb_info": "{\"mrtd\":\"00\",\"rtmr0\":\"00\"}",
        }))
    }
}
