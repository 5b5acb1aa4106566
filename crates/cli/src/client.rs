//! # サービスクライアント
//!
//! TEEサーバーの3つのエンドポイントを呼び出す薄いHTTPクライアント。
//! リトライ・タイムアウトは持たない。

use veritee_types::{AttestationReport, ChatCompletionRequest, SignatureResponse, SigningAlgorithm};

use crate::error::VerifyError;

/// チャット補完の実行結果。
#[derive(Debug, Clone)]
pub struct ChatExchange {
    /// 応答から取り出した相関ID
    pub chat_id: String,
    /// 送信したリクエスト本文（バイト列そのまま）
    pub request_body: Vec<u8>,
    /// 受信した応答本文（バイト列そのまま）
    pub response_body: Vec<u8>,
}

/// TEEサーバーへのHTTPクライアント。
#[derive(Debug, Clone)]
pub struct ServiceClient {
    base_url: String,
    http_client: reqwest::Client,
}

impl ServiceClient {
    pub fn new(base_url: &str) -> Self {
        Self::with_client(base_url, reqwest::Client::new())
    }

    /// 既存のreqwestクライアントを使う（タイムアウト等は呼び出し側で設定）。
    pub fn with_client(base_url: &str, http_client: reqwest::Client) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http_client,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Step 1: Attested Identityを取得する。
    pub async fn fetch_report(
        &self,
        signing_algo: Option<SigningAlgorithm>,
    ) -> Result<AttestationReport, VerifyError> {
        let url = format!("{}/v1/attestation/report", self.base_url);
        let mut request = self.http_client.get(&url);
        if let Some(algo) = signing_algo {
            request = request.query(&[("signing_algo", algo.as_str())]);
        }
        let response = request
            .send()
            .await
            .map_err(|e| VerifyError::Http(format!("レポート取得に失敗: {e}")))?;
        let body = read_success(response).await?;
        serde_json::from_slice(&body)
            .map_err(|e| VerifyError::InvalidResponse(format!("レポートのパースに失敗: {e}")))
    }

    /// Step 3: チャット補完を実行し、相関IDと本文を取得する。
    pub async fn chat_completion(
        &self,
        request: &ChatCompletionRequest,
    ) -> Result<ChatExchange, VerifyError> {
        let request_body = serde_json::to_vec(request)
            .map_err(|e| VerifyError::InvalidResponse(format!("リクエストのシリアライズに失敗: {e}")))?;

        let url = format!("{}/v1/chat/completions", self.base_url);
        let response = self
            .http_client
            .post(&url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(request_body.clone())
            .send()
            .await
            .map_err(|e| VerifyError::Http(format!("チャット補完に失敗: {e}")))?;
        let response_body = read_success(response).await?;

        let chat_id = first_chunk_id(&response_body).ok_or_else(|| {
            VerifyError::InvalidResponse("応答に相関IDが含まれていません".into())
        })?;

        Ok(ChatExchange {
            chat_id,
            request_body,
            response_body,
        })
    }

    /// 署名取得URL。相関IDは1つのパスセグメントとしてパーセントエンコードする。
    fn signature_url(&self, chat_id: &str) -> Result<reqwest::Url, VerifyError> {
        let mut url = reqwest::Url::parse(&self.base_url)
            .map_err(|e| VerifyError::Http(format!("ベースURLが不正です: {e}")))?;
        url.path_segments_mut()
            .map_err(|_| VerifyError::Http(format!("ベースURLが不正です: {}", self.base_url)))?
            .pop_if_empty()
            .extend(["v1", "signature", chat_id]);
        Ok(url)
    }

    /// Step 4: 相関IDに紐づく署名を取得する。
    pub async fn fetch_signature(&self, chat_id: &str) -> Result<SignatureResponse, VerifyError> {
        let url = self.signature_url(chat_id)?;
        let response = self
            .http_client
            .get(url)
            .send()
            .await
            .map_err(|e| VerifyError::Http(format!("署名取得に失敗: {e}")))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(VerifyError::CorrelationNotFound(chat_id.to_string()));
        }
        let body = read_success(response).await?;
        serde_json::from_slice(&body)
            .map_err(|e| VerifyError::InvalidResponse(format!("署名のパースに失敗: {e}")))
    }
}

async fn read_success(response: reqwest::Response) -> Result<Vec<u8>, VerifyError> {
    let status = response.status();
    let body = response
        .bytes()
        .await
        .map_err(|e| VerifyError::Http(format!("応答の読み取りに失敗: {e}")))?;
    if !status.is_success() {
        return Err(VerifyError::UnexpectedStatus {
            status: status.as_u16(),
            body: String::from_utf8_lossy(&body).into_owned(),
        });
    }
    Ok(body.to_vec())
}

/// 最初の構造化チャンクから `id` を取り出す（SSEまたはJSON）。
fn first_chunk_id(body: &[u8]) -> Option<String> {
    let text = std::str::from_utf8(body).ok()?;
    let id_of = |value: serde_json::Value| {
        value
            .get("id")
            .and_then(serde_json::Value::as_str)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
    };

    text.lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(str::trim)
        .filter(|data| *data != "[DONE]")
        .filter_map(|data| serde_json::from_str(data).ok())
        .find_map(id_of)
        .or_else(|| serde_json::from_str(text).ok().and_then(id_of))
}
