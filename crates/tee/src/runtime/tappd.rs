//! # dstack tappd クライアント
//!
//! CVM内の特権エンドポイント（tappd）からTDX Quoteと環境情報を取得する。
//!
//! ## 接続先
//! - unixソケット（デフォルト `/var/run/tappd.sock`）: HTTP/1.1を直接書き込む
//! - `http(s)://` URL: シミュレーター等。reqwestで送信
//!
//! ## API
//! ```text
//! POST /prpc/Tappd.TdxQuote?json  {"report_data": hex, "hash_algorithm": "raw"}
//!   → {"quote": hex, "event_log": "<JSON文字列>"}
//! POST /prpc/Tappd.Info?json      {"report_data": hex}
//!   → 環境情報JSON
//! ```
//!
//! `hash_algorithm = "raw"` を指定するため、report dataはハッシュされずに
//! そのままQuoteに埋め込まれる。

use std::path::PathBuf;

use serde::Deserialize;
use veritee_crypto::ReportData;

use super::{AttestationClient, AttestationClientError, QuoteResponse};

/// tappdのデフォルトunixソケットパス
pub const DEFAULT_TAPPD_SOCKET: &str = "/var/run/tappd.sock";

const QUOTE_PATH: &str = "/prpc/Tappd.TdxQuote?json";
const INFO_PATH: &str = "/prpc/Tappd.Info?json";

/// tappdの接続方式
enum Transport {
    /// unixソケット
    Unix(PathBuf),
    /// HTTP（シミュレーター用）
    Http {
        base_url: String,
        client: reqwest::Client,
    },
}

/// `Tappd.TdxQuote` の応答
#[derive(Deserialize)]
struct TdxQuoteResponse {
    /// hexエンコードされたQuote
    quote: String,
    /// JSON文字列化されたイベントログ
    #[serde(default)]
    event_log: Option<String>,
}

/// dstack tappdクライアント。
pub struct TappdClient {
    transport: Transport,
}

impl TappdClient {
    /// エンドポイント文字列からクライアントを構築する。
    ///
    /// `http://` / `https://` で始まる場合はHTTP、それ以外はunixソケットパスとして扱う。
    pub fn new(endpoint: &str) -> Self {
        let transport = if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
            Transport::Http {
                base_url: endpoint.trim_end_matches('/').to_string(),
                client: reqwest::Client::new(),
            }
        } else {
            Transport::Unix(PathBuf::from(endpoint))
        };
        Self { transport }
    }

    async fn post_json(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<Vec<u8>, AttestationClientError> {
        let body = serde_json::to_vec(body)
            .map_err(|e| AttestationClientError::InvalidResponse(e.to_string()))?;

        let (status, resp_body) = match &self.transport {
            Transport::Http { base_url, client } => {
                let resp = client
                    .post(format!("{base_url}{path}"))
                    .header("Content-Type", "application/json")
                    .body(body)
                    .send()
                    .await
                    .map_err(|e| AttestationClientError::Unavailable(e.to_string()))?;
                let status = resp.status().as_u16();
                let bytes = resp
                    .bytes()
                    .await
                    .map_err(|e| AttestationClientError::Unavailable(e.to_string()))?;
                (status, bytes.to_vec())
            }
            Transport::Unix(socket) => unix_http_post(socket, path, &body)
                .await
                .map_err(|e| {
                    AttestationClientError::Unavailable(format!("{}: {e}", socket.display()))
                })?,
        };

        if !(200..300).contains(&status) {
            return Err(AttestationClientError::Unavailable(format!(
                "{path} がHTTP {status} を返しました: {}",
                String::from_utf8_lossy(&resp_body)
            )));
        }
        Ok(resp_body)
    }
}

#[async_trait::async_trait]
impl AttestationClient for TappdClient {
    fn tee_type(&self) -> &str {
        veritee_crypto::attestation::TEE_TYPE_INTEL_TDX
    }

    async fn get_quote(
        &self,
        report_data: &ReportData,
    ) -> Result<QuoteResponse, AttestationClientError> {
        let request = serde_json::json!({
            "report_data": hex::encode(report_data),
            "hash_algorithm": "raw",
        });
        let body = self.post_json(QUOTE_PATH, &request).await?;

        let response: TdxQuoteResponse = serde_json::from_slice(&body)
            .map_err(|e| AttestationClientError::InvalidResponse(format!("TdxQuote: {e}")))?;
        let quote = veritee_crypto::decode_hex(&response.quote)
            .map_err(|e| AttestationClientError::InvalidResponse(format!("quote: {e}")))?;
        let event_log = match response.event_log {
            Some(raw) => serde_json::from_str(&raw)
                .map_err(|e| AttestationClientError::InvalidResponse(format!("event_log: {e}")))?,
            None => serde_json::Value::Null,
        };

        Ok(QuoteResponse { quote, event_log })
    }

    async fn get_info(
        &self,
        report_data: &ReportData,
    ) -> Result<serde_json::Value, AttestationClientError> {
        let request = serde_json::json!({ "report_data": hex::encode(report_data) });
        let body = self.post_json(INFO_PATH, &request).await?;
        serde_json::from_slice(&body)
            .map_err(|e| AttestationClientError::InvalidResponse(format!("Info: {e}")))
    }
}

// ─────────────────────────────────────────────
// unixソケット上のHTTP/1.1
// ─────────────────────────────────────────────

/// unixソケットにHTTP/1.1 POSTを1回送信し、(ステータス, ボディ) を返す。
/// `Connection: close` を指定し、EOFまで読み取る。
#[cfg(unix)]
async fn unix_http_post(
    socket: &std::path::Path,
    path: &str,
    body: &[u8],
) -> Result<(u16, Vec<u8>), std::io::Error> {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let mut stream = tokio::net::UnixStream::connect(socket).await?;

    let head = format!(
        "POST {path} HTTP/1.1\r\nHost: localhost\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        body.len()
    );
    stream.write_all(head.as_bytes()).await?;
    stream.write_all(body).await?;
    stream.flush().await?;

    let mut raw = Vec::new();
    stream.read_to_end(&mut raw).await?;
    parse_http_response(&raw)
}

#[cfg(not(unix))]
async fn unix_http_post(
    socket: &std::path::Path,
    _path: &str,
    _body: &[u8],
) -> Result<(u16, Vec<u8>), std::io::Error> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        format!("unixソケットは未対応のプラットフォームです: {}", socket.display()),
    ))
}

fn invalid_data(msg: &str) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::InvalidData, msg.to_string())
}

/// 生のHTTP/1.1レスポンスをステータスとボディに分解する。
/// `Transfer-Encoding: chunked` と `Content-Length` に対応する。
fn parse_http_response(raw: &[u8]) -> Result<(u16, Vec<u8>), std::io::Error> {
    let split = raw
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .ok_or_else(|| invalid_data("HTTPヘッダーの終端がありません"))?;
    let head = std::str::from_utf8(&raw[..split])
        .map_err(|_| invalid_data("HTTPヘッダーがUTF-8ではありません"))?;
    let body = &raw[split + 4..];

    let mut lines = head.split("\r\n");
    let status_line = lines.next().unwrap_or_default();
    let status = status_line
        .split_whitespace()
        .nth(1)
        .and_then(|s| s.parse::<u16>().ok())
        .ok_or_else(|| invalid_data("HTTPステータス行が不正です"))?;

    let mut chunked = false;
    let mut content_length = None;
    for line in lines {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let name = name.trim().to_ascii_lowercase();
        let value = value.trim();
        if name == "transfer-encoding" && value.to_ascii_lowercase().contains("chunked") {
            chunked = true;
        } else if name == "content-length" {
            content_length = value.parse::<usize>().ok();
        }
    }

    let body = if chunked {
        decode_chunked(body)?
    } else if let Some(len) = content_length {
        if body.len() < len {
            return Err(invalid_data("HTTPボディがContent-Lengthより短いです"));
        }
        body[..len].to_vec()
    } else {
        body.to_vec()
    };
    Ok((status, body))
}

fn decode_chunked(mut data: &[u8]) -> Result<Vec<u8>, std::io::Error> {
    let mut out = Vec::new();
    loop {
        let line_end = data
            .windows(2)
            .position(|w| w == b"\r\n")
            .ok_or_else(|| invalid_data("chunkサイズ行が不正です"))?;
        let size_str = std::str::from_utf8(&data[..line_end])
            .map_err(|_| invalid_data("chunkサイズがUTF-8ではありません"))?;
        let size_hex = size_str.split(';').next().unwrap_or_default().trim();
        let size = usize::from_str_radix(size_hex, 16)
            .map_err(|_| invalid_data("chunkサイズが16進数ではありません"))?;
        data = &data[line_end + 2..];
        if size == 0 {
            return Ok(out);
        }
        if data.len() < size + 2 {
            return Err(invalid_data("chunkが途中で切れています"));
        }
        out.extend_from_slice(&data[..size]);
        data = &data[size + 2..];
    }
}
