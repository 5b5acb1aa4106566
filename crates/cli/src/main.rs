//! # veritee-verify
//!
//! 検証プロトコルを実行し、各ステップの結果を表示する。
//! 署名が検証できなかった場合は終了コード1で終了する。

use std::collections::BTreeMap;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use veritee_cli::{parse_expected_measurement, ServiceClient, VerificationProtocol};
use veritee_types::{ChatCompletionRequest, ChatMessage};

#[derive(Parser)]
#[command(name = "veritee-verify", about = "veritee relying-party verification")]
struct Cli {
    /// TEEサーバーのベースURL
    #[arg(long, env = "VERITEE_BASE_URL", default_value = "http://127.0.0.1:8080")]
    base_url: String,
    /// チャット補完に使うモデル名
    #[arg(long)]
    model: String,
    /// 送信するプロンプト
    #[arg(long, default_value = "What model are you?")]
    prompt: String,
    /// ストリーミングを無効化する
    #[arg(long)]
    no_stream: bool,
    /// 一致を要求する測定値（`MRTD=<hex>` 等、複数指定可）
    #[arg(long = "expected-measurement", value_name = "NAME=HEX", value_parser = parse_expected_measurement)]
    expected_measurements: Vec<(String, Vec<u8>)>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let cli = Cli::parse();
    let request = ChatCompletionRequest {
        model: cli.model,
        messages: vec![ChatMessage {
            role: "user".into(),
            content: cli.prompt,
        }],
        stream: !cli.no_stream,
    };

    let expected_measurements: BTreeMap<String, Vec<u8>> =
        cli.expected_measurements.into_iter().collect();
    let measurements_checked = expected_measurements.len();
    let protocol = VerificationProtocol::new(ServiceClient::new(&cli.base_url))
        .with_expected_measurements(expected_measurements);
    let outcome = protocol.run(&request).await?;

    println!("[1] 署名アドレス: {} ({})", outcome.report.signing_address, outcome.quote.signing_algo);
    println!("[2] Quoteはreport dataで署名アドレスを束縛しています");
    println!("    TEE種別: {}", outcome.quote.tee_type);
    for (name, value) in &outcome.quote.measurements {
        println!("    {name}: {value}");
    }
    if measurements_checked > 0 {
        println!("    期待値と一致した測定値: {measurements_checked}件");
    }
    println!("    オンチェーン検証用Quote:");
    println!("    {}", outcome.quote.onchain_quote_hex);
    println!("    ハードウェア証明書チェーンの検証は、このhexを外部検証器");
    println!("    （オンチェーン verifyAndAttestOnChain 等）に渡して行ってください。");
    println!("[3] チャットID: {}", outcome.chat_id);
    println!("[4] 署名対象テキスト: {}", outcome.text);
    println!("    署名: {}", outcome.signature);
    if let Some(matches) = outcome.response_hash_matches {
        println!("    手元のリクエスト・応答ハッシュとの一致: {}", yes_no(matches));
    }
    println!("[5] 署名検証: {}", yes_no(outcome.signature_verified));

    if !outcome.signature_verified {
        std::process::exit(1);
    }
    Ok(())
}

fn yes_no(value: bool) -> &'static str {
    if value {
        "yes"
    } else {
        "no"
    }
}
