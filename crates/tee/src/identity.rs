//! # Attested Identity
//!
//! 署名用鍵ペアとTDX Quoteを1つのアイデンティティとして束ねる。
//!
//! ## 状態遷移
//! ```text
//! Uninitialized ──init──▶ Initializing ──成功──▶ Ready
//!       ▲                      │                  │
//!       └──────失敗────────────┘     init(force)  │
//!       ◀─────────────────────────────────────────┘（旧鍵を破棄してから再生成）
//! ```
//!
//! ## 不変条件
//! - 鍵ペア・署名アドレス・Quoteは常に同時に入れ替わる（部分的な状態は公開しない）
//! - 初期化はシングルフライト: 並行呼び出しでも生成シーケンスは1回だけ実行され、
//!   待機していた呼び出し側は全員その結果（失敗を含む）を受け取る
//! - 強制再初期化は書き込みロックで旧鍵を破棄するため、実行中の署名の完了を待つ

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use base64::Engine;
use veritee_crypto::{generate_identity, CryptoError, IdentitySigner, SigningAlgorithm};
use veritee_types::AttestationReport;

use crate::runtime::AttestationClient;

/// Base64エンジン（Standard）
pub(crate) fn b64() -> base64::engine::GeneralPurpose {
    base64::engine::general_purpose::STANDARD
}

/// アイデンティティ操作のエラー型。
#[derive(Debug, Clone, thiserror::Error)]
pub enum IdentityError {
    /// Ready状態になる前に署名しようとした
    #[error("アイデンティティが未初期化です")]
    NotInitialized,
    /// Quoteの取得に失敗（初期化は失敗し、Uninitializedのまま）
    #[error("Attestationを取得できません: {0}")]
    AttestationUnavailable(String),
    /// 鍵生成・署名の失敗
    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

/// 外部から観測できるライフサイクル状態。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityState {
    /// 鍵・Quoteなし
    Uninitialized,
    /// 生成シーケンス実行中
    Initializing,
    /// 署名可能
    Ready,
}

/// 初期化済みのアイデンティティ（公開情報のみ）。
#[derive(Debug, Clone, PartialEq)]
pub struct AttestedIdentity {
    /// 署名アドレス
    pub signing_address: String,
    /// 署名アルゴリズム
    pub signing_algo: SigningAlgorithm,
    /// 署名アドレスの指紋をreport dataに持つQuote
    pub quote: Vec<u8>,
    /// Quoteに付随するイベントログ
    pub event_log: serde_json::Value,
    /// 補助的な環境情報（取得失敗時はNone）
    pub info: Option<serde_json::Value>,
}

impl AttestedIdentity {
    /// 公開エンドポイント用のレポートに変換する（Quoteは Base64）。
    pub fn to_report(&self) -> AttestationReport {
        AttestationReport {
            signing_address: self.signing_address.clone(),
            signing_algo: Some(self.signing_algo),
            intel_quote: b64().encode(&self.quote),
            event_log: self.event_log.clone(),
            info: self.info.clone(),
        }
    }
}

/// 署名結果。署名とその署名者を対で返す。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedContent {
    /// アルゴリズム固有表現の署名
    pub signature: String,
    /// 署名したアドレス
    pub signing_address: String,
    /// 署名アルゴリズム
    pub signing_algo: SigningAlgorithm,
}

/// 生成シーケンス1回分の結果
type InitOutcome = Result<Arc<AttestedIdentity>, IdentityError>;

/// 鍵とQuoteの組。常にまとめて入れ替える。
struct Bound {
    signer: Box<dyn IdentitySigner>,
    identity: Arc<AttestedIdentity>,
}

/// 初期化中フラグをスコープ終了時に必ず下ろす。
struct InitializingFlag<'a>(&'a AtomicBool);

impl<'a> InitializingFlag<'a> {
    fn raise(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::SeqCst);
        Self(flag)
    }
}

impl Drop for InitializingFlag<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// 鍵ペアとQuoteを束ねたアイデンティティ。
///
/// プロセス内で1つ生成し、`Arc` で共有する。
pub struct IdentityQuote {
    /// 署名アルゴリズム（生成時に固定）
    algorithm: SigningAlgorithm,
    /// Attestationエンドポイント
    client: Arc<dyn AttestationClient>,
    /// 公開中の鍵とQuote
    current: RwLock<Option<Bound>>,
    /// 生成シーケンスを直列化するロック。直近の試行結果を保持する
    init_lock: tokio::sync::Mutex<Option<InitOutcome>>,
    /// 完了した生成シーケンス（成功・失敗とも）の通し番号
    attempts: AtomicU64,
    /// 生成シーケンス実行中フラグ
    initializing: AtomicBool,
}

impl IdentityQuote {
    /// 未初期化のインスタンスを作成する。
    pub fn new(algorithm: SigningAlgorithm, client: Arc<dyn AttestationClient>) -> Self {
        Self {
            algorithm,
            client,
            current: RwLock::new(None),
            init_lock: tokio::sync::Mutex::new(None),
            attempts: AtomicU64::new(0),
            initializing: AtomicBool::new(false),
        }
    }

    /// 署名アルゴリズムを返す。
    pub fn algorithm(&self) -> SigningAlgorithm {
        self.algorithm
    }

    /// 現在の状態を返す。
    pub fn state(&self) -> IdentityState {
        if self.initializing.load(Ordering::SeqCst) {
            IdentityState::Initializing
        } else if self.read().is_some() {
            IdentityState::Ready
        } else {
            IdentityState::Uninitialized
        }
    }

    /// Ready状態ならアイデンティティを返す。
    pub fn current(&self) -> Option<Arc<AttestedIdentity>> {
        self.read().as_ref().map(|b| b.identity.clone())
    }

    /// アイデンティティを初期化する。
    ///
    /// - Ready かつ `force = false`: 何もせず既存のアイデンティティを返す
    /// - `force = true`: 旧鍵を破棄し、新しい鍵・Quote・環境情報を生成する
    ///
    /// 待機中に他の呼び出しが生成シーケンスを終えた場合は、`force` であっても
    /// その結果を返す。失敗した場合も同じエラーを返し、再試行はしない。
    pub async fn init(&self, force: bool) -> Result<Arc<AttestedIdentity>, IdentityError> {
        if !force {
            if let Some(identity) = self.current() {
                return Ok(identity);
            }
        }

        let observed = self.attempts.load(Ordering::SeqCst);
        let mut last = self.init_lock.lock().await;

        if self.attempts.load(Ordering::SeqCst) != observed {
            if let Some(outcome) = last.as_ref() {
                return outcome.clone();
            }
        }
        if !force {
            if let Some(identity) = self.current() {
                return Ok(identity);
            }
        }

        let _flag = InitializingFlag::raise(&self.initializing);
        if force {
            // 書き込みロックの取得は実行中の署名の完了を待つ
            if let Some(old) = self.write().take() {
                tracing::info!(
                    signing_address = %old.identity.signing_address,
                    "旧アイデンティティを破棄しました"
                );
            }
        }

        let outcome = self.generate().await.map(|bound| {
            let identity = bound.identity.clone();
            *self.write() = Some(bound);
            tracing::info!(
                signing_address = %identity.signing_address,
                signing_algo = %identity.signing_algo,
                tee_type = self.client.tee_type(),
                "アイデンティティを初期化しました"
            );
            identity
        });
        *last = Some(outcome.clone());
        self.attempts.fetch_add(1, Ordering::SeqCst);
        outcome
    }

    /// 鍵生成 → report data計算 → Quote取得 → 環境情報取得。
    async fn generate(&self) -> Result<Bound, IdentityError> {
        let signer = generate_identity(self.algorithm)?;
        let signing_address = signer.signing_address();
        let report_data = signer.report_data();

        let quote = self.client.get_quote(&report_data).await.map_err(|e| {
            tracing::error!(error = %e, "Quoteの取得に失敗しました");
            IdentityError::AttestationUnavailable(e.to_string())
        })?;

        let info = match self.client.get_info(&report_data).await {
            Ok(info) => Some(info),
            Err(e) => {
                tracing::warn!(error = %e, "環境情報の取得に失敗しました（infoなしで続行）");
                None
            }
        };

        let identity = Arc::new(AttestedIdentity {
            signing_address,
            signing_algo: self.algorithm,
            quote: quote.quote,
            event_log: quote.event_log,
            info,
        });
        Ok(Bound { signer, identity })
    }

    /// 保持している鍵でコンテンツに署名する。
    pub fn sign(&self, content: &str) -> Result<SignedContent, IdentityError> {
        let guard = self.read();
        let bound = guard.as_ref().ok_or(IdentityError::NotInitialized)?;
        let signature = bound.signer.sign(content)?;
        Ok(SignedContent {
            signature,
            signing_address: bound.identity.signing_address.clone(),
            signing_algo: bound.identity.signing_algo,
        })
    }

    fn read(&self) -> RwLockReadGuard<'_, Option<Bound>> {
        self.current.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Option<Bound>> {
        self.current.write().unwrap_or_else(PoisonError::into_inner)
    }
}
