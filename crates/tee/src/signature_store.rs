//! # 署名ストア
//!
//! チャットIDをキーに `{text, signature}` を保持するメモリ内ストア。
//! TTL経過したエントリは参照時に見えなくなり、挿入時に掃除される。
//! 容量上限に達した場合は最も古いエントリから追い出す。

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use veritee_types::SigningAlgorithm;

/// デフォルトTTL（20分）
pub const DEFAULT_SIGNATURE_TTL: Duration = Duration::from_secs(20 * 60);

/// デフォルト容量
pub const DEFAULT_SIGNATURE_CAPACITY: usize = 10_000;

/// 保存された署名。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredSignature {
    /// 署名対象テキスト
    pub text: String,
    /// 署名
    pub signature: String,
    /// 署名時点の署名アドレス
    pub signing_address: String,
    /// 署名アルゴリズム
    pub signing_algo: SigningAlgorithm,
}

struct Entry {
    value: StoredSignature,
    inserted_at: Instant,
}

#[derive(Default)]
struct Inner {
    entries: HashMap<String, Entry>,
    /// 挿入順（追い出し用）。`entries` とIDが1対1で対応する
    order: VecDeque<(String, Instant)>,
}

/// TTL・容量制限付きの署名ストア。
pub struct SignatureStore {
    ttl: Duration,
    capacity: usize,
    inner: Mutex<Inner>,
}

impl SignatureStore {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            ttl,
            capacity: capacity.max(1),
            inner: Mutex::new(Inner::default()),
        }
    }

    /// 署名を保存する。同じIDが既にあれば上書きする。
    pub fn insert(&self, chat_id: &str, value: StoredSignature) {
        let now = Instant::now();
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);

        // 期限切れを先頭から掃除
        while let Some((id, inserted_at)) = inner.order.front() {
            if now.duration_since(*inserted_at) < self.ttl {
                break;
            }
            let id = id.clone();
            inner.order.pop_front();
            inner.entries.remove(&id);
        }

        let previous = inner.entries.insert(
            chat_id.to_string(),
            Entry {
                value,
                inserted_at: now,
            },
        );
        if previous.is_some() {
            // 上書きしたIDは挿入順の末尾へ移す
            inner.order.retain(|(id, _)| id != chat_id);
        }
        inner.order.push_back((chat_id.to_string(), now));

        while inner.entries.len() > self.capacity {
            let Some((id, _)) = inner.order.pop_front() else {
                break;
            };
            inner.entries.remove(&id);
            tracing::debug!(chat_id = %id, "容量上限により署名を破棄しました");
        }
    }

    /// 署名を取得する。存在しないか期限切れならNone。
    pub fn get(&self, chat_id: &str) -> Option<StoredSignature> {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner
            .entries
            .get(chat_id)
            .filter(|e| e.inserted_at.elapsed() < self.ttl)
            .map(|e| e.value.clone())
    }

    /// 保持しているエントリ数（期限切れ未掃除分を含む）。
    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .len()
    }

    #[cfg(test)]
    fn order_len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .order
            .len()
    }
}
