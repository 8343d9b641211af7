//! # 証明書発行記録台帳
//!
//! 発行記録をJSONにシリアライズし、発行IDをキーとしてストアに保存する。
//! 記録は一度書き込んだら変更しない。IDの一意性は呼び出し側（UUID v4生成）が保証し、
//! 台帳は既存IDへの上書きを拒否する。

use std::collections::VecDeque;

use certgate_types::CertRecord;

use crate::error::LedgerError;
use crate::store::{DurableStore, CURSOR_KEY};

/// [`RecordLedger::list_all`] が1回のトランザクションで読み出す件数。
const LIST_PAGE_SIZE: usize = 64;

/// 証明書発行記録台帳。
pub struct RecordLedger {
    store: DurableStore,
}

impl RecordLedger {
    pub fn new(store: DurableStore) -> Self {
        Self { store }
    }

    /// 発行記録を書き込む。
    pub fn put(&self, id: &str, record: &CertRecord) -> Result<(), LedgerError> {
        if id.as_bytes() == CURSOR_KEY {
            return Err(LedgerError::ReservedKey(id.to_string()));
        }

        let bytes =
            serde_json::to_vec(record).map_err(|e| LedgerError::Encode(e.to_string()))?;

        self.store.update(|txn| {
            if txn.get(id.as_bytes())?.is_some() {
                return Err(LedgerError::Duplicate(id.to_string()));
            }
            txn.set(id.as_bytes(), &bytes)?;
            Ok(())
        })?;

        tracing::debug!(record_id = %id, ip_address = %record.ip_addr, "発行記録を保存");
        Ok(())
    }

    /// 発行記録を取得する。
    pub fn get(&self, id: &str) -> Result<CertRecord, LedgerError> {
        if id.as_bytes() == CURSOR_KEY {
            return Err(LedgerError::NotFound(id.to_string()));
        }

        let bytes = self
            .store
            .view(|txn| txn.get(id.as_bytes()))?
            .ok_or_else(|| LedgerError::NotFound(id.to_string()))?;

        decode_record(id, &bytes)
    }

    /// 全発行記録をキー順に返すイテレータ。
    ///
    /// ページ単位で遅延読み込みし、ページ間でストアのロックは保持しない。
    /// 1回限りの走査で、途中から再開することはできない。
    pub fn list_all(&self) -> RecordIter {
        RecordIter {
            store: self.store.clone(),
            buffer: VecDeque::new(),
            last_key: None,
            done: false,
        }
    }
}

fn decode_record(id: &str, bytes: &[u8]) -> Result<CertRecord, LedgerError> {
    serde_json::from_slice(bytes).map_err(|e| LedgerError::Decode {
        id: id.to_string(),
        detail: e.to_string(),
    })
}

/// [`RecordLedger::list_all`] のイテレータ。
pub struct RecordIter {
    store: DurableStore,
    buffer: VecDeque<(Vec<u8>, Vec<u8>)>,
    last_key: Option<Vec<u8>>,
    done: bool,
}

impl RecordIter {
    fn fill(&mut self) -> Result<(), LedgerError> {
        let page = self
            .store
            .view(|txn| txn.scan(self.last_key.as_deref(), LIST_PAGE_SIZE))?;

        if page.len() < LIST_PAGE_SIZE {
            self.done = true;
        }
        if let Some((key, _)) = page.last() {
            self.last_key = Some(key.clone());
        }
        self.buffer
            .extend(page.into_iter().filter(|(key, _)| key.as_slice() != CURSOR_KEY));
        Ok(())
    }
}

impl Iterator for RecordIter {
    type Item = Result<(String, CertRecord), LedgerError>;

    fn next(&mut self) -> Option<Self::Item> {
        while self.buffer.is_empty() {
            if self.done {
                return None;
            }
            if let Err(e) = self.fill() {
                self.done = true;
                return Some(Err(e));
            }
        }

        let (key, value) = self.buffer.pop_front()?;
        let item = String::from_utf8(key)
            .map_err(|e| LedgerError::Decode {
                id: String::from_utf8_lossy(e.as_bytes()).into_owned(),
                detail: "発行IDがUTF-8ではありません".to_string(),
            })
            .and_then(|id| decode_record(&id, &value).map(|record| (id, record)));
        Some(item)
    }
}
