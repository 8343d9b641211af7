//! # 永続KVストア
//!
//! SQLite（WALモード、`synchronous=FULL`）上に単一テーブルのKVストアを構築する。
//! 読み取り・更新はすべてクロージャ単位のトランザクションで実行し、
//! 更新は `BEGIN IMMEDIATE` により単一ライターで直列化される。
//!
//! ## キー配置
//! - `currentIPAddress`: 最後に割り当てたIPv4アドレス（カーソル）
//! - それ以外: 発行記録のGUID

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};

use crate::error::StoreError;

/// アドレスカーソルの予約キー。
pub const CURSOR_KEY: &[u8] = b"currentIPAddress";

/// ストアのスキーマとPRAGMA。
const SCHEMA_SQL: &str = "
PRAGMA journal_mode = WAL;
PRAGMA synchronous = FULL;
CREATE TABLE IF NOT EXISTS kv (
    key   BLOB PRIMARY KEY NOT NULL,
    value BLOB NOT NULL
) WITHOUT ROWID;
";

/// ロック競合時の待機上限。
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// クラッシュ整合なトランザクショナルKVストア。
///
/// `Clone` は同じコネクションを共有するハンドルを返す。
/// [`close`](Self::close) 後の操作は全て [`StoreError::Closed`] で失敗する。
#[derive(Clone)]
pub struct DurableStore {
    conn: Arc<Mutex<Option<Connection>>>,
    path: Option<PathBuf>,
}

impl DurableStore {
    /// 指定パスのストアを開く。存在しない場合は作成する。
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch(SCHEMA_SQL)?;

        tracing::info!(path = %path.display(), "ストアを開きました");

        Ok(Self {
            conn: Arc::new(Mutex::new(Some(conn))),
            path: Some(path.to_path_buf()),
        })
    }

    /// テスト用のインメモリストアを作成する。
    pub fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(Some(conn))),
            path: None,
        })
    }

    /// ストアのファイルパス（インメモリの場合はNone）。
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// 読み書きトランザクションでクロージャを実行する。
    ///
    /// クロージャが `Ok` を返した場合のみコミットし、`Err` の場合はロールバックする。
    /// 同時に実行できる更新トランザクションは1つだけである。
    pub fn update<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&Txn<'_>) -> Result<T, E>,
        E: From<StoreError>,
    {
        self.run(TransactionBehavior::Immediate, f)
    }

    /// 読み取り専用の一貫したスナップショットでクロージャを実行する。
    pub fn view<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&Txn<'_>) -> Result<T, E>,
        E: From<StoreError>,
    {
        self.run(TransactionBehavior::Deferred, f)
    }

    fn run<T, E, F>(&self, behavior: TransactionBehavior, f: F) -> Result<T, E>
    where
        F: FnOnce(&Txn<'_>) -> Result<T, E>,
        E: From<StoreError>,
    {
        let mut guard = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        let conn = guard.as_mut().ok_or(StoreError::Closed)?;

        let tx = conn
            .transaction_with_behavior(behavior)
            .map_err(StoreError::from)?;
        let value = f(&Txn { conn: &tx })?;
        tx.commit().map_err(StoreError::from)?;
        Ok(value)
    }

    /// ストアをクローズする。
    ///
    /// 実行中のトランザクションの完了を待ってからコネクションを閉じる。
    /// 2回目以降の呼び出しは何もしない。
    pub fn close(&self) -> Result<(), StoreError> {
        let mut guard = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        if let Some(conn) = guard.take() {
            conn.close().map_err(|(_, e)| StoreError::Database(e))?;
            tracing::info!("ストアをクローズしました");
        }
        Ok(())
    }
}

/// トランザクション内のKV操作。
pub struct Txn<'a> {
    conn: &'a Connection,
}

impl Txn<'_> {
    /// キーに対応する値を取得する。
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        let value = self
            .conn
            .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(value)
    }

    /// キーに値を書き込む（既存の値は置き換える）。
    pub fn set(&self, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT INTO kv (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    /// キー順に `after` より大きいエントリを最大 `limit` 件返す。
    pub fn scan(
        &self,
        after: Option<&[u8]>,
        limit: usize,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError> {
        fn map_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<(Vec<u8>, Vec<u8>)> {
            Ok((row.get(0)?, row.get(1)?))
        }

        let limit = i64::try_from(limit).unwrap_or(i64::MAX);

        let entries = match after {
            Some(after) => {
                let mut stmt = self.conn.prepare_cached(
                    "SELECT key, value FROM kv WHERE key > ?1 ORDER BY key LIMIT ?2",
                )?;
                let rows = stmt.query_map(params![after, limit], map_row)?;
                let entries = rows.collect::<Result<Vec<_>, _>>()?;
                entries
            }
            None => {
                let mut stmt = self
                    .conn
                    .prepare_cached("SELECT key, value FROM kv ORDER BY key LIMIT ?1")?;
                let rows = stmt.query_map(params![limit], map_row)?;
                let entries = rows.collect::<Result<Vec<_>, _>>()?;
                entries
            }
        };
        Ok(entries)
    }
}
