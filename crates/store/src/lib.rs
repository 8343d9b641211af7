//! # certgate 永続ストア
//!
//! 証明書発行に伴う永続状態を管理する。
//!
//! ## 構成
//! - [`DurableStore`]: SQLite上のクラッシュ整合なトランザクショナルKVストア
//! - [`AddressAllocator`]: IPv4アドレスの逐次割り当て（カーソルを永続化）
//! - [`RecordLedger`]: 証明書発行記録の台帳
//!
//! ストアのハンドルは明示的に構築し、各コンポーネントのコンストラクタに渡す。
//! グローバルなハンドルは持たない。

pub mod allocator;
pub mod error;
pub mod ledger;
pub mod store;

pub use allocator::AddressAllocator;
pub use error::{AllocError, LedgerError, StoreError};
pub use ledger::{RecordIter, RecordLedger};
pub use store::{DurableStore, Txn, CURSOR_KEY};
