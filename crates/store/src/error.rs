//! # ストアエラー型
//!
//! ストア本体・アドレス割り当て・発行記録台帳のエラー。

/// 永続ストアのエラー。
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// SQLiteの操作に失敗
    #[error("データベース操作に失敗: {0}")]
    Database(#[from] rusqlite::Error),
    /// クローズ済みのストアに対する操作
    #[error("ストアはクローズ済みです")]
    Closed,
    /// 他スレッドのパニックによりロックが破損している
    #[error("ストアのロックが破損しています")]
    Poisoned,
}

/// アドレス割り当てのエラー。
#[derive(Debug, thiserror::Error)]
pub enum AllocError {
    /// 保存されたカーソル値、または初期アドレスが不正
    #[error("IPv4アドレスのパースに失敗: {0}")]
    Parse(String),
    /// アドレス空間を使い果たした。以後の割り当ては全て失敗する。
    #[error("IPv4アドレス空間を使い果たしました")]
    AddressSpaceExhausted,
    /// ストア操作に失敗
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// 発行記録台帳のエラー。
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    /// 記録のシリアライズに失敗
    #[error("発行記録のシリアライズに失敗: {0}")]
    Encode(String),
    /// 保存済みの記録が読み取れない
    #[error("発行記録のデコードに失敗 (id={id}): {detail}")]
    Decode { id: String, detail: String },
    /// 指定IDの記録が存在しない
    #[error("発行記録が見つかりません: {0}")]
    NotFound(String),
    /// 同一IDの記録が既に存在する（記録は不変）
    #[error("発行記録が既に存在します: {0}")]
    Duplicate(String),
    /// 予約済みキーをIDとして使用しようとした
    #[error("予約済みのキーは発行記録のIDに使用できません: {0}")]
    ReservedKey(String),
    /// ストア操作に失敗
    #[error(transparent)]
    Store(#[from] StoreError),
}
