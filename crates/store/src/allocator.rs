//! # IPv4アドレス逐次割り当て
//!
//! 最後に割り当てたアドレスをカーソル（`currentIPAddress`）としてストアに保存し、
//! 呼び出しごとに次のアドレスを計算して返す。
//!
//! ## 繰り上がり規則
//! 各オクテットは 0〜254 の範囲で使用し、255 に達したオクテットは 0 に戻して
//! 上位オクテットへ繰り上げる（`.255` はブロードキャスト予約）。
//!
//! - `10.0.0.254` → `10.0.1.0`
//! - `10.0.254.254` → `10.1.0.0`
//! - `254.254.254.254` → [`AllocError::AddressSpaceExhausted`]
//!
//! 第1オクテットからの繰り上がりはラップアラウンドせず、枯渇として扱う。
//! 枯渇を検出した割り当て器はそれ以降の呼び出しを全て拒否する。

use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::AllocError;
use crate::store::{DurableStore, CURSOR_KEY};

/// 割り当て可能なオクテットの最大値。
pub const MAX_OCTET: u16 = 254;

/// IPv4アドレスの逐次割り当て器。
///
/// カーソルの読み取り・次アドレスの計算・書き込みは単一の更新トランザクション内で
/// 行うため、同一ストアに対する並行呼び出しが同じアドレスを返すことはない。
pub struct AddressAllocator {
    store: DurableStore,
    initial: Ipv4Addr,
    exhausted: AtomicBool,
}

impl AddressAllocator {
    /// 割り当て器を構築する。
    ///
    /// `initial` はカーソルが未保存の場合に最初に割り当てるアドレス。
    /// いずれかのオクテットが254を超える場合は `Parse` エラー。
    pub fn new(store: DurableStore, initial: Ipv4Addr) -> Result<Self, AllocError> {
        if initial.octets().iter().any(|&o| u16::from(o) > MAX_OCTET) {
            return Err(AllocError::Parse(format!(
                "初期アドレスのオクテットは{MAX_OCTET}以下である必要があります: {initial}"
            )));
        }
        Ok(Self {
            store,
            initial,
            exhausted: AtomicBool::new(false),
        })
    }

    /// 次のアドレスを割り当て、カーソルとして永続化して返す。
    ///
    /// カーソルが未保存の場合は初期アドレスを保存して返す。
    pub fn next_address(&self) -> Result<Ipv4Addr, AllocError> {
        if self.exhausted.load(Ordering::Acquire) {
            return Err(AllocError::AddressSpaceExhausted);
        }

        let result: Result<Ipv4Addr, AllocError> = self.store.update(|txn| {
            let next = match txn.get(CURSOR_KEY)? {
                None => {
                    tracing::info!(ip_address = %self.initial, "カーソル未設定のため初期アドレスを設定");
                    self.initial
                }
                Some(raw) => {
                    let text = std::str::from_utf8(&raw).map_err(|e| {
                        AllocError::Parse(format!("カーソル値がUTF-8ではありません: {e}"))
                    })?;
                    next_after(parse_cursor(text)?)?
                }
            };
            txn.set(CURSOR_KEY, next.to_string().as_bytes())?;
            Ok(next)
        });

        if let Err(AllocError::AddressSpaceExhausted) = &result {
            self.exhausted.store(true, Ordering::Release);
            tracing::error!("IPv4アドレス空間を使い果たしました。以後の証明書発行は停止します");
        }
        result
    }

    /// 保存済みのカーソル値を返す（未保存ならNone）。
    pub fn current(&self) -> Result<Option<Ipv4Addr>, AllocError> {
        self.store.view(|txn| {
            txn.get(CURSOR_KEY)?
                .map(|raw| {
                    let text = std::str::from_utf8(&raw).map_err(|e| {
                        AllocError::Parse(format!("カーソル値がUTF-8ではありません: {e}"))
                    })?;
                    parse_cursor(text).map(Ipv4Addr::from)
                })
                .transpose()
        })
    }
}

/// カーソル値（ドット区切りの4つの10進整数、各0〜255）をパースする。
pub fn parse_cursor(text: &str) -> Result<[u8; 4], AllocError> {
    let parts: Vec<&str> = text.split('.').collect();
    if parts.len() != 4 {
        return Err(AllocError::Parse(format!(
            "4つのオクテットが必要です: {text:?}"
        )));
    }

    let mut octets = [0u8; 4];
    for (slot, part) in octets.iter_mut().zip(parts) {
        if part.is_empty() || part.len() > 3 || !part.bytes().all(|b| b.is_ascii_digit()) {
            return Err(AllocError::Parse(format!("不正なオクテット: {part:?} ({text:?})")));
        }
        *slot = part
            .parse::<u8>()
            .map_err(|_| AllocError::Parse(format!("オクテットが範囲外です: {part} ({text:?})")))?;
    }
    Ok(octets)
}

/// カーソルの次のアドレスを計算する。
///
/// 最下位オクテットに1を加え、254を超えたオクテットを0に戻して上位へ繰り上げる。
/// 第1オクテットが254を超えた場合は枯渇。
pub fn next_after(octets: [u8; 4]) -> Result<Ipv4Addr, AllocError> {
    let mut parts = octets.map(u16::from);
    parts[3] += 1;

    for i in (1..4).rev() {
        if parts[i] > MAX_OCTET {
            parts[i] = 0;
            parts[i - 1] += 1;
        }
    }

    if parts[0] > MAX_OCTET {
        return Err(AllocError::AddressSpaceExhausted);
    }

    // 全オクテットが MAX_OCTET 以下であることは上で保証済み
    Ok(Ipv4Addr::new(
        parts[0] as u8,
        parts[1] as u8,
        parts[2] as u8,
        parts[3] as u8,
    ))
}
