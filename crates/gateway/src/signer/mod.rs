//! # 証明書署名
//!
//! 公開鍵と割り当てアドレスから証明書を発行する外部署名器の抽象インターフェース。
//! nebula-certを使用する実装は `nebula` サブモジュールを参照。

pub mod nebula;

pub use nebula::NebulaCertSigner;

use std::net::Ipv4Addr;

/// 署名要求。
#[derive(Debug, Clone)]
pub struct SigningRequest {
    /// 証明書に埋め込む公開鍵（PEM）
    pub public_key: String,
    /// 証明書に記載する名前
    pub name: String,
    /// 割り当て済みアドレス
    pub ip_address: Ipv4Addr,
    /// オーバーレイネットワークのプレフィックス長
    pub prefix_len: u8,
}

impl SigningRequest {
    /// `10.0.0.1/8` 形式のCIDR表記。
    pub fn cidr(&self) -> String {
        format!("{}/{}", self.ip_address, self.prefix_len)
    }
}

/// 署名のエラー。
#[derive(Debug, thiserror::Error)]
pub enum SignError {
    /// 一時ファイル・プロセス起動などのI/Oに失敗
    #[error("署名器のI/Oに失敗: {0}")]
    Io(String),
    /// 署名器が失敗を返した
    #[error("署名器が失敗しました: {0}")]
    Failed(String),
    /// 署名器が制限時間内に応答しなかった
    #[error("署名器が{0}秒以内に応答しませんでした")]
    Timeout(u64),
}

/// 外部署名器。
///
/// 署名器の暗号処理には関与しない。成功時は署名済み証明書（PEM）を返す。
#[async_trait::async_trait]
pub trait CertSigner: Send + Sync {
    async fn sign(&self, request: &SigningRequest) -> Result<String, SignError>;
}
