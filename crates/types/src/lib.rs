//! # certgate 共有型定義
//!
//! Gateway・ストア・CLIの間で受け渡すデータ構造をRust構造体として提供する。
//!
//! ## エンコーディング規則
//! - ワイヤ形式のフィールド名は既存クライアントとの互換性のためPascalCase
//!   （`Token`, `PubKey`, `IPAddr` 等）を維持する。
//! - IPv4アドレスはドット区切り10進表記の文字列。

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// 証明書発行 API
// ---------------------------------------------------------------------------

/// POST /issuecert リクエスト。
///
/// 未知のフィールドを含むリクエストは拒否する。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IssueCertRequest {
    /// IDプロバイダが発行したIDトークン（JWS compact形式）
    #[serde(rename = "Token", alias = "token")]
    pub token: String,
    /// 証明書に埋め込む公開鍵（nebula-cert形式のPEM）
    #[serde(rename = "PubKey", alias = "pubkey", alias = "pub_key")]
    pub pub_key: String,
}

/// POST /issuecert レスポンス。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IssueCertResponse {
    /// 発行記録の識別子（UUID v4）
    pub id: String,
    /// 署名済み証明書（PEM）
    pub certificate: String,
    /// 割り当てたIPv4アドレス
    pub ip_address: String,
}

// ---------------------------------------------------------------------------
// 発行記録
// ---------------------------------------------------------------------------

/// 証明書発行記録。発行ごとに1件作成され、以後変更されない。
///
/// ストア上ではJSON `{"PubKey", "Token", "IPAddr"}` として保存される。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CertRecord {
    /// 証明書の主体公開鍵
    #[serde(rename = "PubKey")]
    pub pub_key: String,
    /// 発行の根拠となったIDトークン
    #[serde(rename = "Token")]
    pub token: String,
    /// 割り当てたIPv4アドレス
    #[serde(rename = "IPAddr")]
    pub ip_addr: String,
}

// ---------------------------------------------------------------------------
// 公開設定 (GET /.well-known/nebula-configuration)
// ---------------------------------------------------------------------------

/// クライアントがログインフローを開始するために必要な公開設定。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NebulaConfiguration {
    /// OIDC Discovery URL
    #[serde(rename = "DiscoveryURL")]
    pub discovery_url: String,
    /// OIDCクライアントID（トークンの期待audience）
    #[serde(rename = "ClientID")]
    pub client_id: String,
    /// OIDCリダイレクトURI
    ///
    /// 過去の配信形式のキー `ReidrectURI` も読み込み時に受け付ける。
    #[serde(rename = "RedirectURI", alias = "ReidrectURI")]
    pub redirect_uri: String,
    /// 本GatewayのベースURL
    #[serde(rename = "CAURL")]
    pub ca_url: String,
}
