//! # JWKS取得
//!
//! IDプロバイダのJWKSエンドポイントから鍵セットを1回のGETで取得する。
//! リトライは行わない。取得した鍵セットはその検証1回分だけ使用する。

use std::time::Duration;

use reqwest::StatusCode;

use crate::error::JwksError;

/// 署名検証用の公開鍵セット。
pub type KeySet = jsonwebtoken::jwk::JwkSet;

/// JWKS取得のデフォルトタイムアウト。
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// JWKSレスポンスの最大サイズ（1MB）。
pub const MAX_JWKS_SIZE: usize = 1024 * 1024;

/// JWKS取得クライアント。
#[derive(Clone)]
pub struct KeySetFetcher {
    http_client: reqwest::Client,
}

impl KeySetFetcher {
    /// リクエストタイムアウトを指定して構築する。
    pub fn new(timeout: Duration) -> Result<Self, JwksError> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| JwksError::Transport(format!("HTTPクライアントの構築に失敗: {e}")))?;
        Ok(Self { http_client })
    }

    /// JWKSを取得してデコードする。
    pub async fn fetch(&self, url: &str) -> Result<KeySet, JwksError> {
        let mut response = self
            .http_client
            .get(url)
            .send()
            .await
            .map_err(|e| JwksError::Transport(format!("HTTP送信失敗 ({url}): {e}")))?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(JwksError::Status(status.as_u16()));
        }

        if let Some(length) = response.content_length() {
            if length > MAX_JWKS_SIZE as u64 {
                return Err(too_large(length));
            }
        }

        // Content-Lengthが無い場合も上限を超えた時点で読み取りを止める
        let mut body = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| JwksError::Transport(format!("レスポンス読み取り失敗 ({url}): {e}")))?
        {
            if body.len() + chunk.len() > MAX_JWKS_SIZE {
                return Err(too_large((body.len() + chunk.len()) as u64));
            }
            body.extend_from_slice(&chunk);
        }

        let key_set: KeySet =
            serde_json::from_slice(&body).map_err(|e| JwksError::Decode(e.to_string()))?;

        tracing::debug!(url = %url, keys = key_set.keys.len(), "JWKSを取得");
        Ok(key_set)
    }
}

fn too_large(size: u64) -> JwksError {
    JwksError::Decode(format!("レスポンスサイズが上限を超えています: {size} bytes"))
}
