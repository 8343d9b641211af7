//! # Gateway エラー型
//!
//! 認証失敗・内部失敗の詳細はサーバーログにのみ出力し、
//! クライアントには固定の文言だけを返す。

use axum::http::StatusCode;

use crate::issuance::{IssuanceError, IssuanceStage};

/// Gatewayエラー型。
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// 不正なリクエスト
    #[error("{0}")]
    BadRequest(String),
    /// Content-Typeがapplication/jsonでない
    #[error("{0}")]
    UnsupportedMediaType(String),
    /// トークン検証に失敗
    #[error("unauthorized")]
    Unauthorized,
    /// 内部エラー
    #[error("internal error")]
    Internal,
}

impl From<IssuanceError> for GatewayError {
    fn from(err: IssuanceError) -> Self {
        match err {
            IssuanceError::Auth(e) => {
                tracing::warn!(stage = %IssuanceStage::Received, error = %e, "IDトークンを拒否");
                GatewayError::Unauthorized
            }
            other => {
                tracing::error!(stage = %other.stage(), error = %other, "証明書の発行に失敗");
                GatewayError::Internal
            }
        }
    }
}

impl axum::response::IntoResponse for GatewayError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self {
            GatewayError::BadRequest(_) => StatusCode::BAD_REQUEST,
            GatewayError::UnsupportedMediaType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            GatewayError::Unauthorized => StatusCode::UNAUTHORIZED,
            GatewayError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, self.to_string()).into_response()
    }
}
