//! # GET /welcome
//!
//! 死活確認用エンドポイント。

use axum::http::Uri;

/// GET /welcome: 要求されたパスをそのまま返す。
pub async fn handle_welcome(uri: Uri) -> String {
    format!("Hello, you've requested: {}\n", uri.path())
}
