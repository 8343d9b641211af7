//! # POST /issuecert
//!
//! IDトークンと公開鍵を受け取り、検証に成功した場合のみ証明書を発行する。

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::rejection::BytesRejection;
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::Json;
use certgate_types::{IssueCertRequest, IssueCertResponse};
use serde_json::error::Category;

use crate::config::GatewayState;
use crate::error::GatewayError;

/// リクエストボディの最大サイズ（1MB）。
pub const MAX_BODY_SIZE: usize = 1024 * 1024;

/// GET /issuecert
pub async fn handle_issue_cert_get() -> &'static str {
    "nothing to see here"
}

/// POST /issuecert: 証明書発行。
///
/// - Content-Typeが指定されていてapplication/jsonでない場合は415
/// - ボディの形式不正・サイズ超過は400
/// - トークン検証失敗は401、それ以外の失敗は500
pub async fn handle_issue_cert(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> Result<Json<IssueCertResponse>, GatewayError> {
    check_content_type(&headers)?;

    let body = body.map_err(|rejection| {
        if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
            body_too_large()
        } else {
            GatewayError::BadRequest(rejection.body_text())
        }
    })?;
    let request = decode_request(&body)?;

    // クライアントが切断してハンドラのFutureが破棄されても、
    // 発行フローは完了または失敗まで進める
    let orchestrator = Arc::clone(&state.orchestrator);
    let issued = tokio::spawn(async move { orchestrator.issue(&request).await })
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "発行タスクが異常終了しました");
            GatewayError::Internal
        })??;

    Ok(Json(IssueCertResponse {
        id: issued.id,
        certificate: issued.certificate,
        ip_address: issued.ip_address.to_string(),
    }))
}

fn check_content_type(headers: &HeaderMap) -> Result<(), GatewayError> {
    let Some(value) = headers.get(header::CONTENT_TYPE) else {
        return Ok(());
    };
    let media_type = value
        .to_str()
        .ok()
        .and_then(|v| v.split(';').next())
        .map(|v| v.trim().to_ascii_lowercase());
    match media_type.as_deref() {
        Some("application/json") => Ok(()),
        _ => Err(GatewayError::UnsupportedMediaType(
            "Content-Type header is not application/json".to_string(),
        )),
    }
}

fn body_too_large() -> GatewayError {
    GatewayError::BadRequest("Request body must not be larger than 1MB".to_string())
}

/// リクエストボディをデコードする。未知のフィールドは拒否する。
///
/// サイズ上限はルーターの `DefaultBodyLimit` で適用済み。
fn decode_request(body: &[u8]) -> Result<IssueCertRequest, GatewayError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Err(GatewayError::BadRequest(
            "Request body must not be empty".to_string(),
        ));
    }
    serde_json::from_slice(body).map_err(|e| GatewayError::BadRequest(describe_json_error(&e)))
}

fn describe_json_error(err: &serde_json::Error) -> String {
    match err.classify() {
        Category::Syntax => format!(
            "Request body contains badly-formed JSON (at line {} column {})",
            err.line(),
            err.column()
        ),
        Category::Eof => "Request body contains badly-formed JSON".to_string(),
        Category::Data => {
            let message = err.to_string();
            if let Some(rest) = message.strip_prefix("unknown field ") {
                let field = rest.split(',').next().unwrap_or(rest);
                format!("Request body contains unknown field {field}")
            } else if let Some(rest) = message.strip_prefix("missing field ") {
                let field = rest.split(" at line").next().unwrap_or(rest);
                format!("Request body is missing field {field}")
            } else {
                format!(
                    "Request body contains an invalid value (at line {} column {})",
                    err.line(),
                    err.column()
                )
            }
        }
        Category::Io => "Request body could not be read".to_string(),
    }
}
