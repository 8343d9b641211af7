//! # Gatewayエンドポイント

pub mod issue_cert;
pub mod nebula_configuration;
pub mod welcome;

pub use issue_cert::{handle_issue_cert, handle_issue_cert_get, MAX_BODY_SIZE};
pub use nebula_configuration::handle_nebula_configuration;
pub use welcome::handle_welcome;

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;

use crate::config::GatewayState;

/// 全エンドポイントを登録したルーターを構築する。
pub fn router(state: Arc<GatewayState>) -> axum::Router {
    axum::Router::new()
        .route(
            "/issuecert",
            axum::routing::get(handle_issue_cert_get).post(handle_issue_cert),
        )
        .route("/welcome", axum::routing::get(handle_welcome))
        .route(
            "/.well-known/nebula-configuration",
            axum::routing::get(handle_nebula_configuration),
        )
        .layer(DefaultBodyLimit::max(MAX_BODY_SIZE))
        .with_state(state)
}
